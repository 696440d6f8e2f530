//! CRUD endpoints provisioned at runtime from a live project configuration.

pub mod admin;
pub mod config;
pub mod crud;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod reload;
pub mod routing;
pub mod store;
pub mod validator;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::{Engine, Shutdown};
