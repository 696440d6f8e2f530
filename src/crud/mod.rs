//! Generic per-collection CRUD adapter.
//!
//! # Responsibilities
//! - create / list / get / update / delete against one bound collection
//! - Reject payloads the bound validator reports invalid
//! - Maintain base record fields (createdAt, modifiedAt, isDeleted, deletedAt)
//! - Distinguish client errors (empty body, bad id, not found) from storage failures
//!
//! HTTP status mapping lives in `http::response`.

pub mod handler;

pub use handler::{parse_body, parse_id, CrudError, CrudHandler, CrudResult};
