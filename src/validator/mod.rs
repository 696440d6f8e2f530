//! Request validation subsystem.
//!
//! # Data Flow
//! ```text
//! SchemaDefinition (per project, optional)
//!     → compiler.rs (compile once per reload cycle)
//!     → Validator (shared by every module of the project)
//!     → CRUD adapter checks create/update payloads
//! ```
//!
//! # Design Decisions
//! - Compilation is a pure function of the schema document
//! - Malformed schemas degrade to a no-op validator instead of failing the reload
//! - Validators are immutable and re-entrant; clones share one compiled schema

pub mod compiler;

pub use compiler::{
    compile, try_compile, Compiled, FieldError, SchemaCompileError, ValidationReport, Validator,
};
