//! # tiller-core
//!
//! Core abstractions shared across the tiller workflow orchestrator.
//!
//! This crate provides the foundational types used by every tiller component:
//!
//! - **Identifiers**: Strongly-typed ULIDs for executions and task runs
//! - **Labels**: Ordered key/value pairs attached to executions, including
//!   the system-label namespace used for cross-execution correlation
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `tiller-core` is the only crate allowed to define shared primitives.
//! Higher layers (the execution core, servers, stores) depend on it and
//! never on each other's internals.
//!
//! ## Example
//!
//! ```rust
//! use tiller_core::prelude::*;
//!
//! let execution_id = ExecutionId::generate();
//! let correlation = Label::correlation_id(execution_id.to_string());
//! assert!(correlation.is_system());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod label;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tiller_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{ExecutionId, TaskRunId};
    pub use crate::label::Label;
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use id::{ExecutionId, TaskRunId};
pub use label::Label;
