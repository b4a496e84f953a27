//! Manufacturing export for Onshape documents.
//!
//! Finds sheet-metal flat patterns, plate parts and drawings in a document,
//! translates them to DXF and PDF, and packages the results into one
//! timestamped archive with an operation log. Credentials come from a
//! password-encrypted vault; every remote call is scoped by an explicit
//! [`context::DocumentContext`].
pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod package;
pub mod retry;
pub mod staging;
pub mod ui;
pub mod vault;
pub mod workflow;

pub use error::{ExportError, Result};
