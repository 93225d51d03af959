//! Jobdex Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the jobdex workspace.
//!
//! # Overview
//!
//! - **Documents**: the loosely typed record value and its dotted-path navigator
//! - **Error Handling**: shared error and result types
//! - **Logging**: tracing subscriber setup used by every binary
//!
//! # Example
//!
//! ```
//! use jobdex_common::document::{Document, FieldPath};
//!
//! let mut doc = Document::from(serde_json::json!({"acct": {"timelimit": "01:00:00"}}));
//! FieldPath::parse("acct.timelimit").set(&mut doc, Document::Int(3600));
//! assert_eq!(doc.to_json_string().unwrap(), r#"{"acct":{"timelimit":3600}}"#);
//! ```

pub mod document;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use document::{Document, FieldPath, Map};
pub use error::{JobdexError, Result};
