//! Versioned JSON schemas for message payloads.
//!
//! - [`SchemaRegistry`] stores append-only versions per schema name.
//! - [`SchemaValidator`] checks payloads against a registered version and
//!   reports structured errors keyed by JSON pointer.

pub mod registry;
pub mod validator;

pub use registry::{Schema, SchemaRegistry};
pub use validator::{SchemaError, SchemaValidator, ValidationError, ValidationOutcome, validate_against};
