//! Core definitions (error types and validation helpers), relied upon by all ambit-* crates.

pub mod error;
pub mod macros;
pub mod result;

pub use error::{Error, ErrorKind};
pub use result::Result;
