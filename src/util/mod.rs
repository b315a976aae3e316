//! Utility functions shared by the submit flow and the CLI.
//!
//! - **URL validation**: scheme checks and SSRF protection for submitted feed URLs

mod url_validator;

pub use url_validator::{parse_feed_url, validate_url, UrlValidationError};
