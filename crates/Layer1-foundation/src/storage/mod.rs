//! Storage module for Harbor
//!
//! - `json`: JSON files for configuration (global + project)

mod json;

pub use json::{merge_json, JsonStore};
