//! Storage module for branchwork
//!
//! - `json`: JSON settings files (per-user and per-repository)

mod json;

pub use json::{JsonStore, STORE_DIR_NAME};
