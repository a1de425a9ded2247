//! S3 object store for stash.
//!
//! Works against AWS S3 and S3-compatible services such as MinIO or R2.

pub mod config;
pub mod store;

pub use config::{DEFAULT_PART_SIZE, DEFAULT_REGION, S3Options};
pub use store::S3Store;
