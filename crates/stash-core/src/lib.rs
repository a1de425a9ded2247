//! Stash Core
//!
//! Shared vocabulary for the stash build cache: the error taxonomy, storage
//! keys, listed objects and the object store port that the cache engine is
//! written against.

pub mod error;
pub mod key;
pub mod object;
pub mod ports;

pub use error::{Error, ErrorKind, Result};
pub use key::{ObjectKey, clean_path};
pub use object::StoredObject;
pub use ports::ObjectStore;
