//! # SIMQ Common Library
//!
//! Shared code for the similarity-query client:
//! - Protocol message types (inbound results, outbound queries)
//! - Query change events and the EventBus
//! - Settings lookup and config file resolution
//! - Error types

pub mod config;
pub mod error;
pub mod events;
pub mod messages;

pub use error::{Error, Result};
