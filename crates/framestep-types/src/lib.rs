//! Shared domain types for the Framestep project.

pub mod config;
pub mod events;
pub mod frame;
pub mod region;
pub mod timeline;

mod errors;

pub use errors::{FramestepError, Result};
