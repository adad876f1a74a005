//! Shared types for the skiff container engine.

pub mod config;
pub mod error;
pub mod idmap;

pub use config::EngineConfig;
pub use error::{Context, Result, SkiffError};
pub use idmap::{IdMap, IdRange, UserIds, UserSpec};
