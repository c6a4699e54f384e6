//! rankbind-core: Core types for rankbind
//!
//! This crate provides the pieces every rankbind component builds on:
//! - Rank placement arithmetic and topology validation
//! - Accelerator device sets as handed out by the workload manager
//! - Configuration types and batch-script rendering
//! - Error handling

pub mod config;
pub mod devices;
pub mod error;
pub mod script;
pub mod topology;

pub use config::*;
pub use devices::*;
pub use error::*;
pub use script::render_batch_script;
pub use topology::*;
