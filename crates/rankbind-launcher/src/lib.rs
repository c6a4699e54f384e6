//! rankbind-launcher: Launcher integration for rankbind
//!
//! This crate connects the resolver to the outside world:
//! - Reading rank and device information from Slurm, torchrun and MPI launchers
//! - Starting a program bound to its resolved accelerator

pub mod env;
pub mod process;
pub mod traits;

pub use env::{
    visible_devices, Binding, BindingPolicy, EnvSource, LauncherEnv, LauncherKind, MapEnv,
    ProcessEnv,
};
pub use process::ProcessRuntime;
pub use traits::Runtime;
