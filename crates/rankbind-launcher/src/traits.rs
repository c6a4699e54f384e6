//! Runtime trait definitions

use async_trait::async_trait;
use rankbind_core::RankbindResult;

use crate::env::Binding;

/// Runtime for starting a program bound to its resolved device
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Run `program` with `args` under `binding` and return its exit code
    async fn run(&self, binding: &Binding, program: &str, args: &[String]) -> RankbindResult<i32>;

    /// Get the runtime name
    fn name(&self) -> &'static str;
}
