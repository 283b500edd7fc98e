//! Server process launching and health probing
//!
//! The supervisor drives inference servers only through [`ServerLauncher`].
//! [`CommandLauncher`] is the configuration-driven implementation used by
//! the daemon; tests substitute their own.

mod command;
mod health;
mod process;

pub use command::CommandLauncher;
pub use health::{HealthProbe, HealthReport};
pub use process::{ExitInfo, ProcessHandle, SpawnSpec};

use async_trait::async_trait;

use crate::error::Result;

/// Launches framework servers and checks their readiness
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Names of the frameworks this launcher can start
    fn frameworks(&self) -> Vec<String>;

    /// Whether `framework` is known
    fn supports(&self, framework: &str) -> bool {
        self.frameworks().iter().any(|name| name == framework)
    }

    /// Command line shown as the first log line of a launch
    fn command_line(&self, _framework: &str, _model: &str) -> Option<String> {
        None
    }

    /// Start the server process for `framework` serving `model`
    async fn launch(&self, framework: &str, model: &str) -> Result<ProcessHandle>;

    /// Whether the framework's endpoint currently answers its health check
    async fn probe_health(&self, framework: &str) -> bool;

    /// Start the follow-up command run once the server is ready, if any
    async fn post_ready(&self, _framework: &str, _model: &str) -> Result<Option<ProcessHandle>> {
        Ok(None)
    }
}
