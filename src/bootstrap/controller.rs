//! Named controller units.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A reconciliation loop. The runner owns its worker strategy; `workers`
/// is the degree of parallelism it should use. Runners must return promptly
/// once the token is cancelled.
#[async_trait]
pub trait ControllerRunner: Send + Sync {
    async fn run(&self, token: CancellationToken, workers: usize);
}

/// A named reconciliation unit with a configured worker count.
pub struct Controller {
    name: String,
    workers: usize,
    runner: Arc<dyn ControllerRunner>,
}

impl Controller {
    pub fn new(name: impl Into<String>, workers: usize, runner: Arc<dyn ControllerRunner>) -> Self {
        Self {
            name: name.into(),
            workers,
            runner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start the controller on the shared completion barrier. The task
    /// finishes when the runner observes cancellation and returns.
    pub fn spawn(&self, token: CancellationToken, tasks: &mut JoinSet<()>) {
        let name = self.name.clone();
        let workers = self.workers;
        let runner = self.runner.clone();
        tasks.spawn(async move {
            info!(controller = %name, workers, "Starting controller");
            runner.run(token, workers).await;
            info!(controller = %name, "Controller stopped");
        });
    }
}
