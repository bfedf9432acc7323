//! Service runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use robolink_common::{LoggingConfig, init_tracing};

use crate::ServiceArgs;
use crate::config::ServiceConfig;
use crate::error::Result;

/// How long workers get to wind down after the shutdown signal.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Service runner that manages the lifecycle of a gateway process.
///
/// Handles:
/// - Logging initialization (with optional CLI override)
/// - Task spawning and tracking
/// - Cooperative shutdown via a `watch` channel
/// - Shutdown on Ctrl+C, SIGTERM, or a failed worker
///
/// # Example
///
/// ```ignore
/// let runner = ServiceRunner::new_with_args("gateway", config, Some(&args))?;
/// let shutdown = runner.shutdown_signal();
/// runner.spawn("poller", async move { poller.run(shutdown).await });
/// runner.run().await
/// ```
pub struct ServiceRunner<C: ServiceConfig> {
    /// Service name for logging.
    name: String,
    /// Service version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Broadcasts `true` once shutdown starts.
    shutdown_tx: watch::Sender<bool>,
    /// Spawned tasks with their names.
    tasks: Vec<(String, JoinHandle<()>)>,
    /// Time allowed for tasks to finish before they are aborted.
    grace: Duration,
}

impl<C: ServiceConfig> ServiceRunner<C> {
    /// Create a new runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&ServiceArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config)?;

        let runner = Self::without_tracing(name, config);
        tracing::info!(service = %runner.name, version = %runner.version, "Starting service");
        Ok(runner)
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_tracing(name: impl Into<String>, config: C) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            shutdown_tx,
            tasks: Vec::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Override the shutdown grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Receiver that flips to `true` when shutdown starts.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Number of spawned tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn a worker task.
    ///
    /// The task should watch [`shutdown_signal`](Self::shutdown_signal);
    /// it is aborted if still running after the grace period.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push((name.into(), handle));
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// An error is logged and stops the whole service.
    pub fn spawn_with_error<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let shutdown_tx = self.shutdown_tx.clone();
        let worker = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %worker, error = %e, "Worker failed, stopping service");
                shutdown_tx.send_replace(true);
            }
        });
        self.tasks.push((name, handle));
    }

    /// Run until Ctrl+C, SIGTERM, or a failed worker.
    pub async fn run(self) -> Result<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Run until `stop` completes or a worker requests shutdown.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            service = %self.name,
            tasks = self.tasks.len(),
            "Service running. Press Ctrl+C to stop."
        );

        let mut internal = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = stop => {
                tracing::info!(service = %self.name, "Received shutdown signal");
            }
            _ = internal.wait_for(|stopping| *stopping) => {
                tracing::warn!(service = %self.name, "Shutdown requested by a worker");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Signal shutdown and wait for tasks, aborting stragglers.
    async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(self.grace, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = %name, "Task stopped"),
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(task = %name, "Task panicked");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::warn!(task = %name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!(service = %self.name, "Goodbye!");
    }
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
