//! Process lifecycle for the parser service.
//!
//! Named long-running processes share one cancellation token. The first
//! process to fail, a SIGINT, or a SIGTERM cancels all of them; closers then
//! run under a timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type ProcessFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-running process; it must return once the token is cancelled
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;

pub type Closer = Box<dyn FnOnce() -> ProcessFuture + Send>;

pub struct Runner {
    processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            token: CancellationToken::new(),
        }
    }

    pub fn with_named_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push((name.into(), process));
        self
    }

    pub fn with_app_process<F, Fut>(self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.with_named_process(name, Box::new(move |token| Box::pin(process(token))))
    }

    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(move || Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Share an externally owned shutdown token, e.g. one whose children were
    /// handed to components built before the runner
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Run until every process has returned. Returns the first process error.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.token;
        let mut processes = JoinSet::new();

        for (name, process) in self.processes {
            let process_token = token.clone();
            processes.spawn(async move {
                info!(process = %name, "Starting process");
                (name, process(process_token).await)
            });
        }

        spawn_signal_listeners(token.clone());

        let mut first_error = None;
        while let Some(joined) = processes.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(process = %name, "Process returned"),
                Ok((name, Err(err))) => {
                    error!(process = %name, error = format!("{err:#}"), "Process failed");
                    if first_error.is_none() {
                        first_error = Some(err.context(format!("process {name} failed")));
                    }
                    token.cancel();
                }
                Err(join_error) => {
                    error!(error = %join_error, "Process panicked");
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("process panicked: {join_error}"));
                    }
                    token.cancel();
                }
            }
        }

        // processes are done; stops signal listeners as well
        token.cancel();

        run_closers(self.closers, self.closer_timeout).await;

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("All processes stopped");
                Ok(())
            }
        }
    }
}

fn spawn_signal_listeners(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c_token.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received SIGINT");
                    ctrl_c_token.cancel();
                }
                Err(err) => error!(error = %err, "Failed to listen for SIGINT"),
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                return;
            }
        };
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                token.cancel();
            }
        }
    });
}

async fn run_closers(closers: Vec<Closer>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    let mut set = JoinSet::new();
    for closer in closers {
        set.spawn(closer());
    }

    let all_done = async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = format!("{err:#}"), "Closer failed"),
                Err(join_error) => error!(error = %join_error, "Closer panicked"),
            }
        }
    };

    if tokio::time::timeout(timeout, all_done).await.is_err() {
        warn!(timeout_ms = timeout.as_millis(), "Closers timed out");
    }
}
