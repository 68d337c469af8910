//! Process shutdown signals (Ctrl-C and, on unix, SIGTERM from `docker stop`).

use std::io;

use teloxide::dispatching::ShutdownToken;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Signal streams registered up front, so a signal delivered before the
/// first poll is not lost.
pub struct ShutdownSignals {
    #[cfg(unix)]
    term: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Must be called from inside a tokio runtime.
    pub fn register() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            term: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the first shutdown signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c listener failed");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        {
            tokio::select! {
              _ = ctrl_c => "SIGINT",
              _ = self.term.recv() => "SIGTERM",
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await;
            "SIGINT"
        }
    }
}

/// Stop the teloxide dispatcher when a shutdown signal arrives.
pub fn stop_transport_on_signal(mut signals: ShutdownSignals, token: ShutdownToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = signals.recv().await;
        info!(signal, "shutdown requested");
        match token.shutdown() {
            Ok(stopped) => stopped.await,
            Err(_) => debug!("transport was idle at shutdown"),
        }
    })
}
