//! Process termination signal.
//!
//! [`TerminationSignal`] is a clonable latch: the first [`trigger`] wins and
//! every later one is ignored, so a second Ctrl+C or SIGTERM never restarts
//! or interrupts an ordered shutdown.
//!
//! [`trigger`]: TerminationSignal::trigger

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct TerminationSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl TerminationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the signal has fired, immediately if it already has.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Forwards Ctrl+C and, on unix, SIGTERM to this signal.
    ///
    /// The returned task keeps listening after the first signal so repeated
    /// signals are logged and ignored instead of killing the process.
    pub fn install_os_handlers(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            let mut terminate =
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(stream) => Some(stream),
                    Err(e) => {
                        tracing::error!("Failed to install SIGTERM handler: {e}");
                        None
                    }
                };

            loop {
                #[cfg(unix)]
                let sigterm = async {
                    match terminate.as_mut() {
                        Some(stream) => {
                            stream.recv().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };
                #[cfg(not(unix))]
                let sigterm = std::future::pending::<()>();
                tokio::pin!(sigterm);

                let name = tokio::select! {
                    result = signal::ctrl_c() => match result {
                        Ok(()) => "SIGINT",
                        Err(e) => {
                            tracing::error!("Failed to listen for Ctrl+C: {e}");
                            // Only SIGTERM can still arrive.
                            (&mut sigterm).await;
                            "SIGTERM"
                        }
                    },
                    () = &mut sigterm => "SIGTERM",
                };

                if this.trigger() {
                    tracing::info!(
                        signal = name,
                        "Shutdown signal received, terminating gracefully..."
                    );
                } else {
                    tracing::warn!(
                        signal = name,
                        "Shutdown already in progress, ignoring signal"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn only_the_first_trigger_fires() {
        let signal = TerminationSignal::new();
        assert!(!signal.is_triggered());

        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(!signal.clone().trigger());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn wait_resolves_for_every_clone() {
        let signal = TerminationSignal::new();
        let waiter = signal.clone();
        let waiting = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();

        // Already fired: resolves immediately.
        signal.wait().await;
    }
}
