//! SIGINT/SIGTERM/SIGHUP fan-in for the headless orchestration loop. Mirrors
//! the teacher's `loop_runner` signal wiring minus the TUI interrupt channel
//! this binary has no TUI to drive: a first signal asks the loop to pause
//! and persist, a second one during shutdown kills the process group.

use ralph_proto::StopReason;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    Interrupt,
    Terminated,
}

impl ShutdownCause {
    pub fn stop_reason(self) -> StopReason {
        match self {
            ShutdownCause::Interrupt => StopReason::UserPause,
            ShutdownCause::Terminated => StopReason::ExternalSignal,
        }
    }
}

/// Receiving half of the signal fan-in. Each `recv` resolves on the next
/// signal this receiver hasn't yet observed, so a clone taken right after a
/// first signal only resolves again on a genuinely new one.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<ShutdownCause>>,
}

impl ShutdownSignal {
    pub fn install() -> Self {
        let (tx, rx) = watch::channel(None);

        let sigint_tx = tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("SIGINT received");
                let _ = sigint_tx.send(Some(ShutdownCause::Interrupt));
            }
        });

        #[cfg(unix)]
        {
            let sigterm_tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(mut sig) =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                {
                    sig.recv().await;
                    debug!("SIGTERM received");
                    let _ = sigterm_tx.send(Some(ShutdownCause::Terminated));
                }
            });

            let sighup_tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(mut sig) =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                {
                    sig.recv().await;
                    warn!("SIGHUP received (terminal closed)");
                    let _ = sighup_tx.send(Some(ShutdownCause::Terminated));
                }
            });
        }

        Self { rx }
    }

    /// Resolves with the next unobserved signal's cause.
    pub async fn recv(&mut self) -> ShutdownCause {
        loop {
            if self.rx.changed().await.is_err() {
                // Senders only drop on process exit; stall rather than spin.
                std::future::pending::<()>().await;
            }
            if let Some(cause) = *self.rx.borrow() {
                return cause;
            }
        }
    }
}

/// Waits for a second shutdown signal and force-kills the process group if
/// one arrives before the caller finishes its own graceful shutdown.
pub fn spawn_force_kill_on_second_signal(mut shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        shutdown.recv().await;
        force_kill_process_group().await;
    });
}

/// Kills this process's entire group: SIGTERM, a quarter-second grace
/// period, then SIGKILL. Matches the teacher's own shutdown sequence, so
/// an in-flight agent child (which shares our process group unless it
/// called `setsid`) goes down with it.
#[cfg(unix)]
async fn force_kill_process_group() {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::getpgrp;

    let pgid = getpgrp();
    warn!(?pgid, "second shutdown signal received, force-killing process group");
    let _ = killpg(pgid, Signal::SIGTERM);
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    let _ = killpg(pgid, Signal::SIGKILL);
}

#[cfg(not(unix))]
async fn force_kill_process_group() {
    warn!("second shutdown signal received; forceful process-group kill is unix-only");
}
