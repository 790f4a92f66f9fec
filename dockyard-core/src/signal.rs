//! Shutdown requests from every source, funneled into one ordered stream.
//!
//! OS signals, the menu's terminate key and parent cancellation all end up
//! as [`ShutdownRequest`]s numbered by arrival, so the event loop can tell a
//! first request from an escalation.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pending requests the channel holds. The first request is handled inside
/// the event loop, so a second one must be able to queue up meanwhile.
pub const SIGNAL_BUFFER: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    /// Ctrl+C read by the keyboard reader while the terminal is in raw mode
    Keyboard,
    ParentCancelled,
}

impl ShutdownSignal {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Keyboard => "Ctrl+C",
            Self::ParentCancelled => "cancelled",
        }
    }

    /// Whether someone at the terminal or the OS asked for the shutdown
    pub fn is_operator(&self) -> bool {
        !matches!(self, Self::ParentCancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownRequest {
    pub signal: ShutdownSignal,
    /// 1 for the first request of the session
    pub occurrence: u32,
}

impl ShutdownRequest {
    pub fn is_first(&self) -> bool {
        self.occurrence == 1
    }
}

/// Producer side of the gate
#[derive(Clone, Debug)]
pub struct SignalSender {
    tx: mpsc::Sender<ShutdownSignal>,
}

impl SignalSender {
    /// Enqueue without blocking. A full buffer already holds an escalation,
    /// so dropping the extra request loses nothing.
    pub fn notify(&self, signal: ShutdownSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(err) => {
                debug!(signal = signal.label(), error = %err, "shutdown request not queued");
                false
            }
        }
    }

    pub async fn send(&self, signal: ShutdownSignal) -> bool {
        self.tx.send(signal).await.is_ok()
    }
}

/// Consumer side, owned by the session event loop
pub struct SignalGate {
    rx: mpsc::Receiver<ShutdownSignal>,
    parent: CancellationToken,
    parent_seen: bool,
    closed: bool,
    delivered: u32,
}

impl SignalGate {
    pub fn new(parent: CancellationToken) -> (Self, SignalSender) {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let gate = Self {
            rx,
            parent,
            parent_seen: false,
            closed: false,
            delivered: 0,
        };
        (gate, SignalSender { tx })
    }

    /// Next shutdown request. Parent cancellation is delivered once, like a
    /// signal. Returns `None` when no source can produce anything anymore.
    pub async fn recv(&mut self) -> Option<ShutdownRequest> {
        let signal = loop {
            tokio::select! {
                biased;
                received = self.rx.recv(), if !self.closed => match received {
                    Some(signal) => break signal,
                    None => self.closed = true,
                },
                _ = self.parent.cancelled(), if !self.parent_seen => {
                    self.parent_seen = true;
                    break ShutdownSignal::ParentCancelled;
                }
                else => return None,
            }
        };
        self.delivered += 1;
        Some(ShutdownRequest {
            signal,
            occurrence: self.delivered,
        })
    }
}

/// Forward SIGINT/SIGTERM (Ctrl+C off unix) into the gate until it is dropped.
pub fn spawn_os_listener(sender: SignalSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut sigint, mut sigterm) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                    (Err(err), _) | (_, Err(err)) => {
                        warn!(error = %err, "failed to install signal handlers");
                        return;
                    }
                };
            loop {
                let signal = tokio::select! {
                    Some(()) = sigint.recv() => ShutdownSignal::Interrupt,
                    Some(()) = sigterm.recv() => ShutdownSignal::Terminate,
                    else => break,
                };
                debug!(signal = signal.label(), "received signal");
                if !sender.send(signal).await {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !sender.send(ShutdownSignal::Interrupt).await {
                    break;
                }
            }
        }
    })
}
