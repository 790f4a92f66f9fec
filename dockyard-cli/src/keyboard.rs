//! Raw-mode keyboard reader for the navigation menu.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tracing::debug;

use dockyard_core::controller::MenuKey;
use dockyard_core::session::KeyboardInput;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Buffered key presses between the reader thread and the session loop
pub const KEY_BUFFER: usize = 16;

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            debug!(error = %err, "failed to leave raw mode");
        }
    }
}

/// Owns the reader thread; dropping it stops the thread and restores the terminal
pub struct KeyboardReader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeyboardReader {
    /// Put the terminal in raw mode and forward key presses to `tx`.
    ///
    /// The reader leaves raw mode after forwarding Ctrl+C, so a second
    /// Ctrl+C is delivered by the terminal as SIGINT.
    pub fn spawn(tx: mpsc::Sender<KeyboardInput>) -> io::Result<Self> {
        let guard = RawModeGuard::enable()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("dockyard-keyboard".into())
            .spawn(move || {
                let _guard = guard;
                read_keys(&tx, &thread_stop);
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for KeyboardReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_keys(tx: &mpsc::Sender<KeyboardInput>, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        match event::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        }
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                let key = MenuKey::from(key);
                if tx.blocking_send(Ok(key)).is_err() {
                    return;
                }
                if key == MenuKey::CtrlC {
                    debug!("keyboard reader done after Ctrl+C");
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        }
    }
}
