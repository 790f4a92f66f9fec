//! Test doubles shared by the module tests.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::api::{
    AbortHook, Backend, ContainerEvent, CreateOptions, EventListener, KillOptions, LogPrinter,
    PrinterOutcome, StartOptions, StopOptions, WatchOptions,
};
use crate::controller::Viewport;
use crate::error::{Error, Result};
use crate::project::Project;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create(Vec<String>),
    Start(Vec<String>),
    Stop(Vec<String>),
    Kill(Vec<String>),
    Watch(Vec<String>),
    WatchEnded,
}

/// Backend that records every call.
///
/// Attached `start` calls stay up until the session token is cancelled or
/// the containers go away through `stop`/`kill`.
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    changed: Notify,
    containers_down: CancellationToken,
    stop_hangs: bool,
    start_exits: bool,
    start_error: Option<String>,
    stop_error: Option<String>,
    watch_error: Option<String>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `stop` never returns
    pub fn hanging_stop(mut self) -> Self {
        self.stop_hangs = true;
        self
    }

    /// Attached containers exit right after starting
    pub fn exiting_start(mut self) -> Self {
        self.start_exits = true;
        self
    }

    pub fn failing_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    /// `stop` takes the containers down but reports an error
    pub fn failing_stop(mut self, message: &str) -> Self {
        self.stop_error = Some(message.to_string());
        self
    }

    pub fn failing_watch(mut self, message: &str) -> Self {
        self.watch_error = Some(message.to_string());
        self
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        self.changed.notify_waiters();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub async fn wait_for(&self, pred: impl Fn(&[Call]) -> bool) {
        loop {
            let notified = self.changed.notified();
            if pred(&self.calls()) {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create(&self, _project: &Project, options: &CreateOptions) -> Result<()> {
        self.record(Call::Create(options.services.clone()));
        Ok(())
    }

    async fn start(
        &self,
        _project: &Project,
        options: &StartOptions,
        listener: Option<EventListener>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.record(Call::Start(options.services.clone()));
        let start_result = match &self.start_error {
            Some(message) => Err(Error::backend("start", message.clone())),
            None => Ok(()),
        };
        if listener.is_none() || self.start_exits {
            return start_result;
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::backend("start", "context canceled")),
            _ = self.containers_down.cancelled() => start_result,
        }
    }

    async fn stop(&self, _project: &Project, options: &StopOptions) -> Result<()> {
        self.record(Call::Stop(options.services.clone()));
        if self.stop_hangs {
            std::future::pending::<()>().await;
        }
        self.containers_down.cancel();
        match &self.stop_error {
            Some(message) => Err(Error::backend("stop", message.clone())),
            None => Ok(()),
        }
    }

    async fn kill(&self, _project: &Project, options: &KillOptions) -> Result<()> {
        self.record(Call::Kill(options.services.clone()));
        self.containers_down.cancel();
        Ok(())
    }

    async fn watch(
        &self,
        _project: &Project,
        services: &[String],
        _options: &WatchOptions,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.record(Call::Watch(services.to_vec()));
        if let Some(message) = &self.watch_error {
            return Err(Error::backend("watch", message.clone()));
        }
        cancel.cancelled().await;
        self.record(Call::WatchEnded);
        Ok(())
    }
}

/// Printer whose run loop lasts until `stop`
#[derive(Default)]
pub struct MockPrinter {
    exit_code: i32,
    stopped: CancellationToken,
    cancelled: AtomicBool,
    events: Mutex<Vec<ContainerEvent>>,
}

impl MockPrinter {
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

#[async_trait]
impl LogPrinter for MockPrinter {
    async fn run(
        &self,
        _cascade_stop: bool,
        _exit_code_from: Option<String>,
        _on_abort: AbortHook,
    ) -> PrinterOutcome {
        self.stopped.cancelled().await;
        PrinterOutcome {
            exit_code: self.exit_code,
            error: None,
        }
    }

    fn handle_event(&self, event: ContainerEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.cancel();
    }
}

/// In-memory terminal
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(|e| e.into_inner())).into_owned()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Output written after byte offset `start`
    pub fn since(&self, start: usize) -> String {
        let bytes = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes[start..]).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct FixedViewport(pub Option<(u16, u16)>);

impl Viewport for FixedViewport {
    fn size(&self) -> Option<(u16, u16)> {
        self.0
    }
}
