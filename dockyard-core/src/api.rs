//! Contracts consumed by the session controller.
//!
//! The backend owns container lifecycle and file watching; the printer owns
//! log output and the cascade/exit-code policy. The session only starts,
//! cancels and awaits them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::project::Project;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// Suppress build progress output
    pub quiet: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub services: Vec<String>,
    /// `None` skips building images
    pub build: Option<BuildOptions>,
    pub remove_orphans: bool,
}

#[derive(Clone, Debug, Default)]
pub struct StartOptions {
    pub services: Vec<String>,
    /// Services whose output is attached; `None` means detached
    pub attach: Option<Vec<String>>,
    pub cascade_stop: bool,
    pub exit_code_from: Option<String>,
    /// Start the watch loop together with the services
    pub watch: bool,
}

#[derive(Clone, Debug, Default)]
pub struct UpOptions {
    pub create: CreateOptions,
    pub start: StartOptions,
}

impl UpOptions {
    /// Watch options derived from an up invocation: quiet builds, logs to the attached services
    pub fn watch_options(&self) -> WatchOptions {
        let mut build = self.create.build.clone().unwrap_or_default();
        build.quiet = true;
        WatchOptions {
            build,
            log_to: self.start.attach.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StopOptions {
    pub services: Vec<String>,
    /// Overrides each service's configured stop grace period
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default)]
pub struct KillOptions {
    pub services: Vec<String>,
    pub signal: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct WatchOptions {
    pub build: BuildOptions,
    pub log_to: Option<Vec<String>>,
}

/// Which output stream a log line came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Events emitted by the backend while a start call is attached
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerEvent {
    Log {
        service: String,
        container: String,
        stream: LogStream,
        line: String,
    },
    Exited {
        service: String,
        container: String,
        exit_code: i32,
    },
}

impl ContainerEvent {
    pub fn service(&self) -> &str {
        match self {
            Self::Log { service, .. } | Self::Exited { service, .. } => service,
        }
    }
}

pub type EventListener = Arc<dyn Fn(ContainerEvent) + Send + Sync>;

/// The orchestration backend.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self, project: &Project, options: &CreateOptions) -> Result<()>;

    /// Start services. With a listener, keep streaming their events until the
    /// attached containers are gone or `cancel` fires.
    async fn start(
        &self,
        project: &Project,
        options: &StartOptions,
        listener: Option<EventListener>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Graceful stop, honoring per-service stop timeouts
    async fn stop(&self, project: &Project, options: &StopOptions) -> Result<()>;

    /// Immediate kill, no grace period
    async fn kill(&self, project: &Project, options: &KillOptions) -> Result<()>;

    /// Run the watch/rebuild loop until `cancel` fires or it fails
    async fn watch(
        &self,
        project: &Project,
        services: &[String],
        options: &WatchOptions,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Invoked by the printer when a container exit cascades to the whole group
pub type AbortHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// What the printer reports when its run loop ends
#[derive(Debug, Default)]
pub struct PrinterOutcome {
    pub exit_code: i32,
    pub error: Option<Error>,
}

#[async_trait]
pub trait LogPrinter: Send + Sync {
    /// Print events until `stop` is called or a cascade stop completes
    async fn run(
        &self,
        cascade_stop: bool,
        exit_code_from: Option<String>,
        on_abort: AbortHook,
    ) -> PrinterOutcome;

    fn handle_event(&self, event: ContainerEvent);

    /// Stop emitting output; events are still consumed
    fn cancel(&self);

    /// No more events will arrive
    fn stop(&self);
}

/// Adapt a printer into a backend event listener
pub fn printer_listener(printer: Arc<dyn LogPrinter>) -> EventListener {
    Arc::new(move |event| printer.handle_event(event))
}
