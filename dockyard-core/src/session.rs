//! The `up` control loop.
//!
//! A session creates and starts the project, then (when attached) runs the
//! log printer, the optional watch loop and the start call as workers. A
//! single event loop multiplexes worker reports, shutdown requests,
//! controller results and key presses. Only that loop transitions the
//! [`ShutdownState`], so graceful teardown starts at most once.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{
    AbortHook, Backend, KillOptions, LogPrinter, PrinterOutcome, StopOptions, UpOptions,
    printer_listener,
};
use crate::controller::{ControllerEvent, ControllerHandle, MenuKey, WatchContext, write_line};
use crate::error::{Error, Result};
use crate::project::Project;
use crate::shutdown::{ShutdownState, TeardownAction};
use crate::signal::{ShutdownRequest, SignalGate};

pub const GRACEFUL_NOTICE: &str = "Gracefully stopping... (press Ctrl+C again to force)";
pub const ABORT_NOTICE: &str = "Aborting on container exit...";

/// A key press or a failure of the keyboard reader
pub type KeyboardInput = io::Result<MenuKey>;

/// The interactive footer and its input streams
pub struct Menu {
    pub controller: ControllerHandle,
    pub events: mpsc::UnboundedReceiver<ControllerEvent>,
    pub keys: mpsc::Receiver<KeyboardInput>,
}

/// What an attached session needs besides the backend
pub struct Attachment {
    pub printer: Arc<dyn LogPrinter>,
    pub menu: Option<Menu>,
    pub signals: SignalGate,
}

pub struct SessionOrchestrator {
    backend: Arc<dyn Backend>,
}

impl SessionOrchestrator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Create and start the project. With `options.start.attach` set, stay
    /// attached until every container exits or a shutdown completes.
    ///
    /// A nonzero exit code from the printer comes back as
    /// [`Error::ExitCode`]; callers exit with that code.
    pub async fn up(
        &self,
        parent: CancellationToken,
        project: Arc<Project>,
        options: UpOptions,
        attachment: Option<Attachment>,
    ) -> Result<()> {
        if options.start.watch && !project.is_watch_configured(&options.start.services) {
            return Err(Error::Config(
                "none of the selected services is configured for watch, consider setting a 'develop' section".into(),
            ));
        }

        info!(
            project = %project.name,
            backend = self.backend.name(),
            services = ?options.create.services,
            "creating services"
        );
        self.backend.create(&project, &options.create).await?;

        if options.start.attach.is_none() {
            info!(project = %project.name, "starting detached");
            return self
                .backend
                .start(&project, &options.start, None, parent.child_token())
                .await;
        }

        let Some(attachment) = attachment else {
            return Err(Error::Config("attached start requires a log printer".into()));
        };
        Session::new(self.backend.clone(), &parent, project, options, attachment)
            .run()
            .await
    }
}

enum WorkerReport {
    Printer(PrinterOutcome),
    Watch(Result<()>),
    Start(Result<()>),
    Stop(Result<()>),
}

struct Session {
    backend: Arc<dyn Backend>,
    project: Arc<Project>,
    options: UpOptions,
    printer: Arc<dyn LogPrinter>,
    controller: Option<ControllerHandle>,
    controller_events: Option<mpsc::UnboundedReceiver<ControllerEvent>>,
    keys: Option<mpsc::Receiver<KeyboardInput>>,
    signals: SignalGate,
    signals_open: bool,
    state: ShutdownState,
    token: CancellationToken,
    reports_tx: mpsc::UnboundedSender<WorkerReport>,
    reports_rx: mpsc::UnboundedReceiver<WorkerReport>,
    outstanding: usize,
    watch_generation: Option<u64>,
    errors: Vec<Error>,
    exit_code: i32,
}

impl Session {
    fn new(
        backend: Arc<dyn Backend>,
        parent: &CancellationToken,
        project: Arc<Project>,
        options: UpOptions,
        attachment: Attachment,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (controller, controller_events, keys) = match attachment.menu {
            Some(menu) => (Some(menu.controller), Some(menu.events), Some(menu.keys)),
            None => (None, None, None),
        };
        Self {
            backend,
            project,
            options,
            printer: attachment.printer,
            controller,
            controller_events,
            keys,
            signals: attachment.signals,
            signals_open: true,
            state: ShutdownState::default(),
            token: parent.child_token(),
            reports_tx,
            reports_rx,
            outstanding: 0,
            watch_generation: None,
            errors: Vec::new(),
            exit_code: 0,
        }
    }

    async fn run(mut self) -> Result<()> {
        if let Some(controller) = &self.controller {
            controller.set_watch_context(WatchContext {
                backend: self.backend.clone(),
                project: self.project.clone(),
                services: self.options.start.services.clone(),
                options: self.options.watch_options(),
                parent: self.token.clone(),
            });
            controller.begin();
        }

        self.spawn_printer();
        if self.options.start.watch {
            self.spawn_watch();
        }
        self.spawn_start();

        if let Some(result) = self.event_loop().await {
            // Forced: the graceful stop may still be running, leave it behind
            self.printer.stop();
            self.token.cancel();
            if let Some(controller) = &self.controller {
                controller.release();
                controller.emit_metrics();
            }
            return result;
        }

        self.printer.stop();
        self.token.cancel();
        if let Some(controller) = &self.controller {
            controller.release();
        }
        self.drain().await;
        if let Some(controller) = &self.controller {
            controller.emit_metrics();
        }
        self.into_result()
    }

    fn spawn_worker<F>(&mut self, worker: F)
    where
        F: Future<Output = WorkerReport> + Send + 'static,
    {
        self.outstanding += 1;
        let tx = self.reports_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(worker.await);
        });
    }

    fn spawn_printer(&mut self) {
        let printer = self.printer.clone();
        let cascade_stop = self.options.start.cascade_stop;
        let exit_code_from = self.options.start.exit_code_from.clone();
        let on_abort = self.abort_hook();
        self.spawn_worker(async move {
            WorkerReport::Printer(printer.run(cascade_stop, exit_code_from, on_abort).await)
        });
    }

    fn abort_hook(&self) -> AbortHook {
        let backend = self.backend.clone();
        let project = self.project.clone();
        let controller = self.controller.clone();
        let services = self.options.create.services.clone();
        Box::new(move || {
            Box::pin(async move {
                announce(controller.as_ref(), ABORT_NOTICE);
                let options = StopOptions {
                    services,
                    timeout: None,
                };
                backend.stop(&project, &options).await
            })
        })
    }

    fn spawn_watch(&mut self) {
        let token = self.token.child_token();
        if let Some(controller) = &self.controller {
            self.watch_generation = Some(controller.adopt_watch(token.clone()));
        }
        let backend = self.backend.clone();
        let project = self.project.clone();
        let services = self.options.start.services.clone();
        let options = self.options.watch_options();
        self.spawn_worker(async move {
            WorkerReport::Watch(backend.watch(&project, &services, &options, token).await)
        });
    }

    fn spawn_start(&mut self) {
        let backend = self.backend.clone();
        let project = self.project.clone();
        let options = self.options.start.clone();
        let listener = printer_listener(self.printer.clone());
        let token = self.token.clone();
        self.spawn_worker(async move {
            WorkerReport::Start(backend.start(&project, &options, Some(listener), token).await)
        });
    }

    /// Returns `Some` only when a forced shutdown ended the session early.
    async fn event_loop(&mut self) -> Option<Result<()>> {
        loop {
            tokio::select! {
                biased;
                Some(report) = self.reports_rx.recv() => {
                    self.outstanding -= 1;
                    if self.on_report(report) {
                        return None;
                    }
                }
                request = self.signals.recv(), if self.signals_open => match request {
                    Some(request) => {
                        if let Some(result) = self.on_shutdown(request).await {
                            return Some(result);
                        }
                    }
                    None => self.signals_open = false,
                },
                Some(event) = next_event(&mut self.controller_events) => {
                    if let Some(controller) = &self.controller {
                        controller.on_event(event);
                    }
                }
                input = next_key(&mut self.keys) => match input {
                    Some(Ok(key)) => {
                        if let Some(controller) = &self.controller {
                            let action = controller.handle_key_event(key);
                            debug!(?key, ?action, "key event");
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "keyboard reader failed");
                        self.errors.push(Error::Io(err));
                        self.keys = None;
                    }
                    None => self.keys = None,
                },
            }
        }
    }

    async fn on_shutdown(&mut self, request: ShutdownRequest) -> Option<Result<()>> {
        match self.state.on_shutdown_request(request.signal.is_operator()) {
            TeardownAction::BeginGraceful => {
                info!(signal = request.signal.label(), "stopping services");
                self.begin_graceful();
                None
            }
            TeardownAction::ForceKill => {
                warn!(signal = request.signal.label(), "forcing shutdown");
                let options = KillOptions {
                    services: self.options.create.services.clone(),
                    signal: None,
                };
                let result = self.backend.kill(&self.project, &options).await;
                self.state.on_teardown_complete();
                Some(result)
            }
            TeardownAction::Ignore => {
                debug!(
                    signal = request.signal.label(),
                    occurrence = request.occurrence,
                    "shutdown already in progress"
                );
                None
            }
        }
    }

    fn begin_graceful(&mut self) {
        self.printer.cancel();
        if let Some(controller) = &self.controller {
            controller.mute();
        }
        announce(self.controller.as_ref(), GRACEFUL_NOTICE);

        let backend = self.backend.clone();
        let project = self.project.clone();
        let options = StopOptions {
            services: self.options.create.services.clone(),
            timeout: None,
        };
        self.spawn_worker(async move { WorkerReport::Stop(backend.stop(&project, &options).await) });
    }

    /// Record a worker result. Returns true when the session is over.
    fn on_report(&mut self, report: WorkerReport) -> bool {
        match report {
            WorkerReport::Printer(outcome) => {
                debug!(exit_code = outcome.exit_code, "printer finished");
                if outcome.exit_code != 0 {
                    self.exit_code = outcome.exit_code;
                }
                self.errors.extend(outcome.error);
                false
            }
            WorkerReport::Watch(result) => {
                if let (Some(controller), Some(generation)) =
                    (&self.controller, self.watch_generation)
                {
                    controller.watch_ended(generation);
                }
                if let Err(err) = result {
                    if let Some(controller) = &self.controller {
                        controller.report_error("Watch", &err);
                    }
                    self.errors.push(err);
                }
                false
            }
            WorkerReport::Start(result) => {
                if !self.state.is_running() {
                    if let Err(err) = result {
                        debug!(error = %err, "start ended during teardown");
                    }
                    return false;
                }
                info!("attached containers exited");
                if let Err(err) = result {
                    self.errors.push(err);
                }
                self.printer.stop();
                true
            }
            WorkerReport::Stop(result) => {
                if let Err(err) = result {
                    self.errors.push(err);
                }
                self.state.on_teardown_complete();
                true
            }
        }
    }

    async fn drain(&mut self) {
        while self.outstanding > 0 {
            let Some(report) = self.reports_rx.recv().await else {
                break;
            };
            self.outstanding -= 1;
            self.on_report(report);
        }
    }

    fn into_result(self) -> Result<()> {
        let error = Error::join(self.errors);
        if self.exit_code != 0 {
            return Err(Error::ExitCode {
                code: self.exit_code,
                status: error.map(|err| err.to_string()).unwrap_or_default(),
            });
        }
        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn announce(controller: Option<&ControllerHandle>, message: &str) {
    match controller {
        Some(controller) => {
            let _ = controller.render_around(|out| write_line(out, message));
        }
        None => eprintln!("{message}"),
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<ControllerEvent>>,
) -> Option<ControllerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_key(keys: &mut Option<mpsc::Receiver<KeyboardInput>>) -> Option<KeyboardInput> {
    match keys {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::{CreateOptions, StartOptions};
    use crate::controller::InteractiveController;
    use crate::layout::strip_ansi;
    use crate::signal::{ShutdownSignal, SignalSender};
    use crate::testing::{Call, FixedViewport, MockBackend, MockPrinter, SharedBuffer};

    const PROJECT: &str = r#"
name: shop
services:
  api:
    image: api
    develop:
      watch:
        - path: ./src
          action: sync
          target: /app/src
  db:
    image: postgres
  cache:
    image: redis
"#;

    fn project() -> Arc<Project> {
        Arc::new(Project::from_yaml(PROJECT).unwrap())
    }

    fn attached_options(services: &[&str]) -> UpOptions {
        let services: Vec<String> = services.iter().map(|s| s.to_string()).collect();
        UpOptions {
            create: CreateOptions {
                services: services.clone(),
                ..CreateOptions::default()
            },
            start: StartOptions {
                services: services.clone(),
                attach: Some(services),
                ..StartOptions::default()
            },
        }
    }

    fn attachment(
        parent: &CancellationToken,
        printer: Arc<MockPrinter>,
    ) -> (Attachment, SignalSender) {
        let (signals, sender) = SignalGate::new(parent.clone());
        let attachment = Attachment {
            printer,
            menu: None,
            signals,
        };
        (attachment, sender)
    }

    async fn up(
        backend: Arc<MockBackend>,
        parent: CancellationToken,
        options: UpOptions,
        attachment: Option<Attachment>,
    ) -> Result<()> {
        let orchestrator = SessionOrchestrator::new(backend);
        tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.up(parent, project(), options, attachment),
        )
        .await
        .expect("session did not finish")
    }

    fn stops(backend: &MockBackend) -> Vec<Vec<String>> {
        backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Stop(services) => Some(services),
                _ => None,
            })
            .collect()
    }

    fn kills(backend: &MockBackend) -> usize {
        backend.count(|c| matches!(c, Call::Kill(_)))
    }

    #[tokio::test]
    async fn test_detached_up_never_stops() {
        let backend = Arc::new(MockBackend::new());
        let mut options = attached_options(&["api", "db"]);
        options.start.attach = None;

        up(backend.clone(), CancellationToken::new(), options, None)
            .await
            .unwrap();

        let names = vec!["api".to_string(), "db".to_string()];
        assert_eq!(
            backend.calls(),
            vec![Call::Create(names.clone()), Call::Start(names)]
        );
    }

    #[tokio::test]
    async fn test_attach_without_printer_is_rejected() {
        let backend = Arc::new(MockBackend::new());
        let err = up(
            backend,
            CancellationToken::new(),
            attached_options(&["api"]),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_interrupt_stops_session_services_once() {
        let backend = Arc::new(MockBackend::new());
        let printer = Arc::new(MockPrinter::default());
        let parent = CancellationToken::new();
        let (attachment, sender) = attachment(&parent, printer.clone());
        sender.notify(ShutdownSignal::Interrupt);

        up(
            backend.clone(),
            parent,
            attached_options(&["api", "db"]),
            Some(attachment),
        )
        .await
        .unwrap();

        assert_eq!(stops(&backend), vec![vec!["api".to_string(), "db".to_string()]]);
        assert_eq!(kills(&backend), 0);
        assert!(printer.was_cancelled());
        assert!(printer.was_stopped());
    }

    #[tokio::test]
    async fn test_second_signal_forces_kill_without_waiting() {
        let backend = Arc::new(MockBackend::new().hanging_stop());
        let parent = CancellationToken::new();
        let printer = Arc::new(MockPrinter::default());
        let (attachment, sender) = attachment(&parent, printer.clone());
        sender.notify(ShutdownSignal::Interrupt);
        sender.notify(ShutdownSignal::Terminate);

        up(
            backend.clone(),
            parent,
            attached_options(&["api"]),
            Some(attachment),
        )
        .await
        .unwrap();
        assert_eq!(kills(&backend), 1);
        assert!(printer.was_stopped());

        // The graceful stop was issued and is still hanging
        tokio::time::timeout(
            Duration::from_secs(5),
            backend.wait_for(|calls| calls.iter().any(|c| matches!(c, Call::Stop(_)))),
        )
        .await
        .unwrap();
        assert_eq!(stops(&backend).len(), 1);
    }

    #[tokio::test]
    async fn test_signal_after_completed_stop_never_kills() {
        let backend = Arc::new(MockBackend::new());
        let parent = CancellationToken::new();
        let (attachment, sender) = attachment(&parent, Arc::new(MockPrinter::default()));
        sender.notify(ShutdownSignal::Interrupt);

        up(
            backend.clone(),
            parent,
            attached_options(&["api"]),
            Some(attachment),
        )
        .await
        .unwrap();
        // Session is gone; a late signal has nobody to escalate
        sender.notify(ShutdownSignal::Interrupt);

        assert_eq!(stops(&backend).len(), 1);
        assert_eq!(kills(&backend), 0);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_once() {
        let backend = Arc::new(MockBackend::new());
        let parent = CancellationToken::new();
        let (attachment, _sender) = attachment(&parent, Arc::new(MockPrinter::default()));
        parent.cancel();

        up(
            backend.clone(),
            parent,
            attached_options(&["db"]),
            Some(attachment),
        )
        .await
        .unwrap();

        assert_eq!(stops(&backend), vec![vec!["db".to_string()]]);
        assert_eq!(kills(&backend), 0);
    }

    #[tokio::test]
    async fn test_parent_cancellation_during_stop_does_not_kill() {
        let backend = Arc::new(MockBackend::new().hanging_stop());
        let parent = CancellationToken::new();
        let (attachment, sender) = attachment(&parent, Arc::new(MockPrinter::default()));
        sender.notify(ShutdownSignal::Interrupt);

        let session = tokio::spawn(up(
            backend.clone(),
            parent.clone(),
            attached_options(&["api"]),
            Some(attachment),
        ));
        tokio::time::timeout(
            Duration::from_secs(5),
            backend.wait_for(|calls| calls.iter().any(|c| matches!(c, Call::Stop(_)))),
        )
        .await
        .unwrap();

        parent.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(kills(&backend), 0);
        assert!(!session.is_finished());

        // Only the operator escalates
        sender.notify(ShutdownSignal::Interrupt);
        session.await.unwrap().unwrap();
        assert_eq!(kills(&backend), 1);
    }

    #[tokio::test]
    async fn test_stop_failure_is_reported() {
        let backend = Arc::new(MockBackend::new().failing_stop("daemon unreachable"));
        let parent = CancellationToken::new();
        let (attachment, sender) = attachment(&parent, Arc::new(MockPrinter::default()));
        sender.notify(ShutdownSignal::Interrupt);

        let err = up(
            backend,
            parent,
            attached_options(&["api"]),
            Some(attachment),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Backend { operation: "stop", .. }));
        assert_eq!(err.to_string(), "stop failed: daemon unreachable");
    }

    #[tokio::test]
    async fn test_stop_failure_joins_printer_exit_code() {
        let backend = Arc::new(MockBackend::new().failing_stop("daemon unreachable"));
        let parent = CancellationToken::new();
        let (attachment, sender) = attachment(&parent, Arc::new(MockPrinter::with_exit_code(2)));
        sender.notify(ShutdownSignal::Interrupt);

        let err = up(
            backend,
            parent,
            attached_options(&["api"]),
            Some(attachment),
        )
        .await
        .unwrap_err();

        match err {
            Error::ExitCode { code, status } => {
                assert_eq!(code, 2);
                assert_eq!(status, "stop failed: daemon unreachable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_containers_exiting_ends_session_without_teardown() {
        let backend = Arc::new(MockBackend::new().exiting_start());
        let parent = CancellationToken::new();
        let printer = Arc::new(MockPrinter::default());
        let (attachment, _sender) = attachment(&parent, printer.clone());

        up(
            backend.clone(),
            parent,
            attached_options(&["api"]),
            Some(attachment),
        )
        .await
        .unwrap();

        assert!(stops(&backend).is_empty());
        assert!(printer.was_stopped());
        assert!(!printer.was_cancelled());
    }

    #[tokio::test]
    async fn test_printer_exit_code_wins_over_start_error() {
        let backend = Arc::new(MockBackend::new().exiting_start().failing_start("no such image"));
        let parent = CancellationToken::new();
        let (attachment, _sender) = attachment(&parent, Arc::new(MockPrinter::with_exit_code(3)));

        let err = up(
            backend,
            parent,
            attached_options(&["api"]),
            Some(attachment),
        )
        .await
        .unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert!(matches!(err, Error::ExitCode { code: 3, .. }));
        assert_eq!(err.to_string(), "start failed: no such image");
    }

    #[tokio::test]
    async fn test_start_error_after_teardown_is_ignored() {
        let backend = Arc::new(MockBackend::new().failing_start("context canceled"));
        let parent = CancellationToken::new();
        let (attachment, sender) = attachment(&parent, Arc::new(MockPrinter::default()));
        sender.notify(ShutdownSignal::Interrupt);

        up(
            backend,
            parent,
            attached_options(&["api"]),
            Some(attachment),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_watch_without_configuration_is_rejected_before_create() {
        let backend = Arc::new(MockBackend::new());
        let mut options = attached_options(&["db"]);
        options.start.watch = true;

        let err = up(backend.clone(), CancellationToken::new(), options, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(backend.calls().is_empty());
    }

    struct MenuFixture {
        attachment: Attachment,
        controller: ControllerHandle,
        keys: mpsc::Sender<KeyboardInput>,
        screen: SharedBuffer,
    }

    fn menu_attachment(parent: &CancellationToken, printer: Arc<MockPrinter>) -> MenuFixture {
        let screen = SharedBuffer::default();
        let (signals, sender) = SignalGate::new(parent.clone());
        let (controller, events) = InteractiveController::new(
            Box::new(screen.clone()),
            Box::new(FixedViewport(Some((120, 30)))),
            sender,
            "shop",
        );
        let controller = ControllerHandle::new(controller);
        let (keys_tx, keys_rx) = mpsc::channel(8);
        let attachment = Attachment {
            printer,
            menu: Some(Menu {
                controller: controller.clone(),
                events,
                keys: keys_rx,
            }),
            signals,
        };
        MenuFixture {
            attachment,
            controller,
            keys: keys_tx,
            screen,
        }
    }

    #[tokio::test]
    async fn test_keyboard_terminate_mutes_footer_and_stops() {
        let backend = Arc::new(MockBackend::new());
        let parent = CancellationToken::new();
        let printer = Arc::new(MockPrinter::default());
        let fx = menu_attachment(&parent, printer.clone());
        fx.keys.send(Ok(MenuKey::CtrlC)).await.unwrap();

        up(
            backend.clone(),
            parent,
            attached_options(&["api", "db"]),
            Some(fx.attachment),
        )
        .await
        .unwrap();

        assert_eq!(stops(&backend).len(), 1);
        assert_eq!(kills(&backend), 0);
        assert!(fx.controller.is_muted());
        assert!(printer.was_cancelled());

        let screen = strip_ansi(&fx.screen.contents());
        let notice_at = screen.find(GRACEFUL_NOTICE).unwrap();
        assert!(!screen[notice_at..].contains("Enable Watch"));
    }

    #[tokio::test]
    async fn test_watch_flag_hands_loop_to_controller() {
        let backend = Arc::new(MockBackend::new());
        let parent = CancellationToken::new();
        let fx = menu_attachment(&parent, Arc::new(MockPrinter::default()));
        let mut options = attached_options(&["api"]);
        options.start.watch = true;

        // Toggling off stops the loop started with the session
        fx.keys.send(Ok(MenuKey::Char('w'))).await.unwrap();
        fx.keys.send(Ok(MenuKey::CtrlC)).await.unwrap();

        up(backend.clone(), parent, options, Some(fx.attachment))
            .await
            .unwrap();

        assert_eq!(backend.count(|c| matches!(c, Call::Watch(_))), 1);
        assert_eq!(backend.count(|c| *c == Call::WatchEnded), 1);
        assert!(!fx.controller.is_watch_enabled());
    }

    #[tokio::test]
    async fn test_keyboard_failure_is_reported() {
        let backend = Arc::new(MockBackend::new().exiting_start());
        let parent = CancellationToken::new();
        let fx = menu_attachment(&parent, Arc::new(MockPrinter::default()));
        fx.keys
            .send(Err(io::Error::new(io::ErrorKind::BrokenPipe, "tty gone")))
            .await
            .unwrap();

        let err = up(
            backend,
            parent,
            attached_options(&["api"]),
            Some(fx.attachment),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
    }
}
