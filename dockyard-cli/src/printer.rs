//! Prints container output as `service | line`.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dockyard_core::api::{AbortHook, ContainerEvent, LogPrinter, LogStream, PrinterOutcome};
use dockyard_core::controller::{ControllerHandle, write_line};
use dockyard_core::error::Error;
use dockyard_core::style;

/// Where printed lines go
#[derive(Clone)]
pub enum Console {
    /// Through the interactive footer
    Footer(ControllerHandle),
    Plain,
}

impl Console {
    fn print(&self, line: &str) {
        match self {
            Self::Footer(controller) => {
                if let Err(err) = controller.render_around(|out| write_line(out, line)) {
                    debug!(error = %err, "failed to print log line");
                }
            }
            Self::Plain => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{line}");
            }
        }
    }
}

enum Message {
    Event(ContainerEvent),
    Stop,
}

pub struct ConsolePrinter {
    console: Console,
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    muted: AtomicBool,
    colors: BTreeMap<String, usize>,
    width: usize,
}

impl ConsolePrinter {
    pub fn new(console: Console, services: &[String]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let colors = services
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let width = services.iter().map(String::len).max().unwrap_or(0);
        Self {
            console,
            tx,
            rx: Mutex::new(Some(rx)),
            muted: AtomicBool::new(false),
            colors,
            width,
        }
    }

    fn prefix(&self, service: &str) -> String {
        let index = self.colors.get(service).copied().unwrap_or(self.colors.len());
        style::service_prefix(service, index, self.width)
    }

    fn emit(&self, line: &str) {
        if !self.muted.load(Ordering::SeqCst) {
            self.console.print(line);
        }
    }
}

/// Exit code bookkeeping for `--exit-code-from` and `--abort-on-container-exit`
#[derive(Debug, Default)]
struct ExitPolicy {
    cascade_stop: bool,
    exit_code_from: Option<String>,
    exit_code: i32,
    aborting: bool,
}

impl ExitPolicy {
    /// Returns true when this exit must stop the whole group
    fn on_exit(&mut self, service: &str, exit_code: i32) -> bool {
        if !self.cascade_stop {
            return false;
        }
        let source = self
            .exit_code_from
            .get_or_insert_with(|| service.to_string());
        if source == service {
            self.exit_code = exit_code;
        }
        !std::mem::replace(&mut self.aborting, true)
    }
}

#[async_trait]
impl LogPrinter for ConsolePrinter {
    async fn run(
        &self,
        cascade_stop: bool,
        exit_code_from: Option<String>,
        on_abort: AbortHook,
    ) -> PrinterOutcome {
        let Some(mut rx) = self.rx.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            warn!("printer is already running");
            return PrinterOutcome::default();
        };

        let mut policy = ExitPolicy {
            cascade_stop: cascade_stop || exit_code_from.is_some(),
            exit_code_from,
            ..ExitPolicy::default()
        };
        let mut on_abort = Some(on_abort);
        let mut error: Option<Error> = None;

        while let Some(message) = rx.recv().await {
            match message {
                Message::Stop => break,
                Message::Event(ContainerEvent::Log {
                    service,
                    stream: LogStream::System,
                    line,
                    ..
                }) => {
                    self.emit(&format!("{} {}", self.prefix(&service), style::nav(&line)));
                }
                Message::Event(ContainerEvent::Log { service, line, .. }) => {
                    self.emit(&format!("{} {}", self.prefix(&service), line));
                }
                Message::Event(ContainerEvent::Exited {
                    service,
                    container,
                    exit_code,
                }) => {
                    if !policy.aborting {
                        self.emit(&format!("{container} exited with code {exit_code}"));
                    }
                    if policy.on_exit(&service, exit_code) {
                        if let Some(abort) = on_abort.take() {
                            if let Err(err) = abort().await {
                                error = Some(err);
                            }
                        }
                    }
                }
            }
        }

        PrinterOutcome {
            exit_code: policy.exit_code,
            error,
        }
    }

    fn handle_event(&self, event: ContainerEvent) {
        let _ = self.tx.send(Message::Event(event));
    }

    fn cancel(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn exited(service: &str, exit_code: i32) -> ContainerEvent {
        ContainerEvent::Exited {
            service: service.into(),
            container: format!("shop-{service}-1"),
            exit_code,
        }
    }

    fn counting_hook(calls: Arc<AtomicUsize>) -> AbortHook {
        Box::new(move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[test]
    fn test_policy_without_cascade_keeps_zero() {
        let mut policy = ExitPolicy::default();
        assert!(!policy.on_exit("api", 3));
        assert_eq!(policy.exit_code, 0);
    }

    #[test]
    fn test_policy_first_exit_wins_when_cascading() {
        let mut policy = ExitPolicy {
            cascade_stop: true,
            ..ExitPolicy::default()
        };
        assert!(policy.on_exit("api", 2));
        assert!(!policy.on_exit("db", 0));
        assert_eq!(policy.exit_code, 2);
    }

    #[test]
    fn test_policy_exit_code_from_named_service() {
        let mut policy = ExitPolicy {
            cascade_stop: true,
            exit_code_from: Some("tests".into()),
            ..ExitPolicy::default()
        };
        assert!(policy.on_exit("db", 1));
        policy.on_exit("tests", 4);
        assert_eq!(policy.exit_code, 4);
    }

    #[tokio::test]
    async fn test_cascade_aborts_once_and_reports_code() {
        let printer = ConsolePrinter::new(Console::Plain, &["api".into(), "db".into()]);
        printer.cancel();
        let calls = Arc::new(AtomicUsize::new(0));

        printer.handle_event(exited("api", 5));
        printer.handle_event(exited("db", 0));
        printer.stop();

        let outcome = printer.run(true, None, counting_hook(calls.clone())).await;
        assert_eq!(outcome.exit_code, 5);
        assert!(outcome.error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_failure_is_reported() {
        let printer = ConsolePrinter::new(Console::Plain, &["api".into()]);
        printer.cancel();
        printer.handle_event(exited("api", 1));
        printer.stop();

        let hook: AbortHook =
            Box::new(|| Box::pin(async { Err(Error::backend("stop", "daemon gone")) }));
        let outcome = printer.run(true, None, hook).await;
        assert!(matches!(outcome.error, Some(Error::Backend { operation: "stop", .. })));
    }
}
