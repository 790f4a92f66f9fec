//! Interactive footer: navigation menu, error banner and key dispatch.
//!
//! The controller owns the bottom rows of the terminal while a session is
//! attached. Log output shares the same terminal, so every writer goes
//! through [`ControllerHandle::render_around`], which clears the footer,
//! lets the caller print, and draws the footer again underneath.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crossterm::cursor::{
    Hide, MoveDown, MoveTo, MoveToColumn, MoveUp, RestorePosition, SavePosition, Show,
};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::{QueueableCommand, queue};
use crossterm::terminal::{Clear, ClearType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{Backend, WatchOptions};
use crate::banner::ErrorBanner;
use crate::error::{Error, Result};
use crate::layout::rows_occupied;
use crate::metrics::{KeyboardMetrics, MenuCommand};
use crate::project::Project;
use crate::signal::{ShutdownSignal, SignalSender};
use crate::style;

pub const WATCH_DOCS_URL: &str = "https://docs.docker.com/compose/file-watch/";

/// Dashboard deep link for a project
pub fn desktop_url(project_name: &str) -> String {
    format!("docker-desktop://dashboard/apps/{project_name}")
}

/// Terminal dimensions as `(width, height)`; `None` when unknown
pub trait Viewport: Send {
    fn size(&self) -> Option<(u16, u16)>;
}

pub struct TerminalViewport;

impl Viewport for TerminalViewport {
    fn size(&self) -> Option<(u16, u16)> {
        match crossterm::terminal::size() {
            Ok((width, height)) if width > 0 && height > 0 => Some((width, height)),
            Ok(_) => None,
            Err(err) => {
                debug!(error = %err, "terminal size unavailable");
                None
            }
        }
    }
}

/// Opens URLs with the platform handler
pub trait Launcher: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn open(&self, url: &str) -> io::Result<()> {
        #[cfg(target_os = "macos")]
        let mut cmd = std::process::Command::new("open");
        #[cfg(target_os = "windows")]
        let mut cmd = {
            let mut cmd = std::process::Command::new("cmd");
            cmd.args(["/C", "start", ""]);
            cmd
        };
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let mut cmd = std::process::Command::new("xdg-open");

        let status = cmd
            .arg(url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("launcher exited with {status}")))
        }
    }
}

/// Keys the menu understands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuKey {
    Char(char),
    Enter,
    CtrlC,
    CtrlL,
    Other,
}

impl From<KeyEvent> for MenuKey {
    fn from(event: KeyEvent) -> Self {
        if event.modifiers.contains(KeyModifiers::CONTROL) {
            return match event.code {
                KeyCode::Char('c') => Self::CtrlC,
                KeyCode::Char('l') => Self::CtrlL,
                _ => Self::Other,
            };
        }
        match event.code {
            KeyCode::Enter => Self::Enter,
            KeyCode::Char(c) => Self::Char(c),
            _ => Self::Other,
        }
    }
}

/// What a key press did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    ToggleWatch,
    OpenView,
    Redraw,
    ClearScreen,
    Terminate,
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    Active,
    /// Teardown started; the footer is never drawn again
    Muted,
}

/// Watch on/off state. Enabled exactly when a cancel token is held.
#[derive(Debug, Default)]
pub struct WatchToggle {
    cancel: Option<CancellationToken>,
    generation: u64,
}

impl WatchToggle {
    pub fn is_enabled(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn enable(&mut self, token: CancellationToken) -> u64 {
        self.generation += 1;
        self.cancel = Some(token);
        self.generation
    }

    fn disable(&mut self) -> Option<CancellationToken> {
        self.cancel.take()
    }
}

/// Results of work the controller started in the background, delivered
/// back to the session loop.
#[derive(Debug)]
pub enum ControllerEvent {
    WatchFinished { generation: u64, result: Result<()> },
    ViewFailed(Error),
}

/// Everything needed to start a watch loop from the menu
#[derive(Clone)]
pub struct WatchContext {
    pub backend: Arc<dyn Backend>,
    pub project: Arc<Project>,
    pub services: Vec<String>,
    pub options: WatchOptions,
    pub parent: CancellationToken,
}

impl WatchContext {
    fn is_configured(&self) -> bool {
        self.project.is_watch_configured(&self.services)
    }
}

pub struct InteractiveController {
    out: Box<dyn Write + Send>,
    viewport: Box<dyn Viewport>,
    mode: DisplayMode,
    footer_drawn: bool,
    banner: Option<ErrorBanner>,
    watch: WatchToggle,
    watch_context: Option<WatchContext>,
    launcher: Option<Arc<dyn Launcher>>,
    project_name: String,
    shutdown: SignalSender,
    events: mpsc::UnboundedSender<ControllerEvent>,
    metrics: KeyboardMetrics,
}

impl InteractiveController {
    pub fn new(
        out: Box<dyn Write + Send>,
        viewport: Box<dyn Viewport>,
        shutdown: SignalSender,
        project_name: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            out,
            viewport,
            mode: DisplayMode::Active,
            footer_drawn: false,
            banner: None,
            watch: WatchToggle::default(),
            watch_context: None,
            launcher: None,
            project_name: project_name.into(),
            shutdown,
            events,
            metrics: KeyboardMetrics::new(false, false),
        };
        (controller, rx)
    }

    /// Enable the "View in Docker Desktop" entry
    pub fn with_gui(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self.reset_metrics();
        self
    }

    pub fn set_watch_context(&mut self, context: WatchContext) {
        self.watch_context = Some(context);
        self.reset_metrics();
    }

    fn reset_metrics(&mut self) {
        let watch_configured = self
            .watch_context
            .as_ref()
            .is_some_and(WatchContext::is_configured);
        self.metrics = KeyboardMetrics::new(self.gui_available(), watch_configured);
    }

    pub fn gui_available(&self) -> bool {
        self.launcher.is_some()
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn watch(&self) -> &WatchToggle {
        &self.watch
    }

    pub fn banner(&self) -> Option<&ErrorBanner> {
        self.banner.as_ref()
    }

    pub fn metrics(&self) -> &KeyboardMetrics {
        &self.metrics
    }

    pub fn record(&mut self, command: MenuCommand) {
        self.metrics.record(command);
    }

    /// Clear the footer, run `emit`, then draw the footer below its output.
    pub fn render_around<F>(&mut self, emit: F) -> io::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        self.render_at(Instant::now(), emit)
    }

    fn render_at<F>(&mut self, now: Instant, emit: F) -> io::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        if let Err(err) = self.clear_footer() {
            debug!(error = %err, "failed to clear footer");
        }
        let result = emit(&mut *self.out);
        if let Err(err) = self.draw_footer(now) {
            debug!(error = %err, "failed to draw footer");
        }
        if let Err(err) = self.out.flush() {
            debug!(error = %err, "failed to flush terminal");
        }
        result
    }

    /// Redraw without printing anything
    pub fn refresh(&mut self) {
        let _ = self.render_around(|_| Ok(()));
    }

    pub fn report_error(&mut self, source: &str, err: impl std::fmt::Display) {
        debug!(source, error = %err, "reporting error in footer");
        self.banner = Some(ErrorBanner::raise(source, err, Instant::now()));
        self.refresh();
    }

    /// Hide the cursor and draw the initial footer
    pub fn begin(&mut self) {
        let _ = queue!(self.out, Hide);
        self.refresh();
    }

    /// Remove the footer for good and give the cursor back
    pub fn release(&mut self) {
        if let Err(err) = self.clear_footer() {
            debug!(error = %err, "failed to clear footer");
        }
        self.mode = DisplayMode::Muted;
        let _ = queue!(self.out, Show);
        let _ = self.out.flush();
    }

    pub fn mute(&mut self) {
        if let Err(err) = self.clear_footer() {
            debug!(error = %err, "failed to clear footer");
        }
        self.mode = DisplayMode::Muted;
        let _ = self.out.flush();
    }

    /// Clear the footer so another program can take over the terminal
    pub fn suspend(&mut self) {
        if let Err(err) = self.clear_footer() {
            debug!(error = %err, "failed to clear footer");
        }
        let _ = queue!(self.out, Show);
        let _ = self.out.flush();
    }

    pub fn resume(&mut self) {
        if self.mode == DisplayMode::Active {
            let _ = queue!(self.out, Hide);
        }
        self.refresh();
    }

    pub fn handle_key_event(&mut self, key: MenuKey) -> KeyAction {
        if self.mode == DisplayMode::Muted {
            return KeyAction::Ignored;
        }
        match key {
            MenuKey::Char('w') => {
                self.toggle_watch();
                KeyAction::ToggleWatch
            }
            MenuKey::Char('v') => {
                self.open_external_view();
                KeyAction::OpenView
            }
            MenuKey::Enter => {
                self.refresh();
                KeyAction::Redraw
            }
            MenuKey::CtrlL => {
                self.clear_screen();
                KeyAction::ClearScreen
            }
            MenuKey::CtrlC => {
                self.terminate();
                KeyAction::Terminate
            }
            MenuKey::Char(_) | MenuKey::Other => KeyAction::Ignored,
        }
    }

    pub fn toggle_watch(&mut self) {
        let Some(context) = self
            .watch_context
            .as_ref()
            .filter(|context| context.is_configured())
            .cloned()
        else {
            let message = format!(
                "Watch is not yet configured. Learn more: {}",
                style::link(WATCH_DOCS_URL)
            );
            self.report_error("Watch", Error::Config(message));
            return;
        };

        self.metrics.record(MenuCommand::Watch);
        if let Some(cancel) = self.watch.disable() {
            info!("watch disabled");
            cancel.cancel();
        } else {
            let token = context.parent.child_token();
            let generation = self.watch.enable(token.clone());
            info!(generation, "watch enabled");
            let events = self.events.clone();
            tokio::spawn(async move {
                let result = context
                    .backend
                    .watch(&context.project, &context.services, &context.options, token)
                    .await;
                let _ = events.send(ControllerEvent::WatchFinished { generation, result });
            });
        }
        self.refresh();
    }

    /// Take over the cancel token of a watch loop started elsewhere
    pub fn adopt_watch(&mut self, token: CancellationToken) -> u64 {
        if let Some(previous) = self.watch.disable() {
            previous.cancel();
        }
        let generation = self.watch.enable(token);
        self.refresh();
        generation
    }

    /// A watch loop ended; if it is the current one, watch is now off
    pub fn watch_ended(&mut self, generation: u64) -> bool {
        if generation != self.watch.generation() || !self.watch.is_enabled() {
            return false;
        }
        self.watch.disable();
        self.refresh();
        true
    }

    pub fn open_external_view(&mut self) {
        let Some(launcher) = self.launcher.clone() else {
            return;
        };
        self.metrics.record(MenuCommand::Gui);
        let url = desktop_url(&self.project_name);
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(source) = launcher.open(&url) {
                let _ = events.send(ControllerEvent::ViewFailed(Error::OpenView { url, source }));
            }
        });
    }

    pub fn on_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::WatchFinished { generation, result } => {
                let current = self.watch_ended(generation);
                if let Err(err) = result {
                    if current {
                        self.report_error("Watch", err);
                    } else {
                        debug!(generation, error = %err, "stale watch loop failed");
                    }
                }
            }
            ControllerEvent::ViewFailed(err) => self.report_error("View", err),
        }
    }

    fn clear_screen(&mut self) {
        let height = self.viewport.size().map_or(0, |(_, height)| height);
        let _ = self.render_around(|out| {
            for _ in 0..height {
                out.write_all(b"\r\n")?;
            }
            out.queue(MoveTo(0, 0)).map(|_| ())
        });
    }

    fn terminate(&mut self) {
        if let Err(err) = self.clear_footer() {
            debug!(error = %err, "failed to clear footer");
        }
        let _ = queue!(self.out, Show);
        let _ = self.out.flush();
        self.mode = DisplayMode::Muted;
        if let Some(cancel) = self.watch.disable() {
            cancel.cancel();
        }
        self.shutdown.notify(ShutdownSignal::Keyboard);
    }

    fn menu_line(&self) -> String {
        let mut line = String::new();
        if self.gui_available() {
            line.push_str(&style::shortcut_key("V"));
            line.push_str(&style::nav(" View in Docker Desktop"));
            line.push_str(&style::nav("   "));
        }
        line.push_str(&style::shortcut_key("W"));
        if self.watch.is_enabled() {
            line.push_str(&style::nav(" Disable Watch"));
        } else {
            line.push_str(&style::nav(" Enable Watch"));
        }
        line
    }

    fn clear_footer(&mut self) -> io::Result<()> {
        if !self.footer_drawn {
            return Ok(());
        }
        self.footer_drawn = false;
        let Some((_, height)) = self.viewport.size() else {
            return Ok(());
        };
        queue!(self.out, MoveToColumn(0), SavePosition)?;
        for _ in 0..height {
            queue!(self.out, MoveDown(1), Clear(ClearType::CurrentLine))?;
        }
        queue!(self.out, RestorePosition)
    }

    fn draw_footer(&mut self, now: Instant) -> io::Result<()> {
        if self.mode == DisplayMode::Muted {
            return Ok(());
        }
        let Some((width, height)) = self.viewport.size() else {
            return Ok(());
        };

        let menu = self.menu_line();
        let banner = self
            .banner
            .as_ref()
            .filter(|banner| banner.is_visible_at(now))
            .map(|banner| banner.message().to_string());
        let menu_rows = rows_occupied(&menu, width);
        let banner_rows = banner
            .as_deref()
            .map_or(0, |banner| rows_occupied(banner, width));
        let reserved = menu_rows.saturating_add(banner_rows).min(height);

        // Scroll the output up so the footer never covers it
        for _ in 0..reserved {
            queue!(self.out, Clear(ClearType::CurrentLine))?;
            self.out.write_all(b"\n")?;
            queue!(self.out, MoveToColumn(0))?;
        }
        queue!(self.out, MoveUp(reserved), SavePosition)?;

        if let Some(banner) = banner {
            queue!(
                self.out,
                MoveTo(0, height.saturating_sub(reserved)),
                Clear(ClearType::CurrentLine)
            )?;
            self.out.write_all(banner.as_bytes())?;
        }
        queue!(
            self.out,
            MoveTo(0, height.saturating_sub(menu_rows)),
            Clear(ClearType::CurrentLine)
        )?;
        self.out.write_all(menu.as_bytes())?;
        queue!(self.out, RestorePosition)?;
        self.footer_drawn = true;
        Ok(())
    }
}

/// Write one line of output. Raw mode does not translate `\n`, so lines
/// carry their own carriage returns.
pub fn write_line(out: &mut dyn Write, line: &str) -> io::Result<()> {
    out.write_all(b"\r")?;
    out.write_all(line.as_bytes())?;
    out.write_all(b"\r\n")
}

/// Shared entry point to the controller. Every terminal writer goes through it.
#[derive(Clone)]
pub struct ControllerHandle {
    inner: Arc<Mutex<InteractiveController>>,
}

impl ControllerHandle {
    pub fn new(controller: InteractiveController) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InteractiveController> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn render_around<F>(&self, emit: F) -> io::Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        self.lock().render_around(emit)
    }

    pub fn report_error(&self, source: &str, err: impl std::fmt::Display) {
        self.lock().report_error(source, err);
    }

    pub fn handle_key_event(&self, key: MenuKey) -> KeyAction {
        self.lock().handle_key_event(key)
    }

    pub fn on_event(&self, event: ControllerEvent) {
        self.lock().on_event(event);
    }

    pub fn begin(&self) {
        self.lock().begin();
    }

    pub fn release(&self) {
        self.lock().release();
    }

    pub fn mute(&self) {
        self.lock().mute();
    }

    pub fn suspend(&self) {
        self.lock().suspend();
    }

    pub fn resume(&self) {
        self.lock().resume();
    }

    pub fn record(&self, command: MenuCommand) {
        self.lock().record(command);
    }

    pub fn set_watch_context(&self, context: WatchContext) {
        self.lock().set_watch_context(context);
    }

    pub fn adopt_watch(&self, token: CancellationToken) -> u64 {
        self.lock().adopt_watch(token)
    }

    pub fn watch_ended(&self, generation: u64) -> bool {
        self.lock().watch_ended(generation)
    }

    pub fn is_muted(&self) -> bool {
        self.lock().mode() == DisplayMode::Muted
    }

    pub fn is_watch_enabled(&self) -> bool {
        self.lock().watch().is_enabled()
    }

    pub fn emit_metrics(&self) {
        self.lock().metrics().emit();
    }

    #[cfg(test)]
    pub(crate) fn metrics(&self) -> KeyboardMetrics {
        self.lock().metrics().clone()
    }
}
