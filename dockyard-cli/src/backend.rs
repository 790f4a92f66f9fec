//! `docker compose` driven through subprocesses.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dockyard_core::api::{
    Backend, ContainerEvent, CreateOptions, EventListener, KillOptions, LogStream, StartOptions,
    StopOptions, WatchOptions,
};
use dockyard_core::error::{Error, Result};
use dockyard_core::project::Project;

/// How long trailing log lines may take to arrive once every attached container is gone
const LOG_DRAIN: Duration = Duration::from_millis(500);

/// Lines of stderr kept to explain a failed watch
const WATCH_STDERR_TAIL: usize = 20;

pub struct ComposeCliBackend {
    docker: String,
}

impl ComposeCliBackend {
    pub fn new(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
        }
    }

    fn compose(&self, project: &Project) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.arg("compose");
        for file in &project.config_files {
            cmd.arg("-f").arg(file);
        }
        cmd.arg("-p").arg(&project.name);
        if !project.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&project.working_dir);
        }
        cmd.stdin(Stdio::null());

        // Own session: a Ctrl+C on the terminal reaches dockyard only, and
        // dockyard decides how the containers go down
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        cmd
    }

    async fn run(&self, operation: &'static str, mut cmd: Command) -> Result<()> {
        debug!(operation, command = ?cmd.as_std(), "running docker compose");
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::backend(operation, format!("failed to run {}: {}", self.docker, e)))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        if message.is_empty() {
            Err(Error::backend(operation, format!("exited with {}", output.status)))
        } else {
            Err(Error::backend(operation, message.to_string()))
        }
    }

    fn spawn_piped(&self, operation: &'static str, mut cmd: Command) -> Result<Child> {
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd.spawn()
            .map_err(|e| Error::backend(operation, format!("failed to run {}: {}", self.docker, e)))
    }

    /// Stream logs and exit events of the attached services until they are
    /// all gone or `cancel` fires.
    async fn follow(
        &self,
        project: &Project,
        services: &[String],
        listener: EventListener,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut logs_cmd = self.compose(project);
        logs_cmd.args(["logs", "--follow", "--no-color"]).args(services);
        let mut logs = self.spawn_piped("start", logs_cmd)?;

        let mut events_cmd = self.compose(project);
        events_cmd.args(["events", "--json"]).args(services);
        let mut events = self.spawn_piped("start", events_cmd)?;

        let logs_task = logs.stdout.take().map(|stdout| {
            let project_name = project.name.clone();
            let listener = listener.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(raw)) = lines.next_line().await {
                    if let Some(event) = parse_log_line(&project_name, &raw) {
                        listener(event);
                    }
                }
            })
        });

        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = events.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(raw)) = lines.next_line().await {
                    if let Some(exited) = parse_exit_event(&raw) {
                        if exit_tx.send(exited).is_err() {
                            break;
                        }
                    }
                }
            });
        }

        let mut remaining: BTreeSet<String> = services.iter().cloned().collect();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("detaching from containers");
                    break;
                }
                exited = exit_rx.recv() => match exited {
                    Some(event) => {
                        let service = event.service().to_string();
                        listener(event);
                        remaining.remove(&service);
                        if remaining.is_empty() {
                            info!("all attached containers exited");
                            break;
                        }
                    }
                    None => {
                        warn!("event stream ended");
                        break;
                    }
                },
            }
        }

        let _ = events.start_kill();
        if let Some(task) = logs_task {
            if tokio::time::timeout(LOG_DRAIN, task).await.is_err() {
                debug!("log stream still open, closing it");
            }
        }
        let _ = logs.start_kill();
        Ok(())
    }
}

#[async_trait]
impl Backend for ComposeCliBackend {
    fn name(&self) -> &'static str {
        "docker compose"
    }

    async fn create(&self, project: &Project, options: &CreateOptions) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.arg("create");
        match &options.build {
            None => {
                cmd.arg("--no-build");
            }
            Some(build) if build.quiet => {
                cmd.arg("--quiet-pull");
            }
            Some(_) => {}
        }
        if options.remove_orphans {
            cmd.arg("--remove-orphans");
        }
        cmd.args(&options.services);
        self.run("create", cmd).await
    }

    async fn start(
        &self,
        project: &Project,
        options: &StartOptions,
        listener: Option<EventListener>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.arg("start").args(&options.services);
        self.run("start", cmd).await?;

        let Some(listener) = listener else {
            return Ok(());
        };
        let attach = options
            .attach
            .clone()
            .filter(|services| !services.is_empty())
            .unwrap_or_else(|| project.service_names());
        self.follow(project, &attach, listener, cancel).await
    }

    async fn stop(&self, project: &Project, options: &StopOptions) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.arg("stop");
        if let Some(timeout) = options.timeout {
            cmd.arg("--timeout").arg(timeout.as_secs().to_string());
        }
        cmd.args(&options.services);
        self.run("stop", cmd).await
    }

    async fn kill(&self, project: &Project, options: &KillOptions) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.arg("kill");
        if let Some(signal) = &options.signal {
            cmd.arg("--signal").arg(signal);
        }
        cmd.args(&options.services);
        self.run("kill", cmd).await
    }

    async fn watch(
        &self,
        project: &Project,
        services: &[String],
        options: &WatchOptions,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut cmd = self.compose(project);
        cmd.args(["watch", "--no-up"]);
        if options.build.quiet {
            cmd.arg("--quiet");
        }
        cmd.args(services)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::backend("watch", format!("failed to run {}: {}", self.docker, e)))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "dockyard::watch", "{}", line);
                    if tail.len() == WATCH_STDERR_TAIL {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                tail
            })
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(())
            }
            status = child.wait() => {
                let status = status.map_err(|e| Error::backend("watch", e.to_string()))?;
                if status.success() {
                    return Ok(());
                }
                let tail = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => Vec::new(),
                };
                let message = tail.join("\n");
                if message.trim().is_empty() {
                    Err(Error::backend("watch", format!("exited with {status}")))
                } else {
                    Err(Error::backend("watch", message.trim().to_string()))
                }
            }
        }
    }
}

/// Service name from a container name `<project>-<service>-<index>`
fn service_of_container(project: &str, container: &str) -> String {
    let without_project = container
        .strip_prefix(project)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(container);
    match without_project.rsplit_once('-') {
        Some((service, index))
            if !service.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) =>
        {
            service.to_string()
        }
        _ => without_project.to_string(),
    }
}

/// Parse a `docker compose logs` line: `<container>  | <text>`
fn parse_log_line(project: &str, raw: &str) -> Option<ContainerEvent> {
    let (container, line) = raw.split_once('|')?;
    let container = container.trim();
    if container.is_empty() {
        return None;
    }
    Some(ContainerEvent::Log {
        service: service_of_container(project, container),
        container: container.to_string(),
        stream: LogStream::Stdout,
        line: line.strip_prefix(' ').unwrap_or(line).to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ComposeEvent {
    action: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    attributes: EventAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct EventAttributes {
    #[serde(default)]
    name: String,
    #[serde(rename = "exitCode", default)]
    exit_code: Option<String>,
}

/// A `die` event from `docker compose events --json`
fn parse_exit_event(raw: &str) -> Option<ContainerEvent> {
    let event: ComposeEvent = serde_json::from_str(raw).ok()?;
    if event.action != "die" || event.service.is_empty() {
        return None;
    }
    let exit_code = event
        .attributes
        .exit_code
        .as_deref()
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    Some(ContainerEvent::Exited {
        service: event.service,
        container: event.attributes.name,
        exit_code,
    })
}
