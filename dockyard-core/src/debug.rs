//! Debug shell attach.
//!
//! Per-service defaults live under the `x-debug` extension of the service.
//! Command line overrides are merged on top and the result is handed to an
//! external attach tool that takes over the terminal.

use std::process::Stdio;

use serde::Deserialize;
use tracing::{debug, info};

use crate::controller::ControllerHandle;
use crate::error::{Error, Result};
use crate::metrics::MenuCommand;
use crate::project::{DEBUG_EXTENSION, Project};

pub const DEFAULT_ATTACH_TOOL: &str = "dld";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub command: String,
    pub host: String,
    pub shell: String,
    pub privileged: bool,
    pub root: bool,
}

/// Values given on the command line. Only host, shell and command can be
/// overridden; privileged and root come from the extension block alone.
#[derive(Clone, Debug, Default)]
pub struct DebugOverrides {
    pub host: Option<String>,
    pub shell: Option<String>,
    pub command: Option<String>,
}

impl DebugConfig {
    /// Decode the service's `x-debug` block. A missing or null block is the default config.
    pub fn from_service(project: &Project, service: &str) -> Result<Self> {
        let config = project.service(service)?;
        match config.extension(DEBUG_EXTENSION) {
            None | Some(serde_yaml::Value::Null) => Ok(Self::default()),
            Some(value) => serde_yaml::from_value(value.clone()).map_err(|source| {
                Error::DebugDecode {
                    service: service.to_string(),
                    source,
                }
            }),
        }
    }

    pub fn merged(self, overrides: &DebugOverrides) -> Self {
        Self {
            command: pick(&overrides.command, self.command),
            host: pick(&overrides.host, self.host),
            shell: pick(&overrides.shell, self.shell),
            ..self
        }
    }

    pub fn resolve(project: &Project, service: &str, overrides: &DebugOverrides) -> Result<Self> {
        Ok(Self::from_service(project, service)?.merged(overrides))
    }

    /// Arguments for the attach tool, always in the order host, shell,
    /// command, privileged, root.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (name, value) in [
            ("host", &self.host),
            ("shell", &self.shell),
            ("command", &self.command),
        ] {
            if !value.is_empty() {
                args.push(format!("--{name}"));
                args.push(value.clone());
            }
        }
        for (name, enabled) in [("privileged", self.privileged), ("root", self.root)] {
            if enabled {
                args.push(format!("--{name}"));
            }
        }
        args
    }
}

fn pick(cli: &Option<String>, declared: String) -> String {
    match cli {
        Some(value) if !value.is_empty() => value.clone(),
        _ => declared,
    }
}

#[derive(Clone, Debug)]
pub struct DebugRequest {
    pub service: String,
    /// Replica index, starting at 1
    pub index: u32,
    pub overrides: DebugOverrides,
}

impl DebugRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            index: 1,
            overrides: DebugOverrides::default(),
        }
    }
}

pub struct DebugAttacher {
    program: String,
}

impl Default for DebugAttacher {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACH_TOOL)
    }
}

impl DebugAttacher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Full argument vector, without the program itself
    pub fn argv(&self, project: &Project, request: &DebugRequest) -> Result<Vec<String>> {
        let config = DebugConfig::resolve(project, &request.service, &request.overrides)?;
        let mut argv = vec![
            "attach".to_string(),
            project.container_name(&request.service, request.index),
        ];
        argv.extend(config.to_args());
        Ok(argv)
    }

    /// Run the attach tool on the current terminal and wait for it.
    ///
    /// With a controller, the footer is cleared for the duration and drawn
    /// again afterwards.
    pub async fn attach(
        &self,
        project: &Project,
        request: &DebugRequest,
        controller: Option<&ControllerHandle>,
    ) -> Result<()> {
        let argv = self.argv(project, request)?;
        info!(program = %self.program, args = ?argv, "attaching debugger");

        if let Some(controller) = controller {
            controller.record(MenuCommand::Debug);
            controller.suspend();
        }
        let status = tokio::process::Command::new(&self.program)
            .args(&argv)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await;
        if let Some(controller) = controller {
            controller.resume();
        }

        let status = status.map_err(|source| Error::AttachSpawn {
            program: self.program.clone(),
            source,
        })?;
        debug!(%status, "attach tool finished");
        if status.success() {
            Ok(())
        } else {
            Err(Error::AttachExited {
                program: self.program.clone(),
                code: status.code().unwrap_or(1),
            })
        }
    }
}
