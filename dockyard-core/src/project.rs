use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Extension key carrying per-service debug settings
pub const DEBUG_EXTENSION: &str = "x-debug";

const PROJECT_FILE_NAMES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// One `develop.watch` rule
#[derive(Clone, Debug, Deserialize)]
pub struct WatchRule {
    pub path: String,
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DevelopConfig {
    #[serde(default)]
    pub watch: Vec<WatchRule>,
}

/// The parts of a service definition the session controller reads.
/// Everything else is kept untouched in `other`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub develop: Option<DevelopConfig>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

impl ServiceConfig {
    /// Look up an `x-*` extension block
    pub fn extension(&self, key: &str) -> Option<&serde_yaml::Value> {
        if !key.starts_with("x-") {
            return None;
        }
        self.other.get(key)
    }

    pub fn has_watch_rules(&self) -> bool {
        self.develop
            .as_ref()
            .is_some_and(|develop| !develop.watch.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    #[serde(skip)]
    pub working_dir: PathBuf,

    #[serde(skip)]
    pub config_files: Vec<PathBuf>,
}

impl Project {
    /// Load a project file. `name_override` wins over the file's `name:`,
    /// which wins over the directory name.
    pub fn load(path: &Path, name_override: Option<&str>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ProjectIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut project = Self::from_yaml(&content)?;

        let working_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let dir_name = working_dir
            .canonicalize()
            .ok()
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let raw_name = match name_override {
            Some(name) => name.to_string(),
            None if !project.name.is_empty() => project.name.clone(),
            None => dir_name,
        };
        project.name = normalize_project_name(&raw_name);
        if project.name.is_empty() {
            return Err(Error::Config(format!(
                "cannot derive a project name for {}, use -p",
                path.display()
            )));
        }

        project.working_dir = working_dir;
        project.config_files = vec![path.to_path_buf()];
        Ok(project)
    }

    /// Parse a project from YAML (useful for testing)
    pub fn from_yaml(content: &str) -> Result<Self> {
        let project: Project = serde_yaml::from_str(content)?;
        if project.services.is_empty() {
            return Err(Error::Config("project defines no services".into()));
        }
        Ok(project)
    }

    /// Find the project file: `COMPOSE_FILE` first, then the usual names in
    /// `start_dir` and its parents.
    pub fn discover(start_dir: &Path) -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("COMPOSE_FILE") {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(path);
            }
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in PROJECT_FILE_NAMES {
                let path = current.join(name);
                if path.exists() {
                    return Ok(path);
                }
            }
            dir = current.parent();
        }

        Err(Error::Config(format!(
            "no project file found in {} or its parents (looked for {})",
            start_dir.display(),
            PROJECT_FILE_NAMES.join(", ")
        )))
    }

    pub fn service(&self, name: &str) -> Result<&ServiceConfig> {
        self.services.get(name).ok_or_else(|| {
            Error::Config(format!(
                "no such service: {} (available: {})",
                name,
                self.service_names().join(", ")
            ))
        })
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Resolve a service selection; empty means every service.
    pub fn select_services(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.service_names());
        }
        for name in requested {
            self.service(name)?;
        }
        Ok(requested.to_vec())
    }

    /// Whether any of `services` (all services when empty) declares watch rules
    pub fn is_watch_configured(&self, services: &[String]) -> bool {
        if services.is_empty() {
            return self.services.values().any(ServiceConfig::has_watch_rules);
        }
        services
            .iter()
            .filter_map(|name| self.services.get(name))
            .any(ServiceConfig::has_watch_rules)
    }

    /// Container name of a service replica, `<project>-<service>-<index>`
    pub fn container_name(&self, service: &str, index: u32) -> String {
        format!("{}-{}-{}", self.name, service, index)
    }
}

/// Lowercase and drop characters that are not allowed in project names
pub fn normalize_project_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect::<String>()
        .trim_start_matches(['-', '_'])
        .to_string()
}
