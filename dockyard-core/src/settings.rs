//! Environment-driven settings, read once at startup.

use crate::debug::DEFAULT_ATTACH_TOOL;

pub const ENV_MENU: &str = "DOCKYARD_MENU";
pub const ENV_DESKTOP: &str = "DOCKYARD_DESKTOP";
pub const ENV_DOCKER: &str = "DOCKYARD_DOCKER";
pub const ENV_ATTACH_TOOL: &str = "DOCKYARD_ATTACH_TOOL";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Navigation menu preference; `None` leaves it to terminal detection
    pub menu: Option<bool>,
    /// Docker Desktop integration is available
    pub desktop: bool,
    pub docker_bin: String,
    pub attach_tool: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            menu: None,
            desktop: false,
            docker_bin: "docker".to_string(),
            attach_tool: DEFAULT_ATTACH_TOOL.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            menu: non_empty(ENV_MENU).map(|v| string_to_bool(&v)),
            desktop: non_empty(ENV_DESKTOP).is_some_and(|v| string_to_bool(&v)),
            docker_bin: non_empty(ENV_DOCKER).unwrap_or(defaults.docker_bin),
            attach_tool: non_empty(ENV_ATTACH_TOOL).unwrap_or(defaults.attach_tool),
        }
    }
}

/// Lenient boolean: `y` and the usual true spellings are true, anything else is false
pub fn string_to_bool(value: &str) -> bool {
    let value = value.trim();
    if value.eq_ignore_ascii_case("y") || value.eq_ignore_ascii_case("yes") {
        return true;
    }
    matches!(value, "1" | "t" | "T" | "TRUE" | "true" | "True")
}
