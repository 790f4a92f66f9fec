//! Usage counters for the interactive menu.
//!
//! Records which shortcut commands were offered during a session and which
//! ones the operator actually used. The summary is emitted as a tracing event
//! when the session ends.

use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MenuCommand {
    Gui,
    Watch,
    Debug,
}

impl MenuCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gui => "gui",
            Self::Watch => "watch",
            Self::Debug => "debug",
        }
    }
}

impl std::fmt::Display for MenuCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct KeyboardMetrics {
    available: Vec<MenuCommand>,
    used: Vec<MenuCommand>,
}

impl KeyboardMetrics {
    pub fn new(gui_available: bool, watch_configured: bool) -> Self {
        let mut available = Vec::new();
        if gui_available {
            available.push(MenuCommand::Gui);
        }
        if watch_configured {
            available.push(MenuCommand::Watch);
        }
        Self {
            available,
            used: Vec::new(),
        }
    }

    pub fn record(&mut self, command: MenuCommand) {
        self.used.push(command);
    }

    pub fn available(&self) -> &[MenuCommand] {
        &self.available
    }

    /// Commands in the order they were used, repeats included
    pub fn used(&self) -> &[MenuCommand] {
        &self.used
    }

    pub fn count(&self, command: MenuCommand) -> usize {
        self.used.iter().filter(|c| **c == command).count()
    }

    pub fn emit(&self) {
        info!(
            target: "dockyard::menu",
            available = ?names(&self.available),
            used = ?names(&self.used),
            "navigation menu usage"
        );
    }
}

fn names(commands: &[MenuCommand]) -> Vec<&'static str> {
    commands.iter().map(MenuCommand::as_str).collect()
}
