/// How an in-progress teardown treats the containers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownMode {
    Graceful,
    Forced,
}

/// Session shutdown state. Owned by the event loop; nothing else transitions it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownState {
    #[default]
    Running,
    Teardown(TeardownMode),
    Terminated,
}

/// What the event loop must do in response to a shutdown request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownAction {
    BeginGraceful,
    ForceKill,
    Ignore,
}

impl ShutdownState {
    /// Only an operator request escalates a graceful teardown to a kill.
    pub fn on_shutdown_request(&mut self, from_operator: bool) -> TeardownAction {
        match *self {
            Self::Running => {
                *self = Self::Teardown(TeardownMode::Graceful);
                TeardownAction::BeginGraceful
            }
            Self::Teardown(TeardownMode::Graceful) if from_operator => {
                *self = Self::Teardown(TeardownMode::Forced);
                TeardownAction::ForceKill
            }
            Self::Teardown(_) | Self::Terminated => TeardownAction::Ignore,
        }
    }

    pub fn on_teardown_complete(&mut self) {
        *self = Self::Terminated;
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}
