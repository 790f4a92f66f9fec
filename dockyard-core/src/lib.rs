pub mod api;
pub mod banner;
pub mod error;
pub mod layout;
pub mod project;
pub mod settings;
pub mod style;

// Session control
pub mod controller;
pub mod session;
pub mod shutdown;
pub mod signal;

// Debug shell attach
pub mod debug;

// Menu usage counters
pub mod metrics;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
