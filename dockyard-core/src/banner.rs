use std::fmt::Display;
use std::time::{Duration, Instant};

use crate::style;

/// How long a reported error stays in the footer
pub const BANNER_TTL: Duration = Duration::from_secs(10);

/// A time-limited error line shown above the navigation menu.
///
/// Visibility is derived from elapsed time only, so nothing ever clears it.
#[derive(Clone, Debug)]
pub struct ErrorBanner {
    message: String,
    raised_at: Instant,
    ttl: Duration,
}

impl ErrorBanner {
    pub fn raise(source: &str, err: impl Display, now: Instant) -> Self {
        Self {
            message: format!("{}  {}", style::banner_prefix(source), err),
            raised_at: now,
            ttl: BANNER_TTL,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_visible_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.raised_at) < self.ttl
    }
}
