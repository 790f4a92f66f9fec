//! Footer geometry: how many terminal rows a piece of styled text needs.

use std::sync::OnceLock;

use regex::Regex;

static ANSI_PATTERN: OnceLock<Regex> = OnceLock::new();

/// CSI sequences, OSC sequences (BEL or ST terminated) and two-byte escapes
/// such as save/restore cursor
fn ansi_pattern() -> &'static Regex {
    ANSI_PATTERN.get_or_init(|| {
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[0-?@-Z\\-_]")
            .expect("ANSI pattern is valid")
    })
}

pub fn strip_ansi(text: &str) -> String {
    ansi_pattern().replace_all(text, "").into_owned()
}

/// Number of visible characters once color/control sequences are removed
pub fn visible_len(text: &str) -> usize {
    strip_ansi(text).chars().count()
}

/// Rows `text` occupies on a terminal `width` columns wide.
///
/// Always at least one row: an empty footer line still owns its row.
pub fn rows_occupied(text: &str, width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let rows = visible_len(text).div_ceil(width).max(1);
    u16::try_from(rows).unwrap_or(u16::MAX)
}
