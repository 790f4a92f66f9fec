//! Terminal colors for the footer and the log prefixes.
//!
//! Everything returns plain `String`s with embedded ANSI sequences so the
//! result can be measured with [`crate::layout`] before it is printed.

use crossterm::style::{Color, Stylize};

/// Color palette tokens
#[derive(Clone, Debug)]
pub struct Palette {
    /// Key letter in the navigation menu
    pub key_fg: Color,
    pub key_bg: Color,
    /// Menu labels
    pub nav: Color,
    /// Banner source prefix
    pub accent: Color,
    /// Rotating colors for service log prefixes
    pub services: Vec<Color>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            key_fg: Color::Rgb { r: 0, g: 0, b: 0 },
            key_bg: Color::Rgb {
                r: 255,
                g: 255,
                b: 255,
            },
            nav: Color::DarkGrey,
            accent: Color::Cyan,
            services: vec![
                Color::Cyan,
                Color::Yellow,
                Color::Green,
                Color::Magenta,
                Color::Blue,
                Color::DarkCyan,
                Color::DarkYellow,
                Color::DarkGreen,
                Color::DarkMagenta,
                Color::DarkBlue,
            ],
        }
    }
}

static PALETTE: std::sync::OnceLock<Palette> = std::sync::OnceLock::new();

pub fn palette() -> &'static Palette {
    PALETTE.get_or_init(Palette::default)
}

/// Bold black-on-white key letter, e.g. the `W` in "W Enable Watch"
pub fn shortcut_key(key: &str) -> String {
    let p = palette();
    key.with(p.key_fg).on(p.key_bg).bold().to_string()
}

pub fn nav(text: &str) -> String {
    text.with(palette().nav).to_string()
}

/// `"<source> →"` in bold accent color
pub fn banner_prefix(source: &str) -> String {
    format!("{source} →").with(palette().accent).bold().to_string()
}

pub fn link(url: &str) -> String {
    url.with(palette().accent).to_string()
}

/// Color for the n-th attached service
pub fn service_color(index: usize) -> Color {
    let colors = &palette().services;
    colors[index % colors.len()]
}

pub fn service_prefix(name: &str, index: usize, width: usize) -> String {
    format!("{name:<width$} |")
        .with(service_color(index))
        .to_string()
}
