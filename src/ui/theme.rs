//! Colors shared by prompts and step output

use cliclack::ThemeState;
use console::Style;

/// Outcome a line or prompt reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Wheelsmith branding: titles and the active prompt
    Accent,
    Ok,
    Warn,
    Fail,
    Info,
    /// Finished or cancelled prompts
    Muted,
}

impl Tone {
    pub fn style(self) -> Style {
        match self {
            Tone::Accent => Style::new().magenta(),
            Tone::Ok => Style::new().green(),
            Tone::Warn => Style::new().yellow(),
            Tone::Fail => Style::new().red(),
            Tone::Info => Style::new().cyan(),
            Tone::Muted => Style::new().dim(),
        }
    }

    /// Tag used in plain output
    pub fn tag(self) -> &'static str {
        match self {
            Tone::Ok => "[OK]",
            Tone::Warn => "[WARN]",
            Tone::Fail => "[FAIL]",
            Tone::Info => "[INFO]",
            Tone::Accent | Tone::Muted => "",
        }
    }
}

fn prompt_tone(state: &ThemeState) -> Tone {
    match state {
        ThemeState::Active => Tone::Accent,
        ThemeState::Error(_) => Tone::Fail,
        ThemeState::Cancel | ThemeState::Submit => Tone::Muted,
    }
}

/// cliclack theme drawn from the same tones as step output
#[derive(Debug, Clone, Default)]
pub struct WheelsmithTheme;

impl cliclack::Theme for WheelsmithTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Submit => Tone::Accent.style().dim(),
            other => prompt_tone(other).style(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Submit => Tone::Ok.style(),
            other => prompt_tone(other).style(),
        }
    }
}

/// Install the theme for all cliclack output
pub fn init_theme() {
    cliclack::set_theme(WheelsmithTheme);
}
