//! Styled console messages.
//!
//! Everything user-facing goes to stderr so stdout stays free for the flash
//! tool's own output.

use console::Style;

/// Semantic level of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tone {
    Header,
    Info,
    Success,
    Warning,
    Error,
    Plain,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Header => Style::new().magenta().bold(),
            Self::Info => Style::new().blue(),
            Self::Success => Style::new().green(),
            Self::Warning => Style::new().yellow(),
            Self::Error => Style::new().red().bold(),
            Self::Plain => Style::new(),
        }
    }
}

/// Render `message` for `tone`; `colors` decides whether escape codes are
/// emitted at all.
pub(crate) fn styled(message: &str, tone: Tone, colors: bool) -> String {
    tone.style()
        .force_styling(colors)
        .apply_to(message)
        .to_string()
}

/// Whether stderr should get colors: a terminal, and `NO_COLOR` unset.
pub(crate) fn stderr_colors() -> bool {
    std::env::var_os("NO_COLOR").is_none() && console::Term::stderr().is_term()
}

/// Console printer honoring quiet mode.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Printer {
    pub colors: bool,
    pub quiet: bool,
}

impl Printer {
    /// Print unless quiet.
    pub fn say(&self, message: &str, tone: Tone) {
        if !self.quiet {
            eprintln!("{}", styled(message, tone, self.colors));
        }
    }

    /// Print even in quiet mode.
    pub fn shout(&self, message: &str, tone: Tone) {
        eprintln!("{}", styled(message, tone, self.colors));
    }
}
