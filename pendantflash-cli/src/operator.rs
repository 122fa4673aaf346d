//! Terminal side of the bootloader prompt.

use {
    crate::output::{Printer, Tone},
    dialoguer::{Confirm, Error as DialoguerError, theme::ColorfulTheme},
    log::debug,
    pendantflash::{Error, OperatorGate, OperatorPrompt},
    std::io::{BufRead, IsTerminal},
};

/// Answers that abort the run when stdin is not a terminal.
const ABORT_ANSWERS: &[&str] = &["n", "no", "q", "quit", "abort"];

/// Asks the operator on the terminal, or reads a line from piped stdin.
pub struct TerminalGate {
    printer: Printer,
    interrupted: fn() -> bool,
}

impl TerminalGate {
    pub fn new(printer: Printer, interrupted: fn() -> bool) -> Self {
        Self {
            printer,
            interrupted,
        }
    }

    fn show(&self, prompt: &OperatorPrompt) {
        self.printer
            .shout("", Tone::Plain);
        self.printer
            .shout(prompt.title, Tone::Warning);
        for (i, step) in prompt
            .steps
            .iter()
            .enumerate()
        {
            self.printer
                .shout(&format!("  {}. {step}", i + 1), Tone::Plain);
        }
        self.printer
            .shout("", Tone::Plain);
    }
}

impl OperatorGate for TerminalGate {
    fn confirm(&mut self, prompt: &OperatorPrompt) -> pendantflash::Result<bool> {
        if (self.interrupted)() {
            return Err(Error::Interrupted);
        }
        self.show(prompt);

        if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
            let answer = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Pendant is in bootloader mode, start flashing?")
                .default(true)
                .interact_opt()
                .map_err(map_prompt_error)?;
            // Esc or q dismisses the prompt.
            return Ok(answer.unwrap_or(false));
        }

        self.printer
            .shout("Press Enter when ready (or type 'q' to abort)...", Tone::Info);
        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)?;
        if read == 0 {
            debug!("stdin closed at the bootloader prompt");
            return Ok(false);
        }
        Ok(!is_abort_answer(&line))
    }
}

fn map_prompt_error(err: DialoguerError) -> Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                Error::Interrupted
            } else {
                Error::Io(io_err)
            }
        },
    }
}

fn is_abort_answer(line: &str) -> bool {
    let answer = line
        .trim()
        .to_lowercase();
    ABORT_ANSWERS.contains(&answer.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_confirms() {
        assert!(!is_abort_answer("\n"));
        assert!(!is_abort_answer(""));
        assert!(!is_abort_answer("yes\n"));
    }

    #[test]
    fn test_abort_words() {
        for word in ["q\n", "QUIT", " no ", "n\r\n", "Abort"] {
            assert!(is_abort_answer(word), "{word:?} should abort");
        }
    }

    #[test]
    fn test_interrupted_prompt_error() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::from(
            std::io::ErrorKind::Interrupted,
        )));
        assert!(matches!(err, Error::Interrupted));
    }

    #[test]
    fn test_other_prompt_error_is_io() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_interrupted_before_prompt() {
        let printer = Printer {
            colors: false,
            quiet: true,
        };
        let mut gate = TerminalGate::new(printer, || true);
        let err = gate
            .confirm(&pendantflash::BOOTLOADER_PROMPT)
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted));
    }
}
