use crate::{errors::Result, services::Confirm};

/// Asks a y/N question on the terminal. Anything but an explicit yes keeps
/// the current state.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = dialoguer::Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()?;

        Ok(answer)
    }
}

/// Answers every question with yes, for `--yes` and scripted use.
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _question: &str) -> Result<bool> {
        Ok(true)
    }
}
