//! Response type for command execution results.

use std::borrow::Cow;
use std::time::Duration;

use crate::output::clean_output;

/// Response from a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The command that was executed.
    pub command: String,

    /// Raw output: command echo, response, and the trailing prompt.
    pub raw: Vec<u8>,

    /// The prompt matched at the end, or `None` if the read ended on
    /// something other than a prompt.
    pub prompt: Option<String>,

    /// Time taken to execute the command.
    pub elapsed: Duration,
}

impl CommandResult {
    /// Whether the output ended in a recognizable prompt.
    pub fn prompt_found(&self) -> bool {
        self.prompt.is_some()
    }

    /// Raw output as text (lossy UTF-8).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }

    /// Output with the command echo and trailing prompt removed.
    pub fn cleaned(&self) -> String {
        clean_output(&self.text(), &self.command, self.prompt.as_deref())
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cleaned())
    }
}

/// Concatenate the raw output of several results.
pub fn concat_raw(results: &[CommandResult]) -> Vec<u8> {
    let mut out = Vec::with_capacity(results.iter().map(|r| r.raw.len()).sum());
    for r in results {
        out.extend_from_slice(&r.raw);
    }
    out
}
