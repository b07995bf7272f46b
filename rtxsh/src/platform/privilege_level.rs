//! Privilege level definition.

use std::fmt;

/// The two CLI privilege modes of the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrivilegeMode {
    /// Login mode, prompt ends in `>`.
    #[default]
    Normal,
    /// Administrator mode, prompt ends in `#`.
    Administrator,
}

impl fmt::Display for PrivilegeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegeMode::Normal => f.write_str("normal"),
            PrivilegeMode::Administrator => f.write_str("administrator"),
        }
    }
}

/// How a privilege mode is recognized and entered.
#[derive(Debug, Clone)]
pub struct PrivilegeLevel {
    /// Which mode this level describes.
    pub mode: PrivilegeMode,

    /// Last character of the prompt in this mode.
    pub terminator: char,

    /// Command to escalate TO this level from the normal level.
    pub escalate_command: Option<String>,

    /// Substring the device prints when asking for the escalation password.
    pub auth_prompt: Option<String>,

    /// Command to leave this level.
    pub deescalate_command: String,
}

impl PrivilegeLevel {
    /// Create a new privilege level with minimal required fields.
    pub fn new(mode: PrivilegeMode, terminator: char) -> Self {
        Self {
            mode,
            terminator,
            escalate_command: None,
            auth_prompt: None,
            deescalate_command: "exit".to_string(),
        }
    }

    /// Set the escalation command.
    pub fn with_escalate(mut self, command: impl Into<String>) -> Self {
        self.escalate_command = Some(command.into());
        self
    }

    /// Set the de-escalation command.
    pub fn with_deescalate(mut self, command: impl Into<String>) -> Self {
        self.deescalate_command = command.into();
        self
    }

    /// Set the password prompt shown during escalation.
    pub fn with_auth(mut self, prompt: impl Into<String>) -> Self {
        self.auth_prompt = Some(prompt.into());
        self
    }

    /// Check if a detected prompt belongs to this level.
    pub fn matches(&self, prompt: &str) -> bool {
        prompt.trim_end().ends_with(self.terminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_by_terminator() {
        let admin = PrivilegeLevel::new(PrivilegeMode::Administrator, '#');
        assert!(admin.matches("[RTX1210] # "));
        assert!(admin.matches("#"));
        assert!(!admin.matches("[RTX1210] >"));
    }

    #[test]
    fn test_builder() {
        let level = PrivilegeLevel::new(PrivilegeMode::Administrator, '#')
            .with_escalate("administrator")
            .with_auth("Password:");
        assert_eq!(level.escalate_command.as_deref(), Some("administrator"));
        assert_eq!(level.auth_prompt.as_deref(), Some("Password:"));
        assert_eq!(level.deescalate_command, "exit");
    }
}
