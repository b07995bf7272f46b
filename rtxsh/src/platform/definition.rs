//! Device profile: everything about the router's CLI dialect that the
//! session engine needs to know.

use std::sync::Arc;

use super::privilege_level::{PrivilegeLevel, PrivilegeMode};
use super::timeouts::CommandTimeouts;
use crate::channel::{CustomPromptDetector, DefaultPromptDetector, PromptDetector};
use crate::error::{ProtocolError, Result};

/// Device profile containing all dialect-specific configuration.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Profile name (e.g., "yamaha_rtx").
    pub name: String,

    /// Login privilege level.
    pub normal: PrivilegeLevel,

    /// Administrator privilege level.
    pub administrator: PrivilegeLevel,

    /// Exact prompt pattern; when set, replaces terminator-based detection.
    pub prompt_pattern: Option<String>,

    /// Commands run best-effort after the first prompt (encoding, paging).
    pub on_open_commands: Vec<String>,

    /// Output markers that indicate command failure.
    pub error_markers: Vec<String>,

    /// Keywords in an escalation or password-change reply that indicate
    /// rejection (case-insensitive).
    pub auth_failure_keywords: Vec<String>,

    /// Phrases the device uses to ask whether to save on exit.
    pub save_confirmations: Vec<String>,

    /// Reply sent to a save confirmation.
    pub save_answer: String,

    /// Commands that need administrator mode.
    pub administrator_commands: Vec<String>,

    /// Read timeouts.
    pub timeouts: CommandTimeouts,
}

impl DeviceProfile {
    /// Create a new profile with `>`/`#` levels and nothing else.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            normal: PrivilegeLevel::new(PrivilegeMode::Normal, '>'),
            administrator: PrivilegeLevel::new(PrivilegeMode::Administrator, '#'),
            prompt_pattern: None,
            on_open_commands: vec![],
            error_markers: vec![],
            auth_failure_keywords: vec![],
            save_confirmations: vec![],
            save_answer: "Y".to_string(),
            administrator_commands: vec![],
            timeouts: CommandTimeouts::default(),
        }
    }

    pub fn with_normal(mut self, level: PrivilegeLevel) -> Self {
        self.normal = level;
        self
    }

    pub fn with_administrator(mut self, level: PrivilegeLevel) -> Self {
        self.administrator = level;
        self
    }

    /// Use an exact prompt regex instead of the terminator heuristic.
    pub fn with_prompt_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.prompt_pattern = Some(pattern.into());
        self
    }

    /// Add an on_open command.
    pub fn with_on_open_command(mut self, command: impl Into<String>) -> Self {
        self.on_open_commands.push(command.into());
        self
    }

    /// Add a failure marker.
    pub fn with_error_marker(mut self, marker: impl Into<String>) -> Self {
        self.error_markers.push(marker.into());
        self
    }

    pub fn with_auth_failure_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.auth_failure_keywords.push(keyword.into());
        self
    }

    pub fn with_save_confirmation(mut self, phrase: impl Into<String>) -> Self {
        self.save_confirmations.push(phrase.into());
        self
    }

    pub fn with_save_answer(mut self, answer: impl Into<String>) -> Self {
        self.save_answer = answer.into();
        self
    }

    pub fn with_administrator_command(mut self, prefix: impl Into<String>) -> Self {
        self.administrator_commands.push(prefix.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: CommandTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Build the prompt detector for this profile.
    pub fn detector(&self) -> Result<Arc<dyn PromptDetector>> {
        match &self.prompt_pattern {
            Some(pattern) => Ok(Arc::new(
                CustomPromptDetector::new(pattern).map_err(ProtocolError::InvalidPattern)?,
            )),
            None => Ok(Arc::new(DefaultPromptDetector::new(
                self.normal.terminator,
                self.administrator.terminator,
            ))),
        }
    }

    /// Privilege mode shown by `prompt`.
    pub fn mode_of(&self, prompt: &str) -> PrivilegeMode {
        if self.administrator.matches(prompt) {
            PrivilegeMode::Administrator
        } else {
            PrivilegeMode::Normal
        }
    }

    /// Whether `command` needs administrator mode.
    pub fn requires_administrator(&self, command: &str) -> bool {
        let command = command.trim().to_ascii_lowercase();
        self.administrator_commands
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()) || command.starts_with(&format!("no {}", prefix)))
    }

    /// Whether `reply` contains an authentication failure keyword.
    pub fn auth_failed(&self, reply: &str) -> bool {
        let lower = reply.to_lowercase();
        self.auth_failure_keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
    }

    /// Save confirmation phrases as string slices.
    pub fn save_phrases(&self) -> Vec<&str> {
        self.save_confirmations.iter().map(String::as_str).collect()
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        super::vendors::rtx::profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_of() {
        let profile = DeviceProfile::new("test");
        assert_eq!(profile.mode_of("[RTX1210] #"), PrivilegeMode::Administrator);
        assert_eq!(profile.mode_of("[RTX1210] >"), PrivilegeMode::Normal);
    }

    #[test]
    fn test_custom_prompt_pattern() {
        let profile = DeviceProfile::new("test").with_prompt_pattern(r"router[>#]");
        let detector = profile.detector().unwrap();
        assert_eq!(detector.detect(b"out\r\nrouter# "), Some("router#".into()));
    }

    #[test]
    fn test_invalid_prompt_pattern() {
        let profile = DeviceProfile::new("test").with_prompt_pattern("([");
        assert!(profile.detector().is_err());
    }

    #[test]
    fn test_requires_administrator_includes_no_form() {
        let profile = DeviceProfile::new("test").with_administrator_command("ip route");
        assert!(profile.requires_administrator("ip route default gateway pp 1"));
        assert!(profile.requires_administrator("no ip route default"));
        assert!(!profile.requires_administrator("show status dhcp"));
    }

    #[test]
    fn test_auth_failed_case_insensitive() {
        let profile = DeviceProfile::new("test").with_auth_failure_keyword("incorrect");
        assert!(profile.auth_failed("Password INCORRECT"));
        assert!(!profile.auth_failed("[RTX1210] #"));
    }
}
