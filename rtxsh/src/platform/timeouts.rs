//! Per-command read timeouts.

use std::time::Duration;

/// Read timeouts, classified by what is being waited for.
///
/// Most commands answer within `default`. Configuration dumps and the
/// status/environment queries are slow on the device and get their own
/// budgets, matched by command prefix.
#[derive(Debug, Clone)]
pub struct CommandTimeouts {
    pub default: Duration,
    pub bulk: Duration,
    pub status: Duration,
    pub environment: Duration,

    /// Banner and first prompt after the shell starts.
    pub initial_prompt: Duration,
    /// `Password:` style prompts during escalation and password changes.
    pub password_prompt: Duration,
    /// Prompt or save confirmation after `exit`.
    pub exit: Duration,
    /// Host key generation can take minutes on older models.
    pub host_key_generation: Duration,

    pub bulk_commands: Vec<String>,
    pub status_commands: Vec<String>,
    pub environment_commands: Vec<String>,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(15),
            bulk: Duration::from_secs(60),
            status: Duration::from_secs(30),
            environment: Duration::from_secs(20),
            initial_prompt: Duration::from_secs(10),
            password_prompt: Duration::from_secs(10),
            exit: Duration::from_secs(5),
            host_key_generation: Duration::from_secs(600),
            bulk_commands: vec!["show config".into()],
            status_commands: vec!["show status".into()],
            environment_commands: vec!["show environment".into()],
        }
    }
}

impl CommandTimeouts {
    /// Timeout for reading the response to `command`.
    pub fn timeout_for(&self, command: &str) -> Duration {
        let command = command.trim().to_ascii_lowercase();
        let matches = |prefixes: &[String]| prefixes.iter().any(|p| command.starts_with(p.as_str()));

        if matches(&self.bulk_commands) {
            self.bulk
        } else if matches(&self.environment_commands) {
            self.environment
        } else if matches(&self.status_commands) {
            self.status
        } else {
            self.default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_classes() {
        let t = CommandTimeouts::default();
        assert_eq!(t.timeout_for("show config"), Duration::from_secs(60));
        assert_eq!(t.timeout_for("show config 1"), Duration::from_secs(60));
        assert_eq!(t.timeout_for("show status dhcp"), Duration::from_secs(30));
        assert_eq!(t.timeout_for("show environment"), Duration::from_secs(20));
        assert_eq!(t.timeout_for("ip route default gateway pp 1"), Duration::from_secs(15));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let t = CommandTimeouts::default();
        assert_eq!(t.timeout_for("  SHOW CONFIG "), Duration::from_secs(60));
    }
}
