//! Interactive command support for handling prompts that require user input.
//!
//! Several RTX commands ask follow-up questions before they complete:
//! - `administrator password` asks for the old password and the new one twice
//! - `login password` asks for the new password twice
//! - `sshd host key generate` asks whether to replace an existing key
//!
//! [`Session::send_interactive`] handles these by sending a sequence of
//! inputs, each waiting for a specific phrase or the prompt before
//! proceeding. Secret inputs are never logged or recorded.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use super::session::Session;
use crate::channel::{Matched, WaitFor};
use crate::context::Context;
use crate::error::{AuthError, Result};
use crate::output::{check_output, clean_output};
use crate::platform::vendors::rtx::HOST_KEY_CONFIRMATIONS;

const MASK: &str = "********";

/// What to send in an interactive step.
#[derive(Debug, Clone)]
pub enum Input {
    /// Plain text, logged as is.
    Text(String),
    /// A password; never logged.
    Secret(SecretString),
}

impl Input {
    fn display(&self) -> &str {
        match self {
            Input::Text(s) => s,
            Input::Secret(_) => MASK,
        }
    }

    /// The text that goes over the wire.
    pub fn expose(&self) -> &str {
        match self {
            Input::Text(s) => s,
            Input::Secret(s) => s.expose_secret(),
        }
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input::Text(s.to_string())
    }
}

/// What to wait for after sending an input.
#[derive(Debug, Clone)]
pub enum Expect {
    Prompt,
    Phrase(String),
    PromptOr(Vec<String>),
}

/// An event in an interactive command sequence.
///
/// # Example
///
/// ```rust
/// use rtxsh::driver::InteractiveEvent;
/// use secrecy::SecretString;
///
/// let password = SecretString::from("s3cret".to_string());
/// let events = vec![
///     InteractiveEvent::new("login password").expect_phrase("New_Password:"),
///     InteractiveEvent::secret(password.clone()).expect_phrase("New_Password:"),
///     InteractiveEvent::secret(password),
/// ];
/// assert_eq!(events.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct InteractiveEvent {
    /// The input to send.
    pub input: Input,

    /// What to wait for after sending the input (the prompt by default).
    pub expect: Expect,

    /// Optional timeout override for this specific event.
    pub timeout: Option<Duration>,
}

impl InteractiveEvent {
    /// Create an event that sends `input` and waits for the prompt.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: Input::Text(input.into()),
            expect: Expect::Prompt,
            timeout: None,
        }
    }

    /// Create an event for hidden input (like passwords).
    pub fn secret(input: SecretString) -> Self {
        Self {
            input: Input::Secret(input),
            expect: Expect::Prompt,
            timeout: None,
        }
    }

    /// Wait for `phrase` instead of the prompt.
    pub fn expect_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.expect = Expect::Phrase(phrase.into());
        self
    }

    /// Wait for the prompt or any of `phrases`, whichever comes first.
    pub fn expect_prompt_or<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expect = Expect::PromptOr(phrases.into_iter().map(Into::into).collect());
        self
    }

    /// Set a custom timeout for this event.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of an interactive command sequence.
#[derive(Debug, Clone)]
pub struct InteractiveResult {
    /// Results from each step in the sequence.
    pub steps: Vec<InteractiveStep>,

    /// Total time for the entire sequence.
    pub elapsed: Duration,
}

impl InteractiveResult {
    /// Get the final output (from the last step).
    pub fn final_output(&self) -> Option<&str> {
        self.steps.last().map(|s| s.output.as_str())
    }

    /// Get all outputs concatenated.
    pub fn full_output(&self) -> String {
        self.steps.iter().map(|s| s.output.as_str()).collect()
    }

    /// Whether the sequence ended at a prompt.
    pub fn ended_at_prompt(&self) -> bool {
        self.steps.last().is_some_and(|s| s.matched_prompt)
    }
}

/// Result of a single step in an interactive sequence.
#[derive(Debug, Clone)]
pub struct InteractiveStep {
    /// The input that was sent (masked if secret).
    pub input: String,

    /// The output received after sending input.
    pub output: String,

    /// Whether the step ended at a prompt rather than a phrase.
    pub matched_prompt: bool,

    /// Time taken for this step.
    pub elapsed: Duration,
}

impl Session {
    /// Run a sequence of interactive events.
    ///
    /// A step that waits for "prompt or phrase" and gets the prompt ends
    /// the sequence early: the device has finished asking questions.
    /// Any read failure aborts the sequence; the error carries the partial
    /// output of that step.
    pub async fn send_interactive(
        &mut self,
        ctx: &Context,
        events: &[InteractiveEvent],
    ) -> Result<InteractiveResult> {
        let start = Instant::now();
        let mut steps = Vec::with_capacity(events.len());
        let default_timeout = self.profile().timeouts.default;

        for event in events {
            let step_start = Instant::now();
            debug!("Interactive input: {}", event.input.display());

            match &event.input {
                Input::Text(text) => self.write_line(text).await?,
                Input::Secret(secret) => self.send_secret(secret).await?,
            }

            let timeout = event.timeout.unwrap_or(default_timeout);
            let read = match &event.expect {
                Expect::Prompt => self.expect(ctx, WaitFor::Prompt, timeout).await?,
                Expect::Phrase(phrase) => self.expect(ctx, WaitFor::Substring(phrase), timeout).await?,
                Expect::PromptOr(phrases) => {
                    let phrases: Vec<&str> = phrases.iter().map(String::as_str).collect();
                    self.expect(ctx, WaitFor::PromptOr(&phrases), timeout).await?
                }
            };

            let matched_prompt = matches!(read.matched, Matched::Prompt(_));
            steps.push(InteractiveStep {
                input: event.input.display().to_string(),
                output: read.as_str().into_owned(),
                matched_prompt,
                elapsed: step_start.elapsed(),
            });
            if matched_prompt && matches!(event.expect, Expect::PromptOr(_)) {
                break;
            }
        }

        Ok(InteractiveResult {
            steps,
            elapsed: start.elapsed(),
        })
    }

    /// Change the administrator password.
    ///
    /// The session must already be in administrator mode.
    pub async fn change_administrator_password(
        &mut self,
        ctx: &Context,
        old: &SecretString,
        new: &SecretString,
    ) -> Result<()> {
        let timeout = self.profile().timeouts.password_prompt;
        let events = [
            InteractiveEvent::new("administrator password")
                .expect_phrase("Old_Password:")
                .with_timeout(timeout),
            InteractiveEvent::secret(old.clone())
                .expect_prompt_or(["New_Password:"])
                .with_timeout(timeout),
            InteractiveEvent::secret(new.clone())
                .expect_phrase("New_Password:")
                .with_timeout(timeout),
            InteractiveEvent::secret(new.clone()).with_timeout(timeout),
        ];
        self.run_password_change(ctx, "administrator", &events).await
    }

    /// Change the login password.
    ///
    /// The session must already be in administrator mode.
    pub async fn change_login_password(&mut self, ctx: &Context, new: &SecretString) -> Result<()> {
        let timeout = self.profile().timeouts.password_prompt;
        let events = [
            InteractiveEvent::new("login password")
                .expect_phrase("New_Password:")
                .with_timeout(timeout),
            InteractiveEvent::secret(new.clone())
                .expect_phrase("New_Password:")
                .with_timeout(timeout),
            InteractiveEvent::secret(new.clone()).with_timeout(timeout),
        ];
        self.run_password_change(ctx, "login", &events).await
    }

    async fn run_password_change(
        &mut self,
        ctx: &Context,
        target: &str,
        events: &[InteractiveEvent],
    ) -> Result<()> {
        let result = self.send_interactive(ctx, events).await?;
        let output = result.full_output();
        if !result.ended_at_prompt() || self.profile().auth_failed(&output) {
            warn!("{} password change rejected", target);
            return Err(AuthError::PasswordChangeRejected {
                target: target.to_string(),
                output,
            }
            .into());
        }
        info!("{} password changed", target);
        Ok(())
    }

    /// Regenerate the SSH server host key, confirming replacement of an
    /// existing key.
    ///
    /// The session must already be in administrator mode. Key generation
    /// can take minutes on older models.
    pub async fn generate_sshd_host_key(&mut self, ctx: &Context) -> Result<String> {
        const COMMAND: &str = "sshd host key generate";
        let timeout = self.profile().timeouts.host_key_generation;

        let events = [
            InteractiveEvent::new(COMMAND)
                .expect_prompt_or(HOST_KEY_CONFIRMATIONS.iter().copied())
                .with_timeout(timeout),
            InteractiveEvent::new("y").with_timeout(timeout),
        ];
        let result = self.send_interactive(ctx, &events).await?;
        if result.steps.len() > 1 {
            info!("Replaced existing host key");
        }
        let output = result.full_output();

        let prompt = self.prompt().map(str::to_string);
        let cleaned = clean_output(&output, COMMAND, prompt.as_deref());
        check_output(COMMAND, &cleaned, &self.profile().error_markers)?;
        Ok(cleaned)
    }
}
