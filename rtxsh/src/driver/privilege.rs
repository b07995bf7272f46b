//! Administrator mode transitions.
//!
//! RTX has two levels: the login level (`>`) and administrator mode
//! (`#`), entered with `administrator` plus a password. Leaving
//! administrator mode with unsaved changes makes the router ask whether
//! to save; that question is answered with the profile's save answer.

use log::{debug, info, warn};
use secrecy::SecretString;

use super::session::Session;
use crate::channel::{Matched, WaitFor};
use crate::context::Context;
use crate::error::{AuthError, Result};
use crate::platform::PrivilegeMode;

impl Session {
    /// Enter administrator mode.
    ///
    /// Does nothing if the session is already elevated. A reply carrying
    /// one of the profile's failure keywords is reported as
    /// [`AuthError::AdministratorRejected`]; a reply that ends in a
    /// non-administrator prompt as [`AuthError::AdministratorPromptMissing`].
    pub async fn enter_administrator_mode(&mut self, ctx: &Context, password: &SecretString) -> Result<()> {
        if self.is_administrator() {
            return Ok(());
        }

        let profile = self.profile().clone();
        let level = &profile.administrator;
        let command = level.escalate_command.as_deref().unwrap_or("administrator");
        let auth_prompt = level.auth_prompt.as_deref().unwrap_or("Password:");
        let timeouts = &profile.timeouts;

        debug!("Entering administrator mode");
        self.write_line(command).await?;
        self.expect(ctx, WaitFor::Substring(auth_prompt), timeouts.password_prompt)
            .await?;

        self.send_secret(password).await?;
        let reply = self.expect(ctx, WaitFor::Prompt, timeouts.password_prompt).await?;
        let output = reply.as_str().into_owned();

        if profile.auth_failed(&output) {
            warn!("Administrator password rejected");
            self.set_administrator_mode(false);
            return Err(AuthError::AdministratorRejected { output }.into());
        }
        let elevated = reply
            .prompt()
            .is_some_and(|p| profile.mode_of(p) == PrivilegeMode::Administrator);
        if !elevated {
            warn!("Administrator prompt not shown after authentication");
            return Err(AuthError::AdministratorPromptMissing { output }.into());
        }

        self.set_administrator_mode(true);
        info!("Entered administrator mode");
        Ok(())
    }

    /// Leave administrator mode, answering a save confirmation if asked.
    pub async fn exit_administrator_mode(&mut self, ctx: &Context) -> Result<()> {
        if !self.is_administrator() {
            return Ok(());
        }

        let profile = self.profile().clone();
        let phrases = profile.save_phrases();
        let timeout = profile.timeouts.exit;

        debug!("Leaving administrator mode");
        self.write_line(&profile.administrator.deescalate_command).await?;
        let reply = self.expect(ctx, WaitFor::PromptOr(&phrases), timeout).await?;

        if let Matched::Phrase(phrase) = &reply.matched {
            info!("Save confirmation ({:?}), answering {:?}", phrase, profile.save_answer);
            self.write_line(&profile.save_answer).await?;
            self.expect(ctx, WaitFor::Prompt, timeout).await?;
        }

        self.set_administrator_mode(false);
        debug!("Left administrator mode");
        Ok(())
    }
}
