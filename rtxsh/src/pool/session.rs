//! Factory that dials router sessions for the pool.

use std::sync::Arc;

use log::debug;

use super::ResourceFactory;
use crate::context::Context;
use crate::driver::Session;
use crate::error::Result;
use crate::platform::DeviceProfile;
use crate::transport::SshConfig;

/// Opens a new SSH session per pool slot.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    ssh: SshConfig,
    profile: Arc<DeviceProfile>,
}

impl SessionFactory {
    pub fn new(ssh: SshConfig, profile: Arc<DeviceProfile>) -> Self {
        Self { ssh, profile }
    }

    pub fn ssh_config(&self) -> &SshConfig {
        &self.ssh
    }

    pub fn profile(&self) -> &Arc<DeviceProfile> {
        &self.profile
    }
}

impl ResourceFactory for SessionFactory {
    type Resource = Session;

    async fn create(&self, ctx: &Context) -> Result<Session> {
        debug!("Dialing new session to {}", self.ssh.socket_addr());
        Session::connect(ctx, self.ssh.clone(), self.profile.clone()).await
    }

    async fn close(&self, mut session: Session) {
        session.close().await;
    }
}
