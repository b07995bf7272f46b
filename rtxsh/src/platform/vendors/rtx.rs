//! Yamaha RTX platform definition.
//!
//! RTX routers prompt with `>` after login and `#` in administrator
//! mode. The hostname, when configured, appears in brackets in front of
//! the terminator (`[RTX1210] > `).

use crate::output::DEFAULT_ERROR_MARKERS;
use crate::platform::{DeviceProfile, PrivilegeLevel, PrivilegeMode};

/// Phrases printed when leaving administrator mode with unsaved changes.
pub const SAVE_CONFIRMATIONS: &[&str] = &[
    "save configuration?",
    "設定を保存しますか",
    "save config?",
    "(y/n)",
    "(yes/no)",
    "save changes?",
    "保存しますか",
];

/// Confirmation printed by `sshd host key generate` when a key already exists.
pub const HOST_KEY_CONFIRMATIONS: &[&str] = &["(y/n)", "(yes/no)", "更新しますか"];

/// Create the RTX device profile.
pub fn profile() -> DeviceProfile {
    let normal = PrivilegeLevel::new(PrivilegeMode::Normal, '>').with_deescalate("exit");

    let administrator = PrivilegeLevel::new(PrivilegeMode::Administrator, '#')
        .with_escalate("administrator")
        .with_auth("Password:")
        .with_deescalate("exit");

    let mut profile = DeviceProfile::new("yamaha_rtx")
        .with_normal(normal)
        .with_administrator(administrator)
        .with_on_open_command("console character en.ascii")
        .with_on_open_command("console lines infinity")
        .with_auth_failure_keyword("incorrect")
        .with_auth_failure_keyword("failed")
        .with_auth_failure_keyword("invalid")
        .with_save_answer("Y");

    for marker in DEFAULT_ERROR_MARKERS {
        profile = profile.with_error_marker(*marker);
    }
    for phrase in SAVE_CONFIRMATIONS {
        profile = profile.with_save_confirmation(*phrase);
    }
    for command in [
        "dhcp scope bind",
        "dhcp scope unbind",
        "show config",
        "show dhcp scope bind",
        "ip host",
        "ip route",
        "save",
    ] {
        profile = profile.with_administrator_command(command);
    }
    profile
}
