//! Command output post-processing: echo and prompt removal, and detection
//! of errors the device reports in-band.

use crate::error::{DeviceError, DeviceErrorKind, Error, Result};
use crate::redact::redact_command;

/// Markers that indicate the device rejected a command (matched case-insensitively).
pub const DEFAULT_ERROR_MARKERS: &[&str] = &[
    "Error:",
    "% Error:",
    "Command failed:",
    "Invalid parameter",
    "Permission denied",
    "Connection timeout",
    "already exists",
    "not found",
];

/// Strip the echoed command and the trailing prompt line from raw output.
///
/// Carriage returns are dropped and the result is trimmed. If `prompt` is
/// given, a final line equal to it is removed; otherwise a final line that
/// is a bare `>`/`#` or a bracketed prompt is removed.
pub fn clean_output(raw: &str, command: &str, prompt: Option<&str>) -> String {
    let normalized = raw.replace('\r', "");
    let mut lines: Vec<&str> = normalized.split('\n').collect();

    let command = command.trim();
    if !command.is_empty()
        && let Some(pos) = lines.iter().position(|l| l.trim() == command)
    {
        lines.drain(..=pos);
    }

    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    if let Some(last) = lines.last().map(|l| l.trim()) {
        let is_prompt = match prompt {
            Some(p) => last == p.trim(),
            None => last == ">" || last == "#" || (last.starts_with('[') && last.ends_with(['>', '#'])),
        };
        if is_prompt {
            lines.pop();
        }
    }

    lines.join("\n").trim().to_string()
}

/// Find the first line reporting an error and classify it.
pub fn classify<S: AsRef<str>>(output: &str, markers: &[S]) -> Option<(DeviceErrorKind, String)> {
    output.lines().find_map(|line| {
        let lower = line.to_lowercase();
        markers
            .iter()
            .any(|m| lower.contains(&m.as_ref().to_lowercase()))
            .then(|| (kind_of(&lower), line.trim().to_string()))
    })
}

fn kind_of(lower: &str) -> DeviceErrorKind {
    if lower.contains("busy") {
        DeviceErrorKind::Busy
    } else if lower.contains("conflict") {
        DeviceErrorKind::Conflict
    } else if lower.contains("timeout") || lower.contains("timed out") {
        DeviceErrorKind::Timeout
    } else if lower.contains("already exists") {
        DeviceErrorKind::AlreadyExists
    } else if lower.contains("not found") {
        DeviceErrorKind::NotFound
    } else if lower.contains("permission denied") {
        DeviceErrorKind::PermissionDenied
    } else if lower.contains("invalid parameter") {
        DeviceErrorKind::InvalidParameter
    } else {
        DeviceErrorKind::CommandFailed
    }
}

/// Return a [`DeviceError`] if `output` contains an error marker.
pub fn check_output<S: AsRef<str>>(command: &str, output: &str, markers: &[S]) -> Result<()> {
    match classify(output, markers) {
        Some((kind, message)) => Err(Error::Device(DeviceError {
            kind,
            command: redact_command(command),
            message,
            output: output.to_string(),
        })),
        None => Ok(()),
    }
}

/// Like [`check_output`] but treats a "not found" report as success.
///
/// Used for idempotent deletes.
pub fn check_output_ignoring_not_found<S: AsRef<str>>(
    command: &str,
    output: &str,
    markers: &[S],
) -> Result<()> {
    match check_output(command, output, markers) {
        Err(e) if e.device_kind() == Some(DeviceErrorKind::NotFound) => Ok(()),
        other => other,
    }
}
