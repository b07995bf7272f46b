//! Redaction of secrets in commands before they reach the log.

/// Substrings that mark a command as carrying a secret.
const SENSITIVE_WORDS: &[&str] = &[
    "password",
    "pre-shared-key",
    "secret",
    "community",
    "token",
    "key",
    "credential",
];

/// Replacement text for redacted arguments.
pub const REDACTED: &str = "[REDACTED]";

/// Whether `text` mentions any sensitive keyword (case-insensitive).
pub fn is_sensitive(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    SENSITIVE_WORDS.iter().any(|w| lower.contains(w))
}

/// Redact every argument after the first sensitive keyword.
///
/// `ipsec ike pre-shared-key 1 text s3cret` becomes
/// `ipsec ike pre-shared-key [REDACTED]`. Commands without sensitive
/// keywords are returned unchanged.
pub fn redact_command(command: &str) -> String {
    let mut words = command.split_whitespace();
    let mut out = Vec::new();
    for word in words.by_ref() {
        out.push(word);
        if is_sensitive(word) {
            break;
        }
    }
    if words.next().is_some() {
        out.push(REDACTED);
        out.join(" ")
    } else {
        command.to_string()
    }
}
