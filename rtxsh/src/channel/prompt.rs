//! Prompt detection.
//!
//! The router has no message framing: the only sign that a command has
//! finished is the prompt being redisplayed. A detector looks at the end
//! of the accumulated output and decides whether it is a prompt.

use std::fmt;

use memchr::memrchr;
use regex::bytes::Regex;

/// Decides whether a buffer ends in a device prompt.
pub trait PromptDetector: Send + Sync + fmt::Debug {
    /// Returns the prompt (without trailing whitespace) if `buffer` ends in one.
    fn detect(&self, buffer: &[u8]) -> Option<String>;
}

/// Heuristic detector for `>` / `#` style prompts.
///
/// The last line is a prompt when it is shorter than `max_line_len`
/// characters, does not start with whitespace or a comment marker, and
/// ends with the normal or elevated terminator, optionally followed by a
/// single space. A line consisting of the terminator alone is accepted
/// even though it starts with `#`.
#[derive(Debug, Clone)]
pub struct DefaultPromptDetector {
    normal_terminator: char,
    elevated_terminator: char,
    comment_marker: char,
    max_line_len: usize,
}

impl DefaultPromptDetector {
    pub fn new(normal_terminator: char, elevated_terminator: char) -> Self {
        Self {
            normal_terminator,
            elevated_terminator,
            comment_marker: '#',
            max_line_len: 100,
        }
    }

    /// Set the maximum prompt length in characters.
    pub fn with_max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }

    /// Whether `prompt` ends with the elevated terminator.
    pub fn is_elevated(&self, prompt: &str) -> bool {
        prompt.trim_end().ends_with(self.elevated_terminator)
    }
}

impl Default for DefaultPromptDetector {
    fn default() -> Self {
        Self::new('>', '#')
    }
}

impl PromptDetector for DefaultPromptDetector {
    fn detect(&self, buffer: &[u8]) -> Option<String> {
        let start = memrchr(b'\n', buffer).map_or(0, |i| i + 1);
        let line = std::str::from_utf8(&buffer[start..]).ok()?;
        let line = line.trim_start_matches('\r');

        if line.is_empty() || line.chars().count() >= self.max_line_len {
            return None;
        }

        let prompt = line.strip_suffix(' ').unwrap_or(line);
        let bare = prompt.len() == 1;
        if prompt.starts_with(char::is_whitespace)
            || (prompt.starts_with(self.comment_marker) && !bare)
        {
            return None;
        }

        (prompt.ends_with(self.normal_terminator) || prompt.ends_with(self.elevated_terminator))
            .then(|| prompt.to_string())
    }
}

/// Detector for a caller-supplied prompt pattern.
#[derive(Debug, Clone)]
pub struct CustomPromptDetector {
    pattern: Regex,
}

impl CustomPromptDetector {
    /// Compile `pattern`, anchoring it to the end of the buffer.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: compile_prompt_pattern(pattern)?,
        })
    }
}

impl PromptDetector for CustomPromptDetector {
    fn detect(&self, buffer: &[u8]) -> Option<String> {
        self.pattern
            .find(buffer)
            .map(|m| String::from_utf8_lossy(m.as_bytes()).trim().to_string())
    }
}

/// Compile a prompt pattern string into a regex.
///
/// Patterns without an end anchor get `\s*$` appended.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("{}\\s*$", pattern)
    };

    Regex::new(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(buf: &str) -> Option<String> {
        DefaultPromptDetector::default().detect(buf.as_bytes())
    }

    #[test]
    fn test_normal_and_elevated_prompts() {
        assert_eq!(detect("show environment\r\nuptime 3days\r\nrtx1210>"), Some("rtx1210>".into()));
        assert_eq!(detect("output\r\n[RTX1210] > "), Some("[RTX1210] >".into()));
        assert_eq!(detect("output\r\n[RTX1210] # "), Some("[RTX1210] #".into()));
        assert_eq!(detect("\r\n> "), Some(">".into()));
        assert_eq!(detect("# "), Some("#".into()));
    }

    #[test]
    fn test_rejects_indented_and_comment_lines() {
        assert_eq!(detect("show config\r\n ip lan1 address 192.168.0.1/24 #"), None);
        assert_eq!(detect("\tdescription lan1 >"), None);
        assert_eq!(detect("# RTX1210 Rev.14.01.38 #"), None);
    }

    #[test]
    fn test_rejects_missing_terminator() {
        assert_eq!(detect("Password:"), None);
        assert_eq!(detect("show config\r\n"), None);
        assert_eq!(detect(""), None);
        assert_eq!(detect("rtx1210>  "), None);
    }

    #[test]
    fn test_rejects_long_lines() {
        let long = format!("{}>", "x".repeat(120));
        assert_eq!(detect(&long), None);
        let short = format!("{}>", "x".repeat(50));
        assert!(detect(&short).is_some());
    }

    #[test]
    fn test_partial_utf8_is_not_a_prompt() {
        let mut buf = b"rtx>".to_vec();
        buf.push(0xe4);
        assert_eq!(DefaultPromptDetector::default().detect(&buf), None);
    }

    #[test]
    fn test_custom_terminators() {
        let d = DefaultPromptDetector::new('$', '#');
        assert_eq!(d.detect(b"user@host$ "), Some("user@host$".into()));
        assert!(d.is_elevated("root@host#"));
        assert!(!d.is_elevated("user@host$"));
    }

    #[test]
    fn test_custom_detector() {
        let d = CustomPromptDetector::new(r"\[RTX1210\] [>#]").unwrap();
        assert_eq!(d.detect(b"output\r\n[RTX1210] # "), Some("[RTX1210] #".into()));
        assert_eq!(d.detect(b"[RTX1210] # more output"), None);
    }

    #[test]
    fn test_compile_prompt_pattern() {
        let pattern = compile_prompt_pattern(r"router#").unwrap();
        assert!(pattern.is_match(b"router# "));

        let pattern = compile_prompt_pattern(r"router#$").unwrap();
        assert!(pattern.is_match(b"router#"));
        assert!(!pattern.is_match(b"router# "));
    }

    #[test]
    fn test_invalid_custom_pattern() {
        assert!(CustomPromptDetector::new("([").is_err());
    }
}
