//! Channel layer for pattern matching and PTY operations.
//!
//! This module handles the byte-level side of an interactive session:
//! ANSI stripping, prompt detection and cancellable reads.

mod buffer;
mod prompt;
mod pty;

pub use buffer::PatternBuffer;
pub use prompt::{CustomPromptDetector, DefaultPromptDetector, PromptDetector, compile_prompt_pattern};
pub use pty::{LINE_TERMINATOR, Matched, PtyConfig, ReadResult, ShellChannel, WaitFor};
