//! Built-in device profiles.

pub mod rtx;
