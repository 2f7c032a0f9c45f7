//! Application Layer
//!
//! This module contains:
//! - Console: bridges a terminal (stdin/stdout) to one link for the CLI

mod console;

pub use console::{Command, Console, Outcome};
