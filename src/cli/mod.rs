//! CLI module for the timer board.
//!
//! This module provides the command-line interface:
//! - `commands`: Command definitions using clap derive
//! - `display`: Output formatting and display logic

pub mod commands;
pub mod display;

pub use commands::{BoardCommand, Cli, Commands, ConfigCommand, LibraryCommand, RunArgs};
pub use display::Display;
