//! Command definitions for the timer board CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::sanitize::AUTO_RESET_RANGE;
use crate::types::MAX_BUTTON_ROWS;

// ============================================================================
// CLI Structure
// ============================================================================

/// Timer board CLI - multi-timer countdowns with notifications and alarms
#[derive(Parser, Debug)]
#[command(
    name = "timerboard",
    version,
    about = "通知とアラーム付きのマルチタイマーボード",
    long_about = "タイマーボードの各スロットをターミナルから実行・設定します。\n\
                  設定と音声ライブラリはローカルのストアに保存されます。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path of the persisted store (defaults to the user data directory)
    #[arg(long, global = true, env = "TIMERBOARD_STORE")]
    pub store: Option<PathBuf>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one timer slot in the terminal
    Run(RunArgs),

    /// Show or import a slot's configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Manage the sound library
    #[command(subcommand)]
    Library(LibraryCommand),

    /// Show or change board-wide settings
    #[command(subcommand)]
    Board(BoardCommand),

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Arguments for the run command
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Timer slot to run
    #[arg(short, long, default_value = "0")]
    pub slot: String,

    /// Mode to run (A, B or C)
    #[arg(short, long, value_parser = parse_mode)]
    pub mode: Option<usize>,

    /// Digits for numeric entry, e.g. 930 for 9:30
    #[arg(short, long, value_parser = validate_digits)]
    pub digits: Option<String>,

    /// Button rows to switch on (1-4, repeatable)
    #[arg(
        short,
        long = "button",
        value_parser = clap::value_parser!(u8).range(1..=MAX_BUTTON_ROWS as i64)
    )]
    pub buttons: Vec<u8>,

    /// Disable all sounds
    #[arg(long)]
    pub no_sound: bool,

    /// Exit (stopping the end alarm) as soon as the countdown finishes
    #[arg(long)]
    pub exit_on_finish: bool,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print the sanitized configuration of a slot
    Show {
        /// Timer slot
        #[arg(short, long, default_value = "0")]
        slot: String,

        /// Print the stored JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Import a configuration file into a slot (it is sanitized first)
    Import {
        /// Timer slot
        #[arg(short, long, default_value = "0")]
        slot: String,

        /// JSON file holding the configuration
        file: PathBuf,
    },
}

/// Sound library subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum LibraryCommand {
    /// List registered sounds
    List,

    /// Register an audio file (1MB max)
    Add {
        /// Audio file to register
        file: PathBuf,

        /// Display name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove a sound
    Remove {
        /// Sound id
        id: String,
    },

    /// Rename a sound
    Rename {
        /// Sound id
        id: String,
        /// New display name
        name: String,
    },

    /// Set a sound's individual volume
    Volume {
        /// Sound id
        id: String,
        /// Volume (0-100)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        volume: u8,
    },
}

/// Board subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum BoardCommand {
    /// Show board settings, slots and pages
    Show,

    /// Set the delay before a finished timer resets itself
    SetResetDelay {
        /// Seconds (5-60)
        #[arg(value_parser = clap::value_parser!(u32).range(
            i64::from(AUTO_RESET_RANGE.0)..=i64::from(AUTO_RESET_RANGE.1)
        ))]
        seconds: u32,
    },
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Parses a mode as a letter (`A`-`C`) or an index (`0`-`2`).
fn parse_mode(s: &str) -> Result<usize, String> {
    match s.trim().to_ascii_uppercase().as_str() {
        "A" | "0" => Ok(0),
        "B" | "1" => Ok(1),
        "C" | "2" => Ok(2),
        _ => Err("モードはA/B/Cのいずれかを指定してください".to_string()),
    }
}

/// Validates numeric entry digits.
///
/// - Must not be empty
/// - Must only contain 0-9
fn validate_digits(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("数字を指定してください".to_string());
    }
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err("数字のみを指定してください".to_string());
    }
    Ok(s.to_string())
}

// ============================================================================
// Tests
// ============================================================================
