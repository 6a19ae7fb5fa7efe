//! Timer Board Library
//!
//! This library provides the core functionality for the timer board CLI.
//! It includes:
//! - Countdown engine with notifications, toggle buttons and numeric entry
//! - End-of-countdown sequence with a cancellable watchdog
//! - Sound resolution, the user sound library and audio playback
//! - Persistence of card configurations and board settings
//! - CLI command parsing and display utilities

pub mod cli;
pub mod engine;
pub mod sound;
pub mod store;
pub mod types;

// Re-export commonly used types for convenience
pub use engine::{
    run_ticker, CountdownEngine, EndPlan, EndSequenceCoordinator, EngineError, TimerEvent,
    TimerPhase,
};

// Re-export sound types
pub use sound::{
    MockSoundPlayer, NoopSoundPlayer, RodioSoundPlayer, SoundError, SoundId, SoundLibrary,
    SoundPlayer, SoundResolver,
};

// Re-export store types
pub use store::{BoardStore, JsonFileStore, KeyValueStore, MemoryStore, SlotStore, StoreError};

// Re-export configuration types
pub use types::{BoardSettings, ReturnMode, SlotId, TimerCardConfig, TimerMode};
