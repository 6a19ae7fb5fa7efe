//! Timer board CLI - multi-timer countdowns in the terminal
//!
//! Each board slot holds a timer card with three modes:
//! - Threshold notifications with sounds and background colors
//! - Togglable notification buttons
//! - A looping end alarm with an optional voice insert

use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use timerboard::cli::{
    BoardCommand, Cli, Commands, ConfigCommand, Display, LibraryCommand, RunArgs,
};
use timerboard::engine::{run_ticker, CountdownEngine, TimerEvent};
use timerboard::sound::{
    try_create_player, NoopSoundPlayer, SoundLibrary, SoundPlayer, SoundResolver,
};
use timerboard::store::{BoardStore, JsonFileStore, KeyValueStore};
use timerboard::types::{SlotId, TimerCardConfig};

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(cli.verbose);

    // Execute command
    if let Err(e) = execute(cli).await {
        Display::show_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        // No command provided, show help
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Commands::Completions { shell } = command {
        generate_completions(shell);
        return Ok(());
    }

    let board = open_board(cli.store.as_deref())?;

    match command {
        Commands::Run(args) => run_slot(&board, args).await,
        Commands::Config(cmd) => config_command(&board, cmd),
        Commands::Library(cmd) => library_command(&board, cmd),
        Commands::Board(cmd) => board_command(&board, cmd),
        Commands::Completions { .. } => Ok(()),
    }
}

/// Opens the persisted store at `path`, or at the default location.
fn open_board(path: Option<&Path>) -> Result<BoardStore> {
    let store = match path {
        Some(path) => JsonFileStore::open(path),
        None => JsonFileStore::open_default(),
    }
    .context("ストアを開けません")?;
    debug!(path = %store.path().display(), "Using store");
    Ok(BoardStore::new(Arc::new(store)))
}

// ============================================================================
// run
// ============================================================================

/// Runs one slot until it resets, or until Ctrl-C.
async fn run_slot(board: &BoardStore, args: RunArgs) -> Result<()> {
    let slot = SlotId::new(args.slot.as_str());
    let player = create_player(&**board.inner(), args.no_sound);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut engine = CountdownEngine::load(board.slot(slot.clone()), board.load_settings(), player)
        .with_events(tx);

    if let Some(mode) = args.mode {
        engine.choose_mode(mode)?;
    }
    if let Some(digits) = &args.digits {
        for digit in digits.chars() {
            engine.push_digit(digit)?;
        }
    }
    for button in &args.buttons {
        engine.toggle_button_row(usize::from(*button) - 1)?;
    }
    engine.start()?;
    info!(slot = %slot, mode = engine.active_mode_index(), "Slot started");

    let config = engine.config().clone();
    let engine = Arc::new(Mutex::new(engine));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = run_ticker(Arc::clone(&engine), shutdown_rx);
    tokio::pin!(ticker);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                Display::show_event(&event, &config);
                match event {
                    TimerEvent::Finished { .. } if args.exit_on_finish => {
                        engine.lock().await.reset();
                        break;
                    }
                    TimerEvent::Reset { .. } => break,
                    _ => {}
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("シグナルを待機できません")?;
                debug!("Interrupted");
                engine.lock().await.reset();
                break;
            }
            () = &mut ticker => break,
        }
    }

    stop_ticker(&shutdown_tx);
    while let Ok(event) = rx.try_recv() {
        Display::show_event(&event, &config);
    }
    Ok(())
}

/// Signals the ticker to stop. Returns false if it had already gone.
fn stop_ticker(shutdown_tx: &watch::Sender<bool>) -> bool {
    if shutdown_tx.send(true).is_err() {
        debug!("Ticker already stopped");
        return false;
    }
    true
}

/// Builds the audio player, falling back to silence without an output device.
fn create_player(store: &dyn KeyValueStore, no_sound: bool) -> Arc<dyn SoundPlayer> {
    if no_sound {
        return Arc::new(NoopSoundPlayer);
    }

    let mut library = SoundLibrary::load(store);
    if let Err(e) = library.migrate_expiring_urls(store) {
        warn!("音声ライブラリの移行に失敗しました: {}", e);
    }
    let resolver = SoundResolver::new(Arc::new(RwLock::new(library)));

    if let Some(player) = try_create_player(resolver, false) {
        return player;
    }
    Display::show_warning("オーディオ出力が使えないため音なしで実行します");
    Arc::new(NoopSoundPlayer)
}

// ============================================================================
// config / library / board
// ============================================================================

fn config_command(board: &BoardStore, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { slot, json } => {
            let slot = SlotId::new(slot);
            let config = board.slot(slot.clone()).load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                Display::show_config(&slot, &config, &board.load_settings());
            }
        }
        ConfigCommand::Import { slot, file } => {
            let slot = SlotId::new(slot);
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("{}を読み込めません", file.display()))?;
            let config: TimerCardConfig =
                serde_json::from_str(&text).context("設定ファイルの形式が不正です")?;
            config.validate().map_err(anyhow::Error::msg)?;
            board.slot(slot.clone()).save_config(&config)?;

            let mut slots = board.load_slots();
            if !slots.contains(&slot) {
                slots.push(slot.clone());
                board.save_slots(&slots)?;
            }
            Display::show_success(&format!("スロット{slot}に設定を取り込みました"));
        }
    }
    Ok(())
}

fn library_command(board: &BoardStore, cmd: LibraryCommand) -> Result<()> {
    let store: &dyn KeyValueStore = board.inner().as_ref();
    let mut library = SoundLibrary::load(store);

    match cmd {
        LibraryCommand::List => Display::show_library(library.entries()),
        LibraryCommand::Add { file, name } => {
            let id = library.import_file(store, &file, name.as_deref())?;
            Display::show_success(&format!("音声を登録しました: {id}"));
        }
        LibraryCommand::Remove { id } => {
            library.remove(store, &id)?;
            Display::show_success(&format!("音声を削除しました: {id}"));
        }
        LibraryCommand::Rename { id, name } => {
            library.rename(store, &id, &name)?;
            Display::show_success(&format!("名前を変更しました: {name}"));
        }
        LibraryCommand::Volume { id, volume } => {
            library.set_volume(store, &id, f64::from(volume))?;
            Display::show_success(&format!("音量を{volume}%にしました"));
        }
    }
    Ok(())
}

fn board_command(board: &BoardStore, cmd: BoardCommand) -> Result<()> {
    match cmd {
        BoardCommand::Show => Display::show_board(
            &board.load_settings(),
            &board.load_slots(),
            &board.load_page_names(),
            board.page_locked(),
        ),
        BoardCommand::SetResetDelay { seconds } => {
            let settings = board.load_settings().with_auto_reset_seconds(seconds);
            board.save_settings(&settings)?;
            Display::show_success(&format!(
                "自動リセットを{}秒にしました",
                settings.auto_reset_seconds
            ));
        }
    }
    Ok(())
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
