mod app;
mod config;
mod constants;
mod coordinator;
mod engine;
mod error;
mod input;
mod item;
mod logging;
mod player;
mod provider;
mod queue;
mod search;
mod session;
#[cfg(test)]
mod testing;
mod timer;
mod ui;
mod youtube;

use anyhow::{Result, bail};
use clap::Parser;
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use app::App;
use config::Config;
use coordinator::PlaybackState;
use engine::{Engine, EngineConfig, EngineEvent};
use player::MpvSession;
use search::SortMode;
use youtube::YtDlp;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Search query or YouTube link to start with
  query: Vec<String>,

  /// Result ordering (default: last used)
  #[arg(short, long, value_enum)]
  sort: Option<SortMode>,

  /// Don't start playing the first result automatically
  #[arg(long)]
  no_autoplay: bool,

  /// Play audio only, without an mpv window
  #[arg(long)]
  audio_only: bool,

  /// Write logs to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  /// No TUI: play the results of the query in order until the queue ends
  #[arg(long)]
  headless: bool,
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  logging::init_logging(args.log_stderr || args.headless)?;

  let config = Config::load();
  let sort = args.sort.unwrap_or_else(|| config.sort_mode());
  let engine_config =
    EngineConfig { autoplay: args.headless || (config.autoplay() && !args.no_autoplay), ..EngineConfig::default() };
  info!(sort = %sort, autoplay = engine_config.autoplay, headless = args.headless, "ypq starting");

  let (playback_tx, playback_rx) = mpsc::unbounded_channel();
  let yt_dlp = Arc::new(YtDlp::default());
  let session = Arc::new(MpvSession::new(config.video() && !args.audio_only, playback_tx));
  let engine = Engine::new(engine_config, yt_dlp.clone(), yt_dlp, session, playback_rx);
  let query = args.query.join(" ");

  if args.headless {
    return run_headless(engine, &query, sort).await;
  }

  let default_hook = std::panic::take_hook();
  std::panic::set_hook(Box::new(move |info| {
    ratatui::restore();
    default_hook(info);
  }));

  let mut terminal = ratatui::init();
  let result = run(&mut terminal, App::new(engine, config, sort), query).await;
  ratatui::restore();
  result
}

async fn run(terminal: &mut DefaultTerminal, mut app: App, query: String) -> Result<()> {
  if !query.trim().is_empty() {
    app.cursor_position = query.chars().count();
    app.input = query;
    app.submit().await;
  }

  loop {
    app.check_pending().await?;
    app.expire_error();

    terminal.draw(|frame| ui::ui(frame, &mut app))?;

    if event::poll(Duration::from_millis(100))? {
      match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
          input::handle_key_event(&mut app, key).await?;
        }
        _ => {}
      }
    }

    if app.should_quit {
      break;
    }
  }

  app.engine.shutdown().await;
  Ok(())
}

/// Play through the results of `query` without a UI, printing each title as it starts.
async fn run_headless(mut engine: Engine, query: &str, sort: SortMode) -> Result<()> {
  if query.trim().is_empty() {
    bail!("--headless needs a query or a link");
  }
  let mut events = engine.subscribe();
  engine.submit(query, sort).await?;
  let mut started = false;

  'run: loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        info!("headless: interrupted");
        break;
      }
      outcome = engine.step() => {
        if outcome.is_none() {
          break;
        }
      }
    }

    while let Ok(event) = events.try_recv() {
      match event {
        EngineEvent::State(PlaybackState::Playing(id)) => {
          if let Some(item) = engine.queue().item(id) {
            println!("▶ {}  {}", item.title(), item.share_link());
          }
          started = true;
        }
        EngineEvent::State(PlaybackState::Idle) if started => break 'run,
        EngineEvent::Status(msg) => println!("{}", msg),
        EngineEvent::ResolutionFailed { reason, .. } | EngineEvent::PlaybackFailed { reason, .. } => {
          warn!(err = %reason, "headless: skipping item");
        }
        EngineEvent::FetchFailed { reason, .. } if engine.queue().is_empty() => {
          engine.shutdown().await;
          bail!("search failed: {}", reason);
        }
        _ => {}
      }
    }

    // Link lookups and searches with no results leave nothing to play.
    if !started && !engine.is_fetching() && engine.queue().is_empty() {
      break;
    }
  }

  engine.shutdown().await;
  Ok(())
}
