use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::info;
use rx_engine::{DirectoryProvider, EngineConfig, GameState, RecordingMediaPlayer, World};

use crate::cli::RunArgs;

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

pub fn execute(args: RunArgs) -> Result<()> {
    let RunArgs {
        data_root,
        config,
        start,
        viewport,
        clicks,
        frames,
        load_state,
        event_log_json,
        save_state,
    } = args;

    let mut config =
        EngineConfig::from_json_file(config.as_deref()).context("loading engine config")?;
    if let Some(viewport) = viewport {
        config.viewport = viewport;
    }
    let start = start.or_else(|| config.start.take());

    let provider = Arc::new(DirectoryProvider::new(&data_root));
    let media = Arc::new(RecordingMediaPlayer::auto_completing());
    let world = World::new(config, provider, media.clone()).context("starting world")?;

    if let Some(path) = load_state.as_ref() {
        let state = GameState::load(path)?;
        world
            .restore(state)
            .with_context(|| format!("restoring game state from {}", path.display()))?;
    } else if let Some(location) = start {
        world
            .goto(location.clone())
            .with_context(|| format!("opening start card {location}"))?;
    }
    match world.location() {
        Some(location) => println!("Opened card {location}"),
        None => println!("No card opened"),
    }

    for click in &clicks {
        world.pointer_moved(*click)?;
        world.pointer_down()?;
        world.pointer_up()?;
        if !world.wait_for_idle(IDLE_TIMEOUT) {
            eprintln!("[rx_engine] warning: click at {click:?} still running after {IDLE_TIMEOUT:?}");
        }
    }

    let clock = Instant::now();
    let mut last = None;
    for frame in 0..frames {
        let now = clock + FRAME_INTERVAL * frame;
        last = Some(world.display_tick(now)?);
    }
    if let Some(report) = last.as_ref() {
        println!(
            "Render state after {frames} frames: {} (blend {:.2})",
            report.current, report.blend
        );
        for layer in &report.layers {
            println!("  - {layer}");
        }
    }
    info!("media requests: {}", media.events().len());

    if let Some(path) = event_log_json.as_ref() {
        world.event_log().write_json(path)?;
        println!("Saved event log to {}", path.display());
    }
    if let Some(path) = save_state.as_ref() {
        world.game_state().save(path)?;
        println!("Saved game state to {}", path.display());
    }

    world.teardown();
    Ok(())
}
