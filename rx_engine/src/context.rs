use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::card::CardFrameSource;
use crate::config::EngineConfig;
use crate::events::EventLog;
use crate::media::{CompletionHandle, MediaPlayer, MovieGate};
use crate::render::TransitionRequests;
use crate::stack::{ArchiveProvider, SimpleCardDescriptor, StackResolver};
use crate::state::{GameState, GameVariables};
use crate::variables::EngineVariables;

/// State shared by every engine context. One per world; passed explicitly
/// instead of living in a global.
pub struct EngineContext {
    pub config: EngineConfig,
    pub resolver: StackResolver,
    pub variables: EngineVariables,
    pub game: GameVariables,
    pub frames: Arc<CardFrameSource>,
    pub events: EventLog,
    pub transitions: TransitionRequests,
    pub media: Arc<dyn MediaPlayer>,
    pub movie_gate: Arc<MovieGate>,
    blocking_movie: AtomicBool,
    location: Mutex<Option<SimpleCardDescriptor>>,
    torn_down: AtomicBool,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn ArchiveProvider>,
        media: Arc<dyn MediaPlayer>,
    ) -> Self {
        let movie_gate = Arc::new(MovieGate::default());
        media.attach(CompletionHandle::new(movie_gate.clone()));
        Self {
            variables: EngineVariables::new(config.initial_variables()),
            events: EventLog::with_capacity(config.event_log_capacity),
            config,
            resolver: StackResolver::new(provider),
            game: GameVariables::default(),
            frames: Arc::new(CardFrameSource::default()),
            transitions: TransitionRequests::default(),
            media,
            movie_gate,
            blocking_movie: AtomicBool::new(false),
            location: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn blocking_movie(&self) -> bool {
        self.blocking_movie.load(Ordering::SeqCst)
    }

    pub(crate) fn set_blocking_movie(&self, blocking: bool) {
        self.blocking_movie.store(blocking, Ordering::SeqCst);
    }

    pub fn location(&self) -> Option<SimpleCardDescriptor> {
        self.location
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn set_location(&self, location: Option<SimpleCardDescriptor>) {
        *self
            .location
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = location;
    }

    pub fn game_state(&self) -> GameState {
        GameState {
            location: self.location(),
            variables: self.game.snapshot(),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Marks the context dead; true only for the first caller.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }
}
