use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::debug;
use serde::Serialize;

/// What the script engine asks the media collaborator to play.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    Movie {
        code: u16,
        movie: u16,
        looping: bool,
    },
    Sound {
        id: u16,
        volume: u16,
    },
    SoundGroup {
        index: u16,
        sounds: Vec<u16>,
        volume: u16,
        looping: bool,
    },
}

impl MediaRef {
    pub fn movie_code(&self) -> Option<u16> {
        match self {
            MediaRef::Movie { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Media playback collaborator. Decoding and output live behind it.
///
/// Every `start` of a blocking movie must eventually be answered by exactly
/// one completion through the [`CompletionHandle`] handed to `attach`, or by
/// the host calling the world's movie-finished entry point.
pub trait MediaPlayer: Send + Sync {
    fn start(&self, media: &MediaRef, blocking: bool);
    fn stop(&self, media: &MediaRef);

    /// Playback position of the movie registered under `code`, if playing.
    fn position(&self, _code: u16) -> Option<Duration> {
        None
    }

    fn attach(&self, _completion: CompletionHandle) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Completed,
    Skipped,
    Aborted,
}

#[derive(Debug, Default)]
struct GateState {
    waiting: Option<u16>,
    outcome: Option<GateOutcome>,
    aborted: bool,
}

/// Rendezvous between the script context blocked on a movie and whoever
/// reports its completion.
#[derive(Debug, Default)]
pub struct MovieGate {
    state: Mutex<GateState>,
    signal: Condvar,
}

impl MovieGate {
    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arms the gate for `code`. Must precede the media start so an
    /// immediate completion is not lost.
    pub fn arm(&self, code: u16) {
        let mut state = self.lock();
        state.waiting = Some(code);
        state.outcome = None;
    }

    pub fn waiting_on(&self) -> Option<u16> {
        self.lock().waiting
    }

    /// Reports completion of `code`; returns false when nobody waits on it.
    pub fn complete(&self, code: u16) -> bool {
        self.resolve(Some(code), GateOutcome::Completed)
    }

    pub fn skip(&self) -> bool {
        self.resolve(None, GateOutcome::Skipped)
    }

    fn resolve(&self, code: Option<u16>, outcome: GateOutcome) -> bool {
        let mut state = self.lock();
        let matches = match (state.waiting, code) {
            (Some(waiting), Some(code)) => waiting == code,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches || state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        self.signal.notify_all();
        true
    }

    /// Releases any waiter for good; later waits return immediately.
    pub fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        self.signal.notify_all();
    }

    pub fn wait(&self) -> GateOutcome {
        let mut state = self.lock();
        loop {
            if state.aborted {
                state.waiting = None;
                return GateOutcome::Aborted;
            }
            if let Some(outcome) = state.outcome.take() {
                state.waiting = None;
                return outcome;
            }
            state = self
                .signal
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Cloneable handle a media player uses to report finished movies.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    gate: Arc<MovieGate>,
}

impl CompletionHandle {
    pub fn new(gate: Arc<MovieGate>) -> Self {
        Self { gate }
    }

    pub fn finished(&self, code: u16) -> bool {
        self.gate.complete(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MediaEvent {
    Start { media: MediaRef, blocking: bool },
    Stop { media: MediaRef },
}

/// Player that only records requests. With `auto_complete` it finishes
/// blocking movies as soon as they start.
#[derive(Debug, Default)]
pub struct RecordingMediaPlayer {
    events: Mutex<Vec<MediaEvent>>,
    positions: Mutex<HashMap<u16, Duration>>,
    completion: Mutex<Option<CompletionHandle>>,
    auto_complete: bool,
}

impl RecordingMediaPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<MediaEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_position(&self, code: u16, position: Duration) {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(code, position);
    }
}

impl MediaPlayer for RecordingMediaPlayer {
    fn start(&self, media: &MediaRef, blocking: bool) {
        debug!("media start {media:?} blocking={blocking}");
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(MediaEvent::Start {
                media: media.clone(),
                blocking,
            });
        if !(blocking && self.auto_complete) {
            return;
        }
        let completion = self
            .completion
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let (Some(handle), Some(code)) = (completion, media.movie_code()) {
            handle.finished(code);
        }
    }

    fn stop(&self, media: &MediaRef) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(MediaEvent::Stop {
                media: media.clone(),
            });
        if let Some(code) = media.movie_code() {
            self.positions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&code);
        }
    }

    fn position(&self, code: u16) -> Option<Duration> {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&code)
            .copied()
    }

    fn attach(&self, completion: CompletionHandle) {
        *self
            .completion
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(completion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completion_is_delivered_once_per_arm() {
        let gate = Arc::new(MovieGate::default());
        gate.arm(7);
        assert!(!gate.complete(8));
        assert!(gate.complete(7));
        assert!(!gate.complete(7));
        assert_eq!(gate.wait(), GateOutcome::Completed);
        assert_eq!(gate.waiting_on(), None);
        assert!(!gate.complete(7));
    }

    #[test]
    fn waiter_is_released_from_another_thread() {
        let gate = Arc::new(MovieGate::default());
        gate.arm(3);
        let handle = CompletionHandle::new(gate.clone());
        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.finished(3)
        });
        assert_eq!(gate.wait(), GateOutcome::Completed);
        assert!(finisher.join().unwrap());
    }

    #[test]
    fn abort_releases_current_and_future_waits() {
        let gate = Arc::new(MovieGate::default());
        gate.arm(1);
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        thread::sleep(Duration::from_millis(20));
        gate.abort();
        assert_eq!(waiter.join().unwrap(), GateOutcome::Aborted);
        gate.arm(2);
        assert_eq!(gate.wait(), GateOutcome::Aborted);
    }

    #[test]
    fn auto_completing_player_finishes_blocking_movies() {
        let gate = Arc::new(MovieGate::default());
        let player = RecordingMediaPlayer::auto_completing();
        player.attach(CompletionHandle::new(gate.clone()));
        let movie = MediaRef::Movie {
            code: 5,
            movie: 100,
            looping: false,
        };
        gate.arm(5);
        player.start(&movie, true);
        assert_eq!(gate.wait(), GateOutcome::Completed);
        player.stop(&movie);
        assert_eq!(
            player.events(),
            vec![
                MediaEvent::Start {
                    media: movie.clone(),
                    blocking: true
                },
                MediaEvent::Stop { media: movie },
            ]
        );
    }
}
