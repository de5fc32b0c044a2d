use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::{ScriptError, WorldError};
use crate::events::EventLog;
use crate::geometry::{Point, Size};
use crate::media::MediaPlayer;
use crate::render::{FrameInputs, FrameReport, RenderStateKind, StateCompositor};
use crate::script::ScriptEngine;
use crate::stack::{ArchiveProvider, SimpleCardDescriptor};
use crate::state::GameState;
use crate::variables::{EngineValue, EngineVariables};

type Reply = Sender<Result<(), ScriptError>>;

enum ScriptMessage {
    Goto {
        location: SimpleCardDescriptor,
        reply: Option<Reply>,
    },
    Restore {
        state: GameState,
        reply: Reply,
    },
    PointerMoved(Point),
    PointerDown,
    PointerUp,
    Viewport(Size),
    MovieFinished(u16),
    Tick,
    Shutdown,
}

enum StackMessage {
    Preload(String),
    Shutdown,
}

/// Counts queued work so callers can wait until every context is idle.
#[derive(Default)]
struct WorkCounter {
    pending: Mutex<usize>,
    settled: Condvar,
}

impl WorkCounter {
    fn add(&self) {
        *self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
    }

    fn finish(&self) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.settled.notify_all();
        }
    }

    fn clear(&self) {
        *self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = 0;
        self.settled.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (pending, _) = self
            .settled
            .wait_timeout_while(pending, timeout, |pending| *pending > 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *pending == 0
    }
}

/// The engine as one object: stack loader, script interpreter and
/// animation clock each run on their own thread; the display driver calls
/// [`World::display_tick`] from its refresh callback.
pub struct World {
    ctx: Arc<EngineContext>,
    script_tx: Sender<ScriptMessage>,
    stack_tx: Sender<StackMessage>,
    animation_tx: Sender<()>,
    work: Arc<WorkCounter>,
    compositor: Mutex<StateCompositor>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl World {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn ArchiveProvider>,
        media: Arc<dyn MediaPlayer>,
    ) -> Result<Self, WorldError> {
        let preload = config.preload.clone();
        let start = config.start.clone();
        let interval = config.animation_interval();
        let compositor = StateCompositor::new(config.transition_duration());
        let ctx = Arc::new(EngineContext::new(config, provider, media));
        let work = Arc::new(WorkCounter::default());
        let tick_pending = Arc::new(AtomicBool::new(false));

        let (script_tx, script_rx) = mpsc::channel();
        let (stack_tx, stack_rx) = mpsc::channel();
        let (animation_tx, animation_rx) = mpsc::channel();

        let mut threads = Vec::with_capacity(3);
        threads.push(spawn("rx_stack", {
            let ctx = ctx.clone();
            let work = work.clone();
            move || stack_loop(ctx, stack_rx, work)
        })?);
        threads.push(spawn("rx_script", {
            let ctx = ctx.clone();
            let work = work.clone();
            let tick_pending = tick_pending.clone();
            move || script_loop(ctx, script_rx, work, tick_pending)
        })?);
        threads.push(spawn("rx_animation", {
            let script_tx = script_tx.clone();
            move || animation_loop(animation_rx, script_tx, tick_pending, interval)
        })?);

        let world = World {
            ctx,
            script_tx,
            stack_tx,
            animation_tx,
            work,
            compositor: Mutex::new(compositor),
            threads: Mutex::new(threads),
        };
        info!("world started");
        for key in preload {
            world.preload(&key)?;
        }
        if let Some(location) = start {
            world.goto_async(location)?;
        }
        Ok(world)
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    fn ensure_live(&self) -> Result<(), WorldError> {
        if self.ctx.is_torn_down() {
            Err(WorldError::TornDown)
        } else {
            Ok(())
        }
    }

    fn send(&self, message: ScriptMessage) -> Result<(), WorldError> {
        self.ensure_live()?;
        self.work.add();
        self.script_tx.send(message).map_err(|_| {
            self.work.finish();
            WorldError::TornDown
        })
    }

    fn request(&self, build: impl FnOnce(Reply) -> ScriptMessage) -> Result<(), WorldError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(build(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| WorldError::TornDown)?
            .map_err(WorldError::from)
    }

    /// Opens `location` and waits until its start script has run.
    pub fn goto(&self, location: SimpleCardDescriptor) -> Result<(), WorldError> {
        self.request(|reply| ScriptMessage::Goto {
            location,
            reply: Some(reply),
        })
    }

    pub fn goto_async(&self, location: SimpleCardDescriptor) -> Result<(), WorldError> {
        self.send(ScriptMessage::Goto {
            location,
            reply: None,
        })
    }

    pub fn goto_card(&self, stack: &str, id: u16) -> Result<(), WorldError> {
        self.goto(SimpleCardDescriptor::new(stack, id))
    }

    pub fn pointer_moved(&self, world: Point) -> Result<(), WorldError> {
        self.send(ScriptMessage::PointerMoved(world))
    }

    /// Clicks that arrive while a blocking movie plays are dropped.
    pub fn pointer_down(&self) -> Result<(), WorldError> {
        if self.ctx.blocking_movie() {
            debug!("pointer down dropped during blocking movie");
            return self.ensure_live();
        }
        self.send(ScriptMessage::PointerDown)
    }

    pub fn pointer_up(&self) -> Result<(), WorldError> {
        if self.ctx.blocking_movie() {
            debug!("pointer up dropped during blocking movie");
            return self.ensure_live();
        }
        self.send(ScriptMessage::PointerUp)
    }

    pub fn viewport_changed(&self, viewport: Size) -> Result<(), WorldError> {
        self.send(ScriptMessage::Viewport(viewport))
    }

    /// Completion callback for the media collaborator.
    pub fn movie_finished(&self, code: u16) -> Result<(), WorldError> {
        self.ensure_live()?;
        if self.ctx.movie_gate.complete(code) {
            return Ok(());
        }
        self.send(ScriptMessage::MovieFinished(code))
    }

    /// Skips the blocking movie, if one is playing.
    pub fn skip_movie(&self) -> bool {
        self.ctx.movie_gate.skip()
    }

    pub fn blocking_movie(&self) -> bool {
        self.ctx.blocking_movie()
    }

    /// Per-frame hook for the display driver. Never waits on the script
    /// context; it reads the last published card snapshot.
    pub fn display_tick(&self, now: Instant) -> Result<FrameReport, WorldError> {
        self.ensure_live()?;
        let mut compositor = self
            .compositor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for kind in self.ctx.transitions.drain() {
            compositor.request(kind, now);
        }
        let inputs = FrameInputs {
            card: self.ctx.frames.latest(),
        };
        Ok(compositor.tick(now, &inputs))
    }

    pub fn render_state(&self) -> RenderStateKind {
        self.compositor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .current()
    }

    pub fn variables(&self) -> &EngineVariables {
        &self.ctx.variables
    }

    pub fn variable(&self, path: &str) -> Option<EngineValue> {
        self.ctx.variables.get(path)
    }

    pub fn set_variable(&self, path: &str, value: impl Into<EngineValue>) {
        self.ctx.variables.set(path, value);
    }

    /// Loads a stack on the stack context ahead of use.
    pub fn preload(&self, key: &str) -> Result<(), WorldError> {
        self.ensure_live()?;
        self.work.add();
        self.stack_tx
            .send(StackMessage::Preload(key.to_string()))
            .map_err(|_| {
                self.work.finish();
                WorldError::TornDown
            })
    }

    /// Waits until every queued request has been handled.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.work.wait(timeout)
    }

    pub fn location(&self) -> Option<SimpleCardDescriptor> {
        self.ctx.location()
    }

    pub fn game_state(&self) -> GameState {
        self.ctx.game_state()
    }

    pub fn restore(&self, state: GameState) -> Result<(), WorldError> {
        self.request(|reply| ScriptMessage::Restore { state, reply })
    }

    pub fn event_log(&self) -> &EventLog {
        &self.ctx.events
    }

    pub fn events(&self) -> Vec<String> {
        self.ctx.events.entries()
    }

    /// Stops every context and releases all stacks. Safe to call twice.
    pub fn teardown(&self) {
        if !self.ctx.begin_teardown() {
            return;
        }
        info!("tearing down world");
        self.ctx.movie_gate.abort();
        let _ = self.script_tx.send(ScriptMessage::Shutdown);
        let _ = self.stack_tx.send(StackMessage::Shutdown);
        let _ = self.animation_tx.send(());

        let threads: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!("{name} thread panicked");
            }
        }

        self.ctx.resolver.clear();
        self.ctx.frames.clear();
        self.ctx.set_blocking_movie(false);
        self.work.clear();
        self.ctx.events.record("world.teardown");
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn<F>(name: &'static str, body: F) -> Result<JoinHandle<()>, WorldError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| WorldError::Spawn { name, source })
}

fn stack_loop(ctx: Arc<EngineContext>, rx: Receiver<StackMessage>, work: Arc<WorkCounter>) {
    while let Ok(message) = rx.recv() {
        match message {
            StackMessage::Preload(key) => {
                match ctx.resolver.resolve(&key) {
                    Ok(stack) => ctx
                        .events
                        .record(format!("stack.preload {}", stack.key())),
                    Err(err) => {
                        warn!("preloading stack {key} failed: {err}");
                        ctx.events.record(format!("stack.error {key}: {err}"));
                    }
                }
                work.finish();
            }
            StackMessage::Shutdown => break,
        }
    }
    debug!("stack loop exited");
}

fn script_loop(
    ctx: Arc<EngineContext>,
    rx: Receiver<ScriptMessage>,
    work: Arc<WorkCounter>,
    tick_pending: Arc<AtomicBool>,
) {
    let mut engine = ScriptEngine::new(ctx.clone());
    while let Ok(message) = rx.recv() {
        if ctx.is_torn_down() && !matches!(message, ScriptMessage::Shutdown) {
            continue;
        }
        match message {
            ScriptMessage::Tick => {
                tick_pending.store(false, Ordering::SeqCst);
                engine.animation_tick();
                continue;
            }
            ScriptMessage::Shutdown => break,
            ScriptMessage::Goto { location, reply } => {
                let result = engine.goto(location);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            ScriptMessage::Restore { state, reply } => {
                let _ = reply.send(engine.restore(state));
            }
            ScriptMessage::PointerMoved(point) => engine.pointer_moved(point),
            ScriptMessage::PointerDown => engine.pointer_down(),
            ScriptMessage::PointerUp => engine.pointer_up(),
            ScriptMessage::Viewport(size) => engine.viewport_changed(size),
            ScriptMessage::MovieFinished(code) => engine.movie_finished(code),
        }
        work.finish();
    }
    engine.shutdown();
    debug!("script loop exited");
}

fn animation_loop(
    shutdown: Receiver<()>,
    script_tx: Sender<ScriptMessage>,
    tick_pending: Arc<AtomicBool>,
    interval: Duration,
) {
    loop {
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                // coalesce: at most one tick waits in the script queue
                if tick_pending.swap(true, Ordering::SeqCst) {
                    continue;
                }
                if script_tx.send(ScriptMessage::Tick).is_err() {
                    break;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("animation loop exited");
}
