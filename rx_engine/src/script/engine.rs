use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rx_formats::{BranchCase, ScriptCommand, BRANCH_DEFAULT_CASE};

use super::opcode::Opcode;
use crate::card::{Card, MovieSlot, ScriptTrigger};
use crate::context::EngineContext;
use crate::error::ScriptError;
use crate::geometry::{CoordinateMapper, Point, Size};
use crate::hotspot::{Hotspot, HotspotTracker, HotspotTransition};
use crate::media::{GateOutcome, MediaRef};
use crate::render::RenderStateKind;
use crate::stack::SimpleCardDescriptor;
use crate::state::GameState;
use crate::variables::{
    AMBIENT_SOUNDS_ENABLED, LAST_SCRIPT_ERROR, MOVIES_ENABLED, SCRIPT_ERROR_FLAG,
};

pub const MAX_SCRIPT_DEPTH: usize = 32;
const MAX_CARD_CHAIN: usize = 32;
const DEFAULT_SOUND_VOLUME: u16 = 256;

/// How a command list finished.
#[derive(Debug)]
enum Flow {
    Continue,
    /// A card change was requested; the rest of the script is dropped.
    Goto(SimpleCardDescriptor),
    /// The world is shutting down.
    Halt,
}

type OpHandler = fn(&mut ScriptEngine, &[u16], usize) -> Result<Flow, ScriptError>;

fn handler_for(opcode: Opcode) -> OpHandler {
    match opcode {
        Opcode::GotoCard => ScriptEngine::op_goto_card,
        Opcode::PlayDataSound => ScriptEngine::op_play_data_sound,
        Opcode::SetVariable => ScriptEngine::op_set_variable,
        Opcode::Branch => ScriptEngine::op_flat_branch,
        Opcode::EnableHotspot => ScriptEngine::op_enable_hotspot,
        Opcode::DisableHotspot => ScriptEngine::op_disable_hotspot,
        Opcode::ClearSlst => ScriptEngine::op_clear_slst,
        Opcode::SetCursor => ScriptEngine::op_set_cursor,
        Opcode::CallExternal => ScriptEngine::op_call_external,
        Opcode::ScheduleTransition => ScriptEngine::op_schedule_transition,
        Opcode::Refresh => ScriptEngine::op_refresh,
        Opcode::DisableScreenUpdates => ScriptEngine::op_disable_screen_updates,
        Opcode::EnableScreenUpdates => ScriptEngine::op_enable_screen_updates,
        Opcode::DisableMovie => ScriptEngine::op_disable_movie,
        Opcode::DisableAllMovies => ScriptEngine::op_disable_all_movies,
        Opcode::EnableMovie => ScriptEngine::op_enable_movie,
        Opcode::StartMovieBlocking => ScriptEngine::op_start_movie_blocking,
        Opcode::StartMovie => ScriptEngine::op_start_movie,
        Opcode::StopMovie => ScriptEngine::op_stop_movie,
        Opcode::ScheduleMovieCommand => ScriptEngine::op_schedule_movie_command,
        Opcode::ActivatePlst => ScriptEngine::op_activate_plst,
        Opcode::ActivateSlst => ScriptEngine::op_activate_slst,
        Opcode::ActivateMlstAndStart => ScriptEngine::op_activate_mlst_and_start,
        Opcode::ActivateBlst => ScriptEngine::op_activate_blst,
        Opcode::ActivateMlst => ScriptEngine::op_activate_mlst,
    }
}

#[derive(Debug, Clone)]
struct ScheduledCommand {
    code: u16,
    at: Duration,
    opcode: Opcode,
    args: Vec<u16>,
}

/// Interprets card and hotspot scripts on the script context. Owns the
/// active card for the whole visit; the display context only ever sees
/// the snapshots it publishes.
pub struct ScriptEngine {
    ctx: Arc<EngineContext>,
    mapper: CoordinateMapper,
    card: Option<Card>,
    tracker: HotspotTracker,
    pointer: Option<Point>,
    button_down: bool,
    updates_enabled: bool,
    in_screen_update: bool,
    in_leave: bool,
    scheduled: Vec<ScheduledCommand>,
    /// Render-state requests held until the next visible publish.
    transitions: Vec<RenderStateKind>,
}

impl ScriptEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let mapper = CoordinateMapper::new(
            ctx.config.core_viewport,
            ctx.config.inventory_margin,
            ctx.config.viewport,
        );
        Self {
            ctx,
            mapper,
            card: None,
            tracker: HotspotTracker::default(),
            pointer: None,
            button_down: false,
            updates_enabled: true,
            in_screen_update: false,
            in_leave: false,
            scheduled: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn card(&self) -> Option<&Card> {
        self.card.as_ref()
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn updates_enabled(&self) -> bool {
        self.updates_enabled
    }

    pub fn active_hotspot(&self) -> Option<&Hotspot> {
        let index = self.tracker.active()?;
        self.card.as_ref()?.hotspots.get(index)
    }

    // ---- external events --------------------------------------------------

    /// Makes `location` the active card. On failure the current card stays.
    pub fn goto(&mut self, location: SimpleCardDescriptor) -> Result<(), ScriptError> {
        match self.change_card(location) {
            Ok(pending) => {
                self.settle(pending);
                Ok(())
            }
            Err(err) => {
                self.script_failed("goto", &err);
                Err(err)
            }
        }
    }

    pub fn pointer_moved(&mut self, world: Point) {
        self.pointer = Some(world);
        self.settle(None);
    }

    pub fn pointer_down(&mut self) {
        self.button_down = true;
        let pending = self.run_active_hotspot(ScriptTrigger::MouseDown);
        self.settle(pending);
    }

    pub fn pointer_up(&mut self) {
        self.button_down = false;
        let pending = self.run_active_hotspot(ScriptTrigger::MouseUp);
        self.settle(pending);
    }

    pub fn viewport_changed(&mut self, viewport: Size) {
        self.mapper.viewport_changed(viewport);
        if let Some(card) = self.card.as_mut() {
            card.hotspots.viewport_changed(&self.mapper);
        }
        self.publish_if_needed();
        self.settle(None);
    }

    /// Animation-context tick: hover and held-button scripts, then any
    /// scheduled movie commands whose time has come.
    pub fn animation_tick(&mut self) {
        if self.card.is_none() {
            return;
        }
        let mut pending = self.run_active_hotspot(ScriptTrigger::MouseInside);
        if pending.is_none() && self.button_down {
            pending = self.run_active_hotspot(ScriptTrigger::MouseStillDown);
        }
        if pending.is_none() {
            pending = self.fire_scheduled();
        }
        self.settle(pending);
    }

    /// A non-blocking movie reached its end.
    pub fn movie_finished(&mut self, code: u16) {
        let Some(card) = self.card.as_mut() else {
            return;
        };
        if let Some(slot) = card.visual.movies.get_mut(&code) {
            if !slot.record.looping {
                slot.playing = false;
            }
        }
        self.ctx.events.record(format!("movie.finished {code}"));
        self.publish_if_needed();
    }

    /// Replaces the game variables and reopens the saved location. When the
    /// location cannot be opened the previous variables are put back.
    pub fn restore(&mut self, state: GameState) -> Result<(), ScriptError> {
        let previous = self.ctx.game.snapshot();
        self.ctx.game.replace(state.variables);
        if let Some(location) = state.location {
            if let Err(err) = self.goto(location) {
                self.ctx.game.replace(previous);
                return Err(err);
            }
        }
        self.ctx.events.record("state.restore");
        Ok(())
    }

    /// Closes the active card without running its scripts.
    pub fn shutdown(&mut self) {
        self.close_card();
    }

    // ---- card lifecycle ---------------------------------------------------

    fn change_card(
        &mut self,
        location: SimpleCardDescriptor,
    ) -> Result<Option<SimpleCardDescriptor>, ScriptError> {
        let descriptor = self.ctx.resolver.resolve_card(&location)?;
        let next = Card::open(descriptor, &self.mapper)?;

        if self.card.is_some() {
            self.in_leave = true;
            let ignored = self.run_card_script(ScriptTrigger::CardLeave);
            self.in_leave = false;
            if let Some(target) = ignored {
                debug!("ignoring goto {target} raised by a leave script");
            }
            self.close_card();
        }

        info!("opening card {location} ({})", next.name());
        self.ctx.events.record(format!("card.open {location}"));
        self.card = Some(next);
        self.ctx.set_location(Some(location));

        self.updates_enabled = false;
        let pending = self.run_card_script(ScriptTrigger::CardPrepare);
        self.updates_enabled = true;
        self.publish();
        if pending.is_some() {
            return Ok(pending);
        }
        Ok(self.run_card_script(ScriptTrigger::CardStart))
    }

    fn close_card(&mut self) {
        let Some(card) = self.card.take() else {
            return;
        };
        for slot in card.visual.movies.values().filter(|slot| slot.playing) {
            self.ctx.media.stop(&movie_ref(slot));
        }
        if let Some(index) = card.visual.sound_group {
            if let Ok(group) = card.sound_group(index) {
                self.ctx.media.stop(&sound_group_ref(group));
            }
        }
        self.scheduled.clear();
        self.tracker.reset();
        self.updates_enabled = true;
        self.ctx
            .events
            .record(format!("card.close {}", card.location()));
    }

    /// Follows requested card changes, then re-hit-tests the pointer until
    /// nothing else changes.
    fn settle(&mut self, mut pending: Option<SimpleCardDescriptor>) {
        for _ in 0..MAX_CARD_CHAIN {
            if let Some(location) = pending.take() {
                match self.change_card(location) {
                    Ok(next) => pending = next,
                    Err(err) => self.script_failed("goto", &err),
                }
                if pending.is_some() {
                    continue;
                }
            }
            pending = self.refresh_hover();
            if pending.is_none() {
                return;
            }
        }
        warn!("card change chain exceeded {MAX_CARD_CHAIN} steps");
    }

    fn refresh_hover(&mut self) -> Option<SimpleCardDescriptor> {
        let hit = match (self.card.as_ref(), self.pointer) {
            (Some(card), Some(pointer)) => card
                .hotspots
                .hit_test_world(&self.mapper, pointer)
                .map(Hotspot::index),
            _ => None,
        };
        for transition in self.tracker.update(hit) {
            let (index, trigger, event) = match transition {
                HotspotTransition::Exited(index) => (index, ScriptTrigger::MouseExit, "hotspot.exit"),
                HotspotTransition::Entered(index) => {
                    (index, ScriptTrigger::MouseEnter, "hotspot.enter")
                }
            };
            if let Some(hotspot) = self.card.as_ref().and_then(|card| card.hotspots.get(index)) {
                self.ctx
                    .events
                    .record(format!("{event} {}", hotspot.describe()));
            }
            if let Some(target) = self.run_hotspot_script(index, trigger) {
                return Some(target);
            }
        }
        None
    }

    // ---- execution --------------------------------------------------------

    fn run_card_script(&mut self, trigger: ScriptTrigger) -> Option<SimpleCardDescriptor> {
        let commands = self
            .card
            .as_ref()
            .and_then(|card| card.script(trigger))
            .map(<[ScriptCommand]>::to_vec)?;
        self.run_script(trigger.label(), &commands)
    }

    fn run_active_hotspot(&mut self, trigger: ScriptTrigger) -> Option<SimpleCardDescriptor> {
        let index = self.tracker.active()?;
        self.run_hotspot_script(index, trigger)
    }

    fn run_hotspot_script(
        &mut self,
        index: u16,
        trigger: ScriptTrigger,
    ) -> Option<SimpleCardDescriptor> {
        let hotspot = self.card.as_ref()?.hotspots.get(index)?;
        let commands = hotspot.script(trigger.code())?.to_vec();
        let label = format!("hotspot {} {}", hotspot.describe(), trigger.label());
        self.run_script(&label, &commands)
    }

    /// Runs one command list to completion. Errors abort it and are
    /// reported; they never escape to the caller.
    fn run_script(
        &mut self,
        label: &str,
        commands: &[ScriptCommand],
    ) -> Option<SimpleCardDescriptor> {
        debug!("running {label} ({} commands)", commands.len());
        match self.execute(commands, 0) {
            Ok(Flow::Continue) | Ok(Flow::Halt) => None,
            Ok(Flow::Goto(target)) => Some(target),
            Err(err) => {
                self.script_failed(label, &err);
                None
            }
        }
    }

    fn execute(&mut self, commands: &[ScriptCommand], depth: usize) -> Result<Flow, ScriptError> {
        if depth > MAX_SCRIPT_DEPTH {
            return Err(ScriptError::TooDeep(MAX_SCRIPT_DEPTH));
        }
        for command in commands {
            if self.ctx.is_torn_down() {
                return Ok(Flow::Halt);
            }
            let flow = match command {
                ScriptCommand::Op { opcode, args } => {
                    let opcode = Opcode::try_from(*opcode)?;
                    opcode.check_operands(args)?;
                    handler_for(opcode)(self, args, depth)?
                }
                ScriptCommand::Branch { variable, cases } => {
                    self.branch(*variable, cases, depth)?
                }
            };
            match flow {
                Flow::Continue => self.publish_if_needed(),
                other => return Ok(other),
            }
        }
        Ok(Flow::Continue)
    }

    fn branch(
        &mut self,
        variable: u16,
        cases: &[BranchCase],
        depth: usize,
    ) -> Result<Flow, ScriptError> {
        let name = self.variable_name(variable)?;
        let value = self.ctx.game.get(&name);
        let selected = cases
            .iter()
            .find(|case| case.value == value)
            .or_else(|| cases.iter().find(|case| case.value == BRANCH_DEFAULT_CASE));
        match selected {
            Some(case) => {
                debug!("branch on {name}={value}");
                self.execute(&case.commands, depth + 1)
            }
            None => Ok(Flow::Continue),
        }
    }

    fn script_failed(&mut self, label: &str, err: &ScriptError) {
        warn!("script {label} aborted: {err}");
        self.ctx.variables.set(SCRIPT_ERROR_FLAG, true);
        self.ctx.variables.set(LAST_SCRIPT_ERROR, err.to_string());
        self.ctx
            .events
            .record(format!("script.error {label}: {err}"));
        self.ctx.set_blocking_movie(false);
        self.in_screen_update = false;
        if !self.transitions.is_empty() {
            debug!("dropping {} unpublished render requests", self.transitions.len());
            self.transitions.clear();
        }
        if let Some(card) = self.card.as_mut() {
            card.discard_unpublished();
        }
        self.updates_enabled = true;
    }

    fn fire_scheduled(&mut self) -> Option<SimpleCardDescriptor> {
        if self.scheduled.is_empty() {
            return None;
        }
        let media = self.ctx.media.clone();
        let mut due = Vec::new();
        self.scheduled.retain(|command| {
            let reached = media
                .position(command.code)
                .map(|position| position >= command.at)
                .unwrap_or(false);
            if reached {
                due.push(command.clone());
            }
            !reached
        });
        for command in due {
            let script = [ScriptCommand::Op {
                opcode: command.opcode.code(),
                args: command.args,
            }];
            let label = format!("movie {} cue", command.code);
            if let Some(target) = self.run_script(&label, &script) {
                return Some(target);
            }
        }
        None
    }

    // ---- helpers ----------------------------------------------------------

    fn card_ref(&self) -> Result<&Card, ScriptError> {
        self.card.as_ref().ok_or(ScriptError::NoActiveCard)
    }

    fn card_mut(&mut self) -> Result<&mut Card, ScriptError> {
        self.card.as_mut().ok_or(ScriptError::NoActiveCard)
    }

    fn variable_name(&self, index: u16) -> Result<String, ScriptError> {
        self.card_ref()?
            .descriptor()
            .stack()
            .variable_name(index)
            .map(str::to_string)
            .ok_or(ScriptError::UnknownVariable(index))
    }

    fn movie_slot(&mut self, code: u16) -> Result<&mut MovieSlot, ScriptError> {
        self.card_mut()?
            .visual
            .movies
            .get_mut(&code)
            .ok_or(ScriptError::UnknownMovie(code))
    }

    fn publish(&mut self) {
        if let Some(card) = self.card.as_mut() {
            card.publish(&self.ctx.frames);
        }
        self.flush_transitions();
    }

    fn publish_if_needed(&mut self) {
        if !self.updates_enabled {
            return;
        }
        if let Some(card) = self.card.as_mut() {
            if card.needs_publish() {
                card.publish(&self.ctx.frames);
            }
        }
        self.flush_transitions();
    }

    /// Hands held render requests to the display context once updates show.
    fn flush_transitions(&mut self) {
        if !self.updates_enabled {
            return;
        }
        for kind in self.transitions.drain(..) {
            self.ctx.transitions.push(kind);
            self.ctx.events.record(format!("render.request {kind}"));
        }
    }

    fn set_hotspot_enabled(&mut self, id: u16, enabled: bool) -> Result<Flow, ScriptError> {
        self.card_mut()?
            .hotspots
            .by_id_mut(id)
            .ok_or(ScriptError::UnknownHotspot(id))?
            .enabled = enabled;
        Ok(Flow::Continue)
    }

    fn start_movie(&mut self, code: u16) -> Result<Flow, ScriptError> {
        if !self.ctx.variables.get_bool(MOVIES_ENABLED) {
            self.ctx.events.record(format!("movie.skip {code}"));
            return Ok(Flow::Continue);
        }
        let slot = self.movie_slot(code)?;
        if !slot.enabled {
            debug!("movie {code} is disabled; not starting");
            return Ok(Flow::Continue);
        }
        slot.playing = true;
        let media = movie_ref(slot);
        self.ctx.media.start(&media, false);
        self.ctx.events.record(format!("movie.start {code}"));
        Ok(Flow::Continue)
    }

    // ---- opcode handlers --------------------------------------------------

    fn op_goto_card(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        if self.in_leave {
            debug!("goto card {} ignored inside leave script", args[0]);
            return Ok(Flow::Continue);
        }
        let stack = self.card_ref()?.location().stack;
        Ok(Flow::Goto(SimpleCardDescriptor::new(stack, args[0])))
    }

    fn op_play_data_sound(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let media = MediaRef::Sound {
            id: args[0],
            volume: args.get(1).copied().unwrap_or(DEFAULT_SOUND_VOLUME),
        };
        self.ctx.media.start(&media, false);
        self.ctx.events.record(format!("sound.play {}", args[0]));
        Ok(Flow::Continue)
    }

    fn op_set_variable(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let name = self.variable_name(args[0])?;
        debug!("{name} = {}", args[1]);
        self.ctx.game.set(&name, args[1]);
        Ok(Flow::Continue)
    }

    fn op_flat_branch(&mut self, _args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        Err(ScriptError::MalformedBranch)
    }

    fn op_enable_hotspot(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.set_hotspot_enabled(args[0], true)
    }

    fn op_disable_hotspot(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.set_hotspot_enabled(args[0], false)
    }

    fn op_clear_slst(&mut self, _args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let card = self.card_mut()?;
        let Some(index) = card.visual.sound_group.take() else {
            return Ok(Flow::Continue);
        };
        let group = card.sound_group(index)?.clone();
        self.ctx.media.stop(&sound_group_ref(&group));
        Ok(Flow::Continue)
    }

    fn op_set_cursor(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.card_mut()?.visual.cursor = Some(args[0]);
        Ok(Flow::Continue)
    }

    fn op_call_external(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let argc = args[1] as usize;
        let expected = 2 + argc;
        if args.len() < expected {
            return Err(ScriptError::MissingOperands {
                opcode: Opcode::CallExternal,
                expected,
                actual: args.len(),
            });
        }
        self.ctx
            .events
            .record(format!("external.call {} {:?}", args[0], &args[2..expected]));
        Ok(Flow::Continue)
    }

    fn op_schedule_transition(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let kind = RenderStateKind::try_from(args[0])?;
        debug!("render state {kind} requested");
        self.transitions.push(kind);
        Ok(Flow::Continue)
    }

    fn op_refresh(&mut self, _args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        if self.updates_enabled {
            self.publish();
        }
        Ok(Flow::Continue)
    }

    fn op_disable_screen_updates(&mut self, _args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.updates_enabled = false;
        Ok(Flow::Continue)
    }

    fn op_enable_screen_updates(&mut self, _args: &[u16], depth: usize) -> Result<Flow, ScriptError> {
        if !self.in_screen_update {
            let handler = self
                .card_ref()?
                .script(ScriptTrigger::ScreenUpdate)
                .map(<[ScriptCommand]>::to_vec);
            if let Some(commands) = handler {
                self.in_screen_update = true;
                let held = self.updates_enabled;
                self.updates_enabled = false;
                let flow = self.execute(&commands, depth + 1);
                self.updates_enabled = held;
                self.in_screen_update = false;
                match flow? {
                    Flow::Continue => {}
                    other => return Ok(other),
                }
            }
        }
        self.updates_enabled = true;
        self.publish();
        Ok(Flow::Continue)
    }

    fn op_disable_movie(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.movie_slot(args[0])?.enabled = false;
        Ok(Flow::Continue)
    }

    fn op_disable_all_movies(&mut self, _args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        for slot in self.card_mut()?.visual.movies.values_mut() {
            slot.enabled = false;
        }
        Ok(Flow::Continue)
    }

    fn op_enable_movie(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.movie_slot(args[0])?.enabled = true;
        Ok(Flow::Continue)
    }

    fn op_start_movie_blocking(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let code = args[0];
        if !self.ctx.variables.get_bool(MOVIES_ENABLED) {
            self.ctx.events.record(format!("movie.skip {code}"));
            return Ok(Flow::Continue);
        }
        let slot = self.movie_slot(code)?;
        slot.playing = true;
        let media = movie_ref(slot);
        self.publish_if_needed();

        self.ctx.movie_gate.arm(code);
        self.ctx.set_blocking_movie(true);
        self.ctx.events.record(format!("movie.start.blocking {code}"));
        self.ctx.media.start(&media, true);
        let outcome = self.ctx.movie_gate.wait();
        self.ctx.set_blocking_movie(false);

        if let Ok(slot) = self.movie_slot(code) {
            slot.playing = false;
        }
        match outcome {
            GateOutcome::Completed => Ok(Flow::Continue),
            GateOutcome::Skipped => {
                self.ctx.media.stop(&media);
                self.ctx.events.record(format!("movie.skipped {code}"));
                Ok(Flow::Continue)
            }
            GateOutcome::Aborted => Ok(Flow::Halt),
        }
    }

    fn op_start_movie(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.start_movie(args[0])
    }

    fn op_stop_movie(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let slot = self.movie_slot(args[0])?;
        if !slot.playing {
            return Ok(Flow::Continue);
        }
        slot.playing = false;
        let media = movie_ref(slot);
        self.ctx.media.stop(&media);
        Ok(Flow::Continue)
    }

    fn op_schedule_movie_command(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let at = Duration::from_millis((u64::from(args[1]) << 16) | u64::from(args[2]));
        let opcode = Opcode::try_from(args[3])?;
        let rest = args[4..].to_vec();
        opcode.check_operands(&rest)?;
        debug!("movie {} cue at {at:?}: {opcode}", args[0]);
        self.scheduled.push(ScheduledCommand {
            code: args[0],
            at,
            opcode,
            args: rest,
        });
        Ok(Flow::Continue)
    }

    fn op_activate_plst(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let card = self.card_mut()?;
        let picture = card.picture(args[0])?.clone();
        card.visual.picture = Some(picture);
        Ok(Flow::Continue)
    }

    fn op_activate_slst(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let card = self.card_mut()?;
        let group = card.sound_group(args[0])?.clone();
        let previous = card
            .visual
            .sound_group
            .replace(group.index)
            .filter(|index| *index != group.index)
            .and_then(|index| card.sound_group(index).ok().cloned());
        if let Some(previous) = previous {
            self.ctx.media.stop(&sound_group_ref(&previous));
        }
        if self.ctx.variables.get_bool(AMBIENT_SOUNDS_ENABLED) {
            self.ctx.media.start(&sound_group_ref(&group), false);
        } else {
            debug!("ambient sounds disabled; SLST {} stays silent", group.index);
        }
        Ok(Flow::Continue)
    }

    fn op_activate_mlst(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        self.activate_mlst(args[0]).map(|_| Flow::Continue)
    }

    fn op_activate_mlst_and_start(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let code = self.activate_mlst(args[0])?;
        self.start_movie(code)
    }

    fn activate_mlst(&mut self, index: u16) -> Result<u16, ScriptError> {
        let card = self.card_mut()?;
        let record = card.movie(index)?.clone();
        let code = record.code;
        let replaced = card.visual.movies.insert(
            code,
            MovieSlot {
                record,
                enabled: true,
                playing: false,
            },
        );
        if let Some(old) = replaced.filter(|slot| slot.playing) {
            self.ctx.media.stop(&movie_ref(&old));
        }
        Ok(code)
    }

    fn op_activate_blst(&mut self, args: &[u16], _depth: usize) -> Result<Flow, ScriptError> {
        let button = self.card_ref()?.button(args[0])?.clone();
        self.set_hotspot_enabled(button.hotspot_id, button.enabled)
    }
}

fn movie_ref(slot: &MovieSlot) -> MediaRef {
    MediaRef::Movie {
        code: slot.record.code,
        movie: slot.record.movie,
        looping: slot.record.looping,
    }
}

fn sound_group_ref(group: &rx_formats::SoundGroupRecord) -> MediaRef {
    MediaRef::SoundGroup {
        index: group.index,
        sounds: group.sounds.clone(),
        volume: group.volume,
        looping: group.looping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardFrameSource;
    use crate::config::EngineConfig;
    use crate::error::StackError;
    use crate::media::{MediaEvent, MediaPlayer, RecordingMediaPlayer};
    use crate::stack::{MemoryArchive, MemoryProvider};
    use crate::variables::EngineValue;
    use rx_formats::{
        CardRecord, CoreRectRecord, HotspotRecord, MovieRecord, PictureRecord, ScriptHandler,
        SoundGroupRecord,
    };
    use std::sync::{Mutex, OnceLock};

    fn op(opcode: Opcode, args: &[u16]) -> ScriptCommand {
        ScriptCommand::Op {
            opcode: opcode.code(),
            args: args.to_vec(),
        }
    }

    fn external(id: u16) -> ScriptCommand {
        op(Opcode::CallExternal, &[id, 0])
    }

    fn handler(trigger: ScriptTrigger, commands: Vec<ScriptCommand>) -> ScriptHandler {
        ScriptHandler {
            event: trigger.code(),
            commands,
        }
    }

    fn picture(index: u16, bitmap: u16) -> PictureRecord {
        PictureRecord {
            index,
            bitmap,
            rect: CoreRectRecord::default(),
        }
    }

    fn movie(index: u16, code: u16) -> MovieRecord {
        MovieRecord {
            index,
            movie: 100 + index,
            code,
            left: 0,
            top: 0,
            looping: false,
        }
    }

    fn card_with_start(start: Vec<ScriptCommand>) -> CardRecord {
        CardRecord {
            name: "test".to_string(),
            scripts: vec![handler(ScriptTrigger::CardStart, start)],
            pictures: vec![picture(1, 500)],
            movies: vec![movie(1, 5)],
            ..CardRecord::default()
        }
    }

    struct Fixture {
        ctx: Arc<EngineContext>,
        engine: ScriptEngine,
    }

    impl Fixture {
        fn new(cards: Vec<(u16, CardRecord)>, media: Arc<dyn MediaPlayer>) -> Self {
            let mut archive = MemoryArchive::new("aspit").with_variables(["atemp", "adoor"]);
            for (id, record) in &cards {
                archive = archive.with_card(*id, record).unwrap();
            }
            let provider = Arc::new(MemoryProvider::new().with_stack("aspit", archive));
            let ctx = Arc::new(EngineContext::new(EngineConfig::default(), provider, media));
            let engine = ScriptEngine::new(ctx.clone());
            Self { ctx, engine }
        }

        fn goto(&mut self, id: u16) -> Result<(), ScriptError> {
            self.engine.goto(SimpleCardDescriptor::new("aspit", id))
        }

        fn events_with(&self, prefix: &str) -> Vec<String> {
            self.ctx
                .events
                .entries()
                .into_iter()
                .filter(|entry| entry.starts_with(prefix))
                .collect()
        }

        fn script_error(&self) -> bool {
            self.ctx.variables.get_bool(SCRIPT_ERROR_FLAG)
        }
    }

    fn recording() -> Arc<RecordingMediaPlayer> {
        Arc::new(RecordingMediaPlayer::auto_completing())
    }

    #[test]
    fn card_change_runs_leave_prepare_start_in_order() {
        let first = CardRecord {
            scripts: vec![handler(ScriptTrigger::CardLeave, vec![external(1)])],
            ..CardRecord::default()
        };
        let second = CardRecord {
            scripts: vec![
                handler(ScriptTrigger::CardPrepare, vec![external(2)]),
                handler(ScriptTrigger::CardStart, vec![external(3)]),
            ],
            ..CardRecord::default()
        };
        let mut fx = Fixture::new(vec![(1, first), (2, second)], recording());
        fx.goto(1).unwrap();
        fx.goto(2).unwrap();

        let trail: Vec<String> = fx
            .ctx
            .events
            .entries()
            .into_iter()
            .filter(|entry| entry.starts_with("card.") || entry.starts_with("external."))
            .collect();
        assert_eq!(
            trail,
            vec![
                "card.open aspit/1",
                "external.call 1 []",
                "card.close aspit/1",
                "card.open aspit/2",
                "external.call 2 []",
                "external.call 3 []",
            ]
        );
        assert_eq!(fx.ctx.location(), Some(SimpleCardDescriptor::new("aspit", 2)));
        assert_eq!(
            fx.ctx.frames.latest().unwrap().location,
            SimpleCardDescriptor::new("aspit", 2)
        );
    }

    #[test]
    fn missing_card_leaves_current_card_in_place() {
        let first = CardRecord {
            scripts: vec![handler(ScriptTrigger::CardLeave, vec![external(1)])],
            ..CardRecord::default()
        };
        let mut fx = Fixture::new(vec![(1, first)], recording());
        fx.goto(1).unwrap();
        let err = fx.goto(99).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Stack(StackError::CardNotFound { id: 99, .. })
        ));
        assert_eq!(fx.engine.card().unwrap().location().id, 1);
        assert!(fx.events_with("external.call").is_empty());
        assert!(fx.script_error());
    }

    #[test]
    fn goto_drops_the_rest_of_the_script() {
        let first = card_with_start(vec![op(Opcode::GotoCard, &[2]), external(7)]);
        let second = card_with_start(vec![external(8)]);
        let mut fx = Fixture::new(vec![(1, first), (2, second)], recording());
        fx.goto(1).unwrap();
        assert_eq!(fx.engine.card().unwrap().location().id, 2);
        assert_eq!(fx.events_with("external.call"), vec!["external.call 8 []"]);
    }

    #[test]
    fn goto_inside_leave_script_is_ignored() {
        let first = CardRecord {
            scripts: vec![handler(
                ScriptTrigger::CardLeave,
                vec![op(Opcode::GotoCard, &[3])],
            )],
            ..CardRecord::default()
        };
        let mut fx = Fixture::new(
            vec![(1, first), (2, CardRecord::default()), (3, CardRecord::default())],
            recording(),
        );
        fx.goto(1).unwrap();
        fx.goto(2).unwrap();
        assert_eq!(fx.engine.card().unwrap().location().id, 2);
    }

    /// Records which card snapshot was visible whenever a sound starts.
    #[derive(Default)]
    struct FrameProbe {
        source: OnceLock<Arc<CardFrameSource>>,
        seen: Mutex<Vec<(Option<u16>, Option<u16>)>>,
    }

    impl MediaPlayer for FrameProbe {
        fn start(&self, _media: &MediaRef, _blocking: bool) {
            let visible = self
                .source
                .get()
                .and_then(|source| source.latest())
                .map(|frame| {
                    (
                        frame.visual.picture.as_ref().map(|p| p.bitmap),
                        frame.visual.cursor,
                    )
                })
                .unwrap_or((None, None));
            self.seen.lock().unwrap().push(visible);
        }

        fn stop(&self, _media: &MediaRef) {}
    }

    #[test]
    fn screen_update_bracket_is_never_partially_visible() {
        let mut record = card_with_start(vec![
            op(Opcode::DisableScreenUpdates, &[]),
            op(Opcode::ActivatePlst, &[1]),
            op(Opcode::PlayDataSound, &[9]),
            op(Opcode::SetCursor, &[3000]),
            op(Opcode::EnableScreenUpdates, &[]),
            op(Opcode::PlayDataSound, &[10]),
        ]);
        record
            .scripts
            .push(handler(ScriptTrigger::ScreenUpdate, vec![external(10)]));
        let probe = Arc::new(FrameProbe::default());
        let mut fx = Fixture::new(vec![(1, record)], probe.clone());
        probe.source.set(fx.ctx.frames.clone()).ok().unwrap();

        fx.goto(1).unwrap();

        let seen = probe.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(None, None), (Some(500), Some(3000))]);
        assert_eq!(fx.events_with("external.call"), vec!["external.call 10 []"]);
        assert!(fx.engine.updates_enabled());
    }

    #[test]
    fn branch_selects_matching_case_then_default() {
        let branch = ScriptCommand::Branch {
            variable: 0,
            cases: vec![
                BranchCase {
                    value: 1,
                    commands: vec![external(1)],
                },
                BranchCase {
                    value: 2,
                    commands: vec![external(2)],
                },
                BranchCase {
                    value: BRANCH_DEFAULT_CASE,
                    commands: vec![external(99)],
                },
            ],
        };
        let first = card_with_start(vec![op(Opcode::SetVariable, &[0, 2]), branch.clone()]);
        let second = card_with_start(vec![op(Opcode::SetVariable, &[0, 5]), branch]);
        let mut fx = Fixture::new(vec![(1, first), (2, second)], recording());
        fx.goto(1).unwrap();
        fx.goto(2).unwrap();
        assert_eq!(
            fx.events_with("external.call"),
            vec!["external.call 2 []", "external.call 99 []"]
        );
        assert_eq!(fx.ctx.game.get("atemp"), 5);
    }

    #[test]
    fn script_error_sets_flag_and_drops_bracketed_changes() {
        let record = card_with_start(vec![
            op(Opcode::DisableScreenUpdates, &[]),
            op(Opcode::ActivatePlst, &[1]),
            op(Opcode::ActivatePlst, &[42]),
            external(1),
        ]);
        let mut fx = Fixture::new(vec![(1, record)], recording());
        fx.goto(1).unwrap();

        assert!(fx.script_error());
        match fx.ctx.variables.get(LAST_SCRIPT_ERROR) {
            Some(EngineValue::String(message)) => assert!(message.contains("PLST")),
            other => panic!("unexpected diagnostic {other:?}"),
        }
        let card = fx.engine.card().unwrap();
        assert!(card.visual.picture.is_none());
        assert!(fx.engine.updates_enabled());
        assert!(fx.events_with("external.call").is_empty());
        assert_eq!(fx.events_with("script.error").len(), 1);
    }

    #[test]
    fn unknown_opcode_aborts_the_script() {
        let record = card_with_start(vec![
            ScriptCommand::Op {
                opcode: 3,
                args: Vec::new(),
            },
            external(1),
        ]);
        let mut fx = Fixture::new(vec![(1, record)], recording());
        fx.goto(1).unwrap();
        assert!(fx.script_error());
        assert_eq!(
            fx.ctx.variables.get(LAST_SCRIPT_ERROR),
            Some(EngineValue::String("unknown opcode 3".to_string()))
        );
        assert!(fx.events_with("external.call").is_empty());
    }

    #[test]
    fn hotspots_emit_exit_before_enter_and_react_to_clicks() {
        let door = HotspotRecord {
            id: 1,
            rect: CoreRectRecord {
                left: 0,
                top: 0,
                right: 100,
                bottom: 100,
            },
            cursor: 2002,
            name: "door".to_string(),
            enabled: true,
            scripts: vec![
                handler(ScriptTrigger::MouseEnter, vec![external(11)]),
                handler(ScriptTrigger::MouseExit, vec![external(12)]),
                handler(
                    ScriptTrigger::MouseDown,
                    vec![op(Opcode::DisableHotspot, &[1])],
                ),
            ],
        };
        let record = CardRecord {
            hotspots: vec![door],
            ..CardRecord::default()
        };
        let mut fx = Fixture::new(vec![(1, record)], recording());
        fx.goto(1).unwrap();

        // default viewport maps core space 1:1 above the 80px margin
        fx.engine.pointer_moved(Point::new(50.0, 80.0 + 392.0 - 50.0));
        assert_eq!(fx.engine.active_hotspot().map(Hotspot::id), Some(1));
        fx.engine.pointer_down();
        fx.engine.pointer_up();

        assert_eq!(fx.engine.active_hotspot().map(Hotspot::id), None);
        let trail: Vec<String> = fx
            .ctx
            .events
            .entries()
            .into_iter()
            .filter(|entry| entry.starts_with("hotspot.") || entry.starts_with("external."))
            .collect();
        assert_eq!(
            trail,
            vec![
                "hotspot.enter 1 door",
                "external.call 11 []",
                "hotspot.exit 1 door",
                "external.call 12 []",
            ]
        );
        let frame = fx.ctx.frames.latest().unwrap();
        assert!(!frame.hotspots[0].enabled);
    }

    #[test]
    fn blocking_movie_waits_for_completion() {
        let record = card_with_start(vec![
            op(Opcode::ActivateMlst, &[1]),
            op(Opcode::StartMovieBlocking, &[5]),
            external(4),
        ]);
        let player = recording();
        let mut fx = Fixture::new(vec![(1, record)], player.clone());
        fx.goto(1).unwrap();

        assert_eq!(
            player.events(),
            vec![MediaEvent::Start {
                media: MediaRef::Movie {
                    code: 5,
                    movie: 101,
                    looping: false
                },
                blocking: true,
            }]
        );
        assert_eq!(fx.events_with("external.call"), vec!["external.call 4 []"]);
        assert!(!fx.ctx.blocking_movie());
        assert!(!fx.engine.card().unwrap().visual.movies[&5].playing);
    }

    #[test]
    fn disabled_movies_never_block() {
        let record = card_with_start(vec![
            op(Opcode::ActivateMlst, &[1]),
            op(Opcode::StartMovieBlocking, &[5]),
            external(4),
        ]);
        let player = Arc::new(RecordingMediaPlayer::new());
        let mut fx = Fixture::new(vec![(1, record)], player.clone());
        fx.ctx.variables.set(MOVIES_ENABLED, false);
        fx.goto(1).unwrap();
        assert!(player.events().is_empty());
        assert_eq!(fx.events_with("movie.skip"), vec!["movie.skip 5"]);
        assert_eq!(fx.events_with("external.call").len(), 1);
    }

    #[test]
    fn scheduled_movie_command_fires_once_position_is_reached() {
        let record = card_with_start(vec![
            op(Opcode::ActivateMlst, &[1]),
            op(Opcode::StartMovie, &[5]),
            op(
                Opcode::ScheduleMovieCommand,
                &[5, 0, 1500, Opcode::ActivatePlst.code(), 1],
            ),
        ]);
        let player = recording();
        let mut fx = Fixture::new(vec![(1, record)], player.clone());
        fx.goto(1).unwrap();

        fx.engine.animation_tick();
        assert!(fx.engine.card().unwrap().visual.picture.is_none());

        player.set_position(5, Duration::from_millis(1600));
        fx.engine.animation_tick();
        let frame = fx.ctx.frames.latest().unwrap();
        assert_eq!(frame.visual.picture.as_ref().map(|p| p.bitmap), Some(500));
        assert!(frame.visual.movies[&5].playing);
    }

    #[test]
    fn transition_requests_reach_the_display_queue() {
        let first = card_with_start(vec![op(Opcode::ScheduleTransition, &[2])]);
        let second = card_with_start(vec![op(Opcode::ScheduleTransition, &[7])]);
        let mut fx = Fixture::new(vec![(1, first), (2, second)], recording());
        fx.goto(1).unwrap();
        assert_eq!(fx.ctx.transitions.drain(), vec![RenderStateKind::Credits]);

        fx.goto(2).unwrap();
        assert!(fx.ctx.transitions.drain().is_empty());
        assert!(fx.script_error());
    }

    #[test]
    fn bracketed_transition_waits_for_screen_updates() {
        let aborted = card_with_start(vec![
            op(Opcode::DisableScreenUpdates, &[]),
            op(Opcode::ScheduleTransition, &[2]),
            op(Opcode::ActivatePlst, &[42]),
            op(Opcode::EnableScreenUpdates, &[]),
        ]);
        let held = card_with_start(vec![
            op(Opcode::DisableScreenUpdates, &[]),
            op(Opcode::ScheduleTransition, &[1]),
        ]);
        let shown = card_with_start(vec![
            op(Opcode::DisableScreenUpdates, &[]),
            op(Opcode::ScheduleTransition, &[2]),
            op(Opcode::ActivatePlst, &[1]),
            op(Opcode::EnableScreenUpdates, &[]),
        ]);
        let mut fx = Fixture::new(vec![(1, aborted), (2, held), (3, shown)], recording());

        fx.goto(1).unwrap();
        assert!(fx.script_error());
        assert!(fx.ctx.transitions.drain().is_empty());

        // the bracket stays open, so nothing reaches the display yet
        fx.goto(2).unwrap();
        assert!(!fx.engine.updates_enabled());
        assert!(fx.ctx.transitions.drain().is_empty());
        assert!(fx.events_with("render.request").is_empty());

        // closing card 2 ends its bracket; the held request shows with card 3
        fx.goto(3).unwrap();
        assert_eq!(
            fx.ctx.transitions.drain(),
            vec![RenderStateKind::TransitionMovie, RenderStateKind::Credits]
        );
        assert_eq!(
            fx.events_with("render.request"),
            vec!["render.request transition_movie", "render.request credits"]
        );
    }

    #[test]
    fn aborted_bracket_still_stops_started_media_on_close() {
        let mut first = card_with_start(vec![
            op(Opcode::DisableScreenUpdates, &[]),
            op(Opcode::ActivateMlstAndStart, &[1]),
            op(Opcode::ActivateSlst, &[1]),
            op(Opcode::ActivatePlst, &[42]),
        ]);
        first.sound_groups = vec![SoundGroupRecord {
            index: 1,
            sounds: vec![70, 71],
            volume: 200,
            looping: true,
        }];
        let player = recording();
        let mut fx = Fixture::new(vec![(1, first), (2, CardRecord::default())], player.clone());
        fx.goto(1).unwrap();
        assert!(fx.script_error());
        assert!(fx.engine.card().unwrap().visual.movies[&5].playing);

        fx.goto(2).unwrap();
        let stops: Vec<MediaRef> = player
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MediaEvent::Stop { media } => Some(media),
                MediaEvent::Start { .. } => None,
            })
            .collect();
        assert_eq!(
            stops,
            vec![
                MediaRef::Movie {
                    code: 5,
                    movie: 101,
                    looping: false
                },
                MediaRef::SoundGroup {
                    index: 1,
                    sounds: vec![70, 71],
                    volume: 200,
                    looping: true
                },
            ]
        );
    }

    #[test]
    fn failed_restore_keeps_variables_and_card() {
        let record = card_with_start(vec![op(Opcode::SetVariable, &[0, 3])]);
        let mut fx = Fixture::new(vec![(1, record)], recording());
        fx.goto(1).unwrap();

        let saved = GameState {
            location: Some(SimpleCardDescriptor::new("aspit", 99)),
            variables: [("atemp".to_string(), 8)].into_iter().collect(),
        };
        assert!(fx.engine.restore(saved).is_err());
        assert_eq!(fx.ctx.game.get("atemp"), 3);
        assert_eq!(fx.engine.card().unwrap().location().id, 1);
        assert!(fx.events_with("state.restore").is_empty());
    }

    #[test]
    fn unknown_variable_index_is_an_opcode_error() {
        let record = card_with_start(vec![op(Opcode::SetVariable, &[9, 1])]);
        let mut fx = Fixture::new(vec![(1, record)], recording());
        fx.goto(1).unwrap();
        assert_eq!(
            fx.ctx.variables.get(LAST_SCRIPT_ERROR),
            Some(EngineValue::String(
                "variable index 9 is not in the stack name table".to_string()
            ))
        );
    }
}
