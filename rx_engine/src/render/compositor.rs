use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::{
    FrameInputs, FrameReport, HookCall, Layer, RenderState, RenderStateKind, StateView,
};

/// Render-state switches requested from the script context, drained by the
/// display context at the start of each tick.
#[derive(Debug, Default)]
pub struct TransitionRequests {
    pending: Mutex<VecDeque<RenderStateKind>>,
}

impl TransitionRequests {
    pub fn push(&self, kind: RenderStateKind) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(kind);
    }

    pub fn drain(&self) -> Vec<RenderStateKind> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }
}

#[derive(Debug)]
struct Incoming {
    state: RenderState,
    started: Instant,
}

/// Owns the current render state and at most one incoming state.
#[derive(Debug)]
pub struct StateCompositor {
    current: RenderState,
    incoming: Option<Incoming>,
    queued: VecDeque<RenderStateKind>,
    duration: Duration,
    frame: u64,
}

impl StateCompositor {
    pub fn new(duration: Duration) -> Self {
        Self {
            current: RenderState::new(RenderStateKind::Card),
            incoming: None,
            queued: VecDeque::new(),
            duration,
            frame: 0,
        }
    }

    pub fn current(&self) -> RenderStateKind {
        self.current.kind()
    }

    pub fn incoming(&self) -> Option<RenderStateKind> {
        self.incoming.as_ref().map(|incoming| incoming.state.kind())
    }

    pub fn queued(&self) -> Vec<RenderStateKind> {
        self.queued.iter().copied().collect()
    }

    /// Requests a switch. Mid-transition requests wait in the queue.
    pub fn request(&mut self, kind: RenderStateKind, now: Instant) {
        if self.incoming.is_some() {
            debug!("queueing render state {kind} behind the running cross-fade");
            self.queued.push_back(kind);
            return;
        }
        if kind == self.current() {
            debug!("render state {kind} already current");
            return;
        }
        info!("cross-fading {} -> {kind}", self.current());
        self.incoming = Some(Incoming {
            state: RenderState::new(kind),
            started: now,
        });
    }

    pub fn blend(&self, now: Instant) -> f32 {
        let Some(incoming) = self.incoming.as_ref() else {
            return 0.0;
        };
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(incoming.started);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    /// One display frame: render(old), render(new), composite,
    /// post_flush(old), post_flush(new). Completes the fade at blend 1 and
    /// then starts the next queued request.
    pub fn tick(&mut self, now: Instant, inputs: &FrameInputs) -> FrameReport {
        self.frame += 1;
        let blend = self.blend(now);
        let mut hooks = Vec::with_capacity(5);
        let mut layers = Vec::with_capacity(2);

        let current_kind = self.current.kind();
        let current_alpha = if self.incoming.is_some() { 1.0 - blend } else { 1.0 };
        hooks.push(HookCall::render(current_kind));
        layers.push(Layer {
            state: current_kind,
            alpha: current_alpha,
            content: self.current.render(inputs),
        });

        let incoming_kind = self.incoming.as_ref().map(|incoming| incoming.state.kind());
        if let Some(incoming) = self.incoming.as_mut() {
            let kind = incoming.state.kind();
            hooks.push(HookCall::render(kind));
            layers.push(Layer {
                state: kind,
                alpha: blend,
                content: incoming.state.render(inputs),
            });
        }

        hooks.push(HookCall::composite());

        hooks.push(HookCall::post_flush(current_kind));
        self.current.post_flush();
        if let Some(incoming) = self.incoming.as_mut() {
            hooks.push(HookCall::post_flush(incoming.state.kind()));
            incoming.state.post_flush();
        }

        let report = FrameReport {
            frame: self.frame,
            current: current_kind,
            incoming: incoming_kind,
            blend,
            layers,
            hooks,
        };

        if incoming_kind.is_some() && blend >= 1.0 {
            self.finish_transition(now);
        }
        report
    }

    fn finish_transition(&mut self, now: Instant) {
        if let Some(incoming) = self.incoming.take() {
            let previous = std::mem::replace(&mut self.current, incoming.state);
            info!("render state {} is current ({} released)", self.current(), previous.kind());
        }
        while self.incoming.is_none() {
            let Some(next) = self.queued.pop_front() else {
                break;
            };
            self.request(next, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Hook;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn tick_calls_hooks_in_fixed_order() {
        let start = Instant::now();
        let mut compositor = StateCompositor::new(ms(500));
        compositor.request(RenderStateKind::Credits, start);
        let report = compositor.tick(start + ms(100), &FrameInputs::default());
        assert_eq!(
            report.hooks,
            vec![
                HookCall::render(RenderStateKind::Card),
                HookCall::render(RenderStateKind::Credits),
                HookCall::composite(),
                HookCall::post_flush(RenderStateKind::Card),
                HookCall::post_flush(RenderStateKind::Credits),
            ]
        );
        assert!((report.blend - 0.2).abs() < 1e-4);
        assert!((report.layers[0].alpha - 0.8).abs() < 1e-4);
    }

    #[test]
    fn idle_tick_renders_only_current() {
        let mut compositor = StateCompositor::new(ms(500));
        let report = compositor.tick(Instant::now(), &FrameInputs::default());
        let kinds: Vec<Hook> = report.hooks.iter().map(|call| call.hook).collect();
        assert_eq!(kinds, vec![Hook::Render, Hook::Composite, Hook::PostFlush]);
        assert_eq!(report.incoming, None);
        assert_eq!(report.blend, 0.0);
    }

    #[test]
    fn queued_transition_waits_for_full_blend() {
        let start = Instant::now();
        let inputs = FrameInputs::default();
        let mut compositor = StateCompositor::new(ms(500));
        compositor.request(RenderStateKind::TransitionMovie, start);
        compositor.request(RenderStateKind::Credits, start + ms(100));
        assert_eq!(compositor.queued(), vec![RenderStateKind::Credits]);

        let mid = compositor.tick(start + ms(250), &inputs);
        assert_eq!(mid.incoming, Some(RenderStateKind::TransitionMovie));
        assert_eq!(mid.layers.len(), 2);

        let done = compositor.tick(start + ms(500), &inputs);
        assert_eq!(done.incoming, Some(RenderStateKind::TransitionMovie));
        assert_eq!(done.blend, 1.0);
        assert_eq!(compositor.current(), RenderStateKind::TransitionMovie);
        assert_eq!(compositor.incoming(), Some(RenderStateKind::Credits));
        assert!(compositor.queued().is_empty());

        let next = compositor.tick(start + ms(600), &inputs);
        assert_eq!(next.current, RenderStateKind::TransitionMovie);
        assert!((next.blend - 0.2).abs() < 1e-4);
        assert!(next.layers.len() <= 2);
    }

    #[test]
    fn zero_duration_switches_on_next_tick() {
        let now = Instant::now();
        let mut compositor = StateCompositor::new(Duration::ZERO);
        compositor.request(RenderStateKind::Credits, now);
        let report = compositor.tick(now, &FrameInputs::default());
        assert_eq!(report.blend, 1.0);
        assert_eq!(compositor.current(), RenderStateKind::Credits);
        assert_eq!(compositor.incoming(), None);
    }

    #[test]
    fn requesting_the_current_state_is_ignored() {
        let now = Instant::now();
        let mut compositor = StateCompositor::new(ms(500));
        compositor.request(RenderStateKind::Card, now);
        assert_eq!(compositor.incoming(), None);
    }

    #[test]
    fn pending_requests_drain_in_order() {
        let requests = TransitionRequests::default();
        requests.push(RenderStateKind::Credits);
        requests.push(RenderStateKind::Card);
        assert_eq!(
            requests.drain(),
            vec![RenderStateKind::Credits, RenderStateKind::Card]
        );
        assert!(requests.drain().is_empty());
    }
}
