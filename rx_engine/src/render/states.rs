use log::trace;

use super::{FrameInputs, LayerContent, RenderStateKind};

const CREDITS_FRAMES_PER_PAGE: u64 = 30;

/// Per-frame hooks of one render state. `post_flush` follows the buffer
/// swap and is only valid after `render` in the same frame.
pub trait StateView {
    fn kind(&self) -> RenderStateKind;
    fn render(&mut self, inputs: &FrameInputs) -> LayerContent;
    fn post_flush(&mut self);
}

/// Shows the latest published card snapshot.
#[derive(Debug, Default)]
pub struct CardView {
    rendered: bool,
    last_generation: Option<u64>,
}

impl StateView for CardView {
    fn kind(&self) -> RenderStateKind {
        RenderStateKind::Card
    }

    fn render(&mut self, inputs: &FrameInputs) -> LayerContent {
        self.rendered = true;
        let Some(frame) = inputs.card.as_ref() else {
            return LayerContent::Blank;
        };
        if self.last_generation != Some(frame.generation) {
            trace!("card view picked up generation {}", frame.generation);
            self.last_generation = Some(frame.generation);
        }
        LayerContent::Card {
            location: frame.location.clone(),
            generation: frame.generation,
            picture: frame.visual.picture.as_ref().map(|picture| picture.bitmap),
            movies_playing: frame
                .visual
                .movies
                .iter()
                .filter(|(_, slot)| slot.enabled && slot.playing)
                .map(|(code, _)| *code)
                .collect(),
        }
    }

    fn post_flush(&mut self) {
        debug_assert!(self.rendered, "card view flushed without a render");
        self.rendered = false;
    }
}

/// Full-screen movie played between two locations.
#[derive(Debug, Default)]
pub struct MovieView {
    rendered: bool,
    frames: u64,
}

impl StateView for MovieView {
    fn kind(&self) -> RenderStateKind {
        RenderStateKind::TransitionMovie
    }

    fn render(&mut self, _inputs: &FrameInputs) -> LayerContent {
        self.rendered = true;
        LayerContent::TransitionMovie { frame: self.frames }
    }

    fn post_flush(&mut self) {
        debug_assert!(self.rendered, "movie view flushed without a render");
        self.rendered = false;
        self.frames += 1;
    }
}

#[derive(Debug, Default)]
pub struct CreditsView {
    rendered: bool,
    frames: u64,
}

impl StateView for CreditsView {
    fn kind(&self) -> RenderStateKind {
        RenderStateKind::Credits
    }

    fn render(&mut self, _inputs: &FrameInputs) -> LayerContent {
        self.rendered = true;
        LayerContent::Credits {
            page: (self.frames / CREDITS_FRAMES_PER_PAGE) as u32,
        }
    }

    fn post_flush(&mut self) {
        debug_assert!(self.rendered, "credits view flushed without a render");
        self.rendered = false;
        self.frames += 1;
    }
}

/// The closed set of render states.
#[derive(Debug)]
pub enum RenderState {
    Card(CardView),
    TransitionMovie(MovieView),
    Credits(CreditsView),
}

impl RenderState {
    pub fn new(kind: RenderStateKind) -> Self {
        match kind {
            RenderStateKind::Card => RenderState::Card(CardView::default()),
            RenderStateKind::TransitionMovie => RenderState::TransitionMovie(MovieView::default()),
            RenderStateKind::Credits => RenderState::Credits(CreditsView::default()),
        }
    }
}

impl StateView for RenderState {
    fn kind(&self) -> RenderStateKind {
        match self {
            Self::Card(inner) => inner.kind(),
            Self::TransitionMovie(inner) => inner.kind(),
            Self::Credits(inner) => inner.kind(),
        }
    }

    fn render(&mut self, inputs: &FrameInputs) -> LayerContent {
        match self {
            Self::Card(inner) => inner.render(inputs),
            Self::TransitionMovie(inner) => inner.render(inputs),
            Self::Credits(inner) => inner.render(inputs),
        }
    }

    fn post_flush(&mut self) {
        match self {
            Self::Card(inner) => inner.post_flush(),
            Self::TransitionMovie(inner) => inner.post_flush(),
            Self::Credits(inner) => inner.post_flush(),
        }
    }
}
