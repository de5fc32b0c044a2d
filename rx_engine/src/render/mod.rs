//! Render-state sequencing: which full-screen state is showing, and the
//! cross-fade between two of them on the display clock.

mod compositor;
mod states;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::card::CardFrame;
use crate::error::ScriptError;
use crate::stack::SimpleCardDescriptor;

pub use compositor::{StateCompositor, TransitionRequests};
pub use states::{CardView, CreditsView, MovieView, RenderState, StateView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStateKind {
    Card,
    TransitionMovie,
    Credits,
}

impl RenderStateKind {
    pub fn label(self) -> &'static str {
        match self {
            RenderStateKind::Card => "card",
            RenderStateKind::TransitionMovie => "transition_movie",
            RenderStateKind::Credits => "credits",
        }
    }
}

impl TryFrom<u16> for RenderStateKind {
    type Error = ScriptError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RenderStateKind::Card),
            1 => Ok(RenderStateKind::TransitionMovie),
            2 => Ok(RenderStateKind::Credits),
            other => Err(ScriptError::UnknownRenderState(other)),
        }
    }
}

impl fmt::Display for RenderStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the display context can read this frame.
#[derive(Debug, Clone, Default)]
pub struct FrameInputs {
    pub card: Option<Arc<CardFrame>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "content", rename_all = "snake_case")]
pub enum LayerContent {
    Blank,
    Card {
        location: SimpleCardDescriptor,
        generation: u64,
        picture: Option<u16>,
        movies_playing: Vec<u16>,
    },
    TransitionMovie {
        frame: u64,
    },
    Credits {
        page: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub state: RenderStateKind,
    pub alpha: f32,
    pub content: LayerContent,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:.2}: ", self.state, self.alpha)?;
        match &self.content {
            LayerContent::Blank => f.write_str("blank"),
            LayerContent::Card {
                location,
                generation,
                picture,
                movies_playing,
            } => {
                write!(f, "card {location} gen {generation}")?;
                if let Some(bitmap) = picture {
                    write!(f, " picture {bitmap}")?;
                }
                if !movies_playing.is_empty() {
                    write!(f, " movies {movies_playing:?}")?;
                }
                Ok(())
            }
            LayerContent::TransitionMovie { frame } => write!(f, "movie frame {frame}"),
            LayerContent::Credits { page } => write!(f, "credits page {page}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    Render,
    Composite,
    PostFlush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HookCall {
    pub hook: Hook,
    pub state: Option<RenderStateKind>,
}

impl HookCall {
    pub fn render(state: RenderStateKind) -> Self {
        Self {
            hook: Hook::Render,
            state: Some(state),
        }
    }

    pub fn composite() -> Self {
        Self {
            hook: Hook::Composite,
            state: None,
        }
    }

    pub fn post_flush(state: RenderStateKind) -> Self {
        Self {
            hook: Hook::PostFlush,
            state: Some(state),
        }
    }
}

/// Result of one display tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub current: RenderStateKind,
    pub incoming: Option<RenderStateKind>,
    pub blend: f32,
    pub layers: Vec<Layer>,
    pub hooks: Vec<HookCall>,
}
