//! Runtime core of a card-based adventure engine: stacks of authored cards,
//! a bytecode script interpreter driving hotspots and media, coordinate
//! mapping between the authored card space and the window, and the
//! render-state compositor ticked by the display clock.

pub mod card;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod geometry;
pub mod hotspot;
pub mod media;
pub mod render;
pub mod script;
pub mod stack;
pub mod state;
pub mod variables;
pub mod world;

pub use card::{Card, CardFrame, CardFrameSource, CardVisual, ScriptTrigger};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::{ScriptError, StackError, WorldError};
pub use events::EventLog;
pub use geometry::{CoordinateMapper, CoreRect, Point, Rect, Size};
pub use hotspot::{Hotspot, HotspotTable, HotspotTracker, HotspotTransition};
pub use media::{CompletionHandle, MediaEvent, MediaPlayer, MediaRef, RecordingMediaPlayer};
pub use render::{FrameReport, RenderStateKind, StateCompositor};
pub use script::{Opcode, ScriptEngine};
pub use stack::{
    ArchiveProvider, CardDescriptor, DirectoryProvider, MemoryArchive, MemoryProvider,
    SimpleCardDescriptor, Stack, StackArchive, StackResolver,
};
pub use state::GameState;
pub use variables::{EngineValue, EngineVariables};
pub use world::World;
