use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rx_formats::{ButtonRecord, MovieRecord, PictureRecord, ScriptCommand, ScriptHandler, SoundGroupRecord};

use crate::error::{ScriptError, StackError};
use crate::geometry::{CoordinateMapper, Rect};
use crate::hotspot::HotspotTable;
use crate::stack::{CardDescriptor, SimpleCardDescriptor};

/// Script triggers attached to cards and hotspots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ScriptTrigger {
    MouseDown = 0,
    MouseStillDown = 1,
    MouseUp = 2,
    MouseEnter = 3,
    MouseInside = 4,
    MouseExit = 5,
    CardPrepare = 6,
    CardLeave = 7,
    CardStart = 9,
    ScreenUpdate = 10,
}

impl ScriptTrigger {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn label(self) -> &'static str {
        match self {
            ScriptTrigger::MouseDown => "mouse_down",
            ScriptTrigger::MouseStillDown => "mouse_still_down",
            ScriptTrigger::MouseUp => "mouse_up",
            ScriptTrigger::MouseEnter => "mouse_enter",
            ScriptTrigger::MouseInside => "mouse_inside",
            ScriptTrigger::MouseExit => "mouse_exit",
            ScriptTrigger::CardPrepare => "prepare",
            ScriptTrigger::CardLeave => "leave",
            ScriptTrigger::CardStart => "start",
            ScriptTrigger::ScreenUpdate => "screen_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieSlot {
    pub record: MovieRecord,
    pub enabled: bool,
    pub playing: bool,
}

/// Everything about a card that can show up on screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardVisual {
    pub picture: Option<PictureRecord>,
    pub sound_group: Option<u16>,
    pub movies: BTreeMap<u16, MovieSlot>,
    pub cursor: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotspotFrame {
    pub id: u16,
    pub enabled: bool,
    pub world_frame: Rect,
}

/// Immutable snapshot handed to the display context.
#[derive(Debug, Clone, PartialEq)]
pub struct CardFrame {
    pub location: SimpleCardDescriptor,
    pub name: String,
    pub generation: u64,
    pub visual: CardVisual,
    pub hotspots: Vec<HotspotFrame>,
}

/// Latest published card snapshot. Writers swap an `Arc`; readers clone it,
/// so the display context holds the lock only for a pointer copy.
#[derive(Debug, Default)]
pub struct CardFrameSource {
    current: Mutex<Option<Arc<CardFrame>>>,
    generation: AtomicU64,
}

impl CardFrameSource {
    pub fn latest(&self) -> Option<Arc<CardFrame>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn publish(&self, frame: Arc<CardFrame>) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(frame);
    }

    pub fn clear(&self) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// The active scene. Owned by the script context for the whole visit.
#[derive(Debug)]
pub struct Card {
    descriptor: CardDescriptor,
    name: String,
    scripts: Vec<ScriptHandler>,
    pictures: Vec<PictureRecord>,
    sound_groups: Vec<SoundGroupRecord>,
    movies: Vec<MovieRecord>,
    buttons: Vec<ButtonRecord>,
    pub hotspots: HotspotTable,
    pub visual: CardVisual,
    published: Option<Arc<CardFrame>>,
}

impl Card {
    pub fn open(descriptor: CardDescriptor, mapper: &CoordinateMapper) -> Result<Self, StackError> {
        let record = descriptor.load_record()?;
        Ok(Card {
            hotspots: HotspotTable::new(record.hotspots, mapper),
            descriptor,
            name: record.name,
            scripts: record.scripts,
            pictures: record.pictures,
            sound_groups: record.sound_groups,
            movies: record.movies,
            buttons: record.buttons,
            visual: CardVisual::default(),
            published: None,
        })
    }

    pub fn descriptor(&self) -> &CardDescriptor {
        &self.descriptor
    }

    pub fn location(&self) -> SimpleCardDescriptor {
        self.descriptor.simple()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self, trigger: ScriptTrigger) -> Option<&[ScriptCommand]> {
        self.scripts
            .iter()
            .find(|handler| handler.event == trigger.code())
            .map(|handler| handler.commands.as_slice())
    }

    pub fn picture(&self, index: u16) -> Result<&PictureRecord, ScriptError> {
        self.pictures
            .iter()
            .find(|record| record.index == index)
            .ok_or(ScriptError::ResourceIndex { list: "PLST", index })
    }

    pub fn sound_group(&self, index: u16) -> Result<&SoundGroupRecord, ScriptError> {
        self.sound_groups
            .iter()
            .find(|record| record.index == index)
            .ok_or(ScriptError::ResourceIndex { list: "SLST", index })
    }

    pub fn movie(&self, index: u16) -> Result<&MovieRecord, ScriptError> {
        self.movies
            .iter()
            .find(|record| record.index == index)
            .ok_or(ScriptError::ResourceIndex { list: "MLST", index })
    }

    pub fn button(&self, index: u16) -> Result<&ButtonRecord, ScriptError> {
        self.buttons
            .iter()
            .find(|record| record.index == index)
            .ok_or(ScriptError::ResourceIndex { list: "BLST", index })
    }

    pub fn snapshot(&self, generation: u64) -> CardFrame {
        CardFrame {
            location: self.location(),
            name: self.name.clone(),
            generation,
            visual: self.visual.clone(),
            hotspots: self
                .hotspots
                .iter()
                .map(|hotspot| HotspotFrame {
                    id: hotspot.id(),
                    enabled: hotspot.enabled,
                    world_frame: hotspot.world_frame(),
                })
                .collect(),
        }
    }

    /// Publishes the current state to the display context.
    pub fn publish(&mut self, source: &CardFrameSource) -> Arc<CardFrame> {
        let frame = Arc::new(self.snapshot(source.next_generation()));
        source.publish(frame.clone());
        self.published = Some(frame.clone());
        frame
    }

    /// Drops picture and cursor changes made since the last publish. Movie
    /// slots and the sound group mirror what the media player is doing, so
    /// they keep their live state and are still stopped when the card closes.
    pub fn discard_unpublished(&mut self) {
        let shown = self
            .published
            .as_ref()
            .map(|frame| &frame.visual);
        self.visual.picture = shown.and_then(|visual| visual.picture.clone());
        self.visual.cursor = shown.and_then(|visual| visual.cursor);
    }

    pub fn needs_publish(&self) -> bool {
        match &self.published {
            Some(frame) => {
                frame.visual != self.visual
                    || frame
                        .hotspots
                        .iter()
                        .zip(self.hotspots.iter())
                        .any(|(shown, live)| {
                            shown.enabled != live.enabled || shown.world_frame != live.world_frame()
                        })
            }
            None => true,
        }
    }
}
