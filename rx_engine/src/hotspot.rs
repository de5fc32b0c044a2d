use rx_formats::{HotspotRecord, ScriptCommand, ScriptHandler};

use crate::geometry::{CoordinateMapper, CoreRect, Point, Rect};

#[derive(Debug, Clone)]
pub struct Hotspot {
    index: u16,
    id: u16,
    rect: CoreRect,
    cursor_id: u16,
    scripts: Vec<ScriptHandler>,
    name: String,
    world_frame: Rect,
    pub enabled: bool,
}

impl Hotspot {
    pub fn new(index: u16, record: HotspotRecord) -> Self {
        Hotspot {
            index,
            id: record.id,
            rect: CoreRect::from(record.rect),
            cursor_id: record.cursor,
            scripts: record.scripts,
            name: record.name,
            world_frame: Rect::ZERO,
            enabled: record.enabled,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn rect(&self) -> CoreRect {
        self.rect
    }

    pub fn cursor_id(&self) -> u16 {
        self.cursor_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn world_frame(&self) -> Rect {
        self.world_frame
    }

    pub fn script(&self, event: u16) -> Option<&[ScriptCommand]> {
        self.scripts
            .iter()
            .find(|handler| handler.event == event)
            .map(|handler| handler.commands.as_slice())
    }

    pub fn describe(&self) -> String {
        if self.name.is_empty() {
            format!("{}", self.id)
        } else {
            format!("{} {}", self.id, self.name)
        }
    }
}

/// Hotspots of one card in declaration order; lower index wins overlaps.
#[derive(Debug, Clone, Default)]
pub struct HotspotTable {
    hotspots: Vec<Hotspot>,
}

impl HotspotTable {
    pub fn new(records: Vec<HotspotRecord>, mapper: &CoordinateMapper) -> Self {
        let mut table = HotspotTable {
            hotspots: records
                .into_iter()
                .enumerate()
                .map(|(index, record)| Hotspot::new(index as u16, record))
                .collect(),
        };
        table.viewport_changed(mapper);
        table
    }

    pub fn viewport_changed(&mut self, mapper: &CoordinateMapper) {
        for hotspot in &mut self.hotspots {
            hotspot.world_frame = mapper.core_to_world(hotspot.rect);
        }
    }

    pub fn len(&self) -> usize {
        self.hotspots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotspots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hotspot> {
        self.hotspots.iter()
    }

    pub fn get(&self, index: u16) -> Option<&Hotspot> {
        self.hotspots.get(index as usize)
    }

    pub fn by_id_mut(&mut self, id: u16) -> Option<&mut Hotspot> {
        self.hotspots.iter_mut().find(|hotspot| hotspot.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Hotspot> {
        self.hotspots.iter().filter(|hotspot| hotspot.enabled)
    }

    /// First enabled hotspot containing the core-space point.
    pub fn hit_test(&self, core: Point) -> Option<&Hotspot> {
        self.active()
            .find(|hotspot| hotspot.rect.contains(core.x, core.y))
    }

    /// Maps a world-space pointer sample into core space and hit tests it.
    pub fn hit_test_world(&self, mapper: &CoordinateMapper, world: Point) -> Option<&Hotspot> {
        self.hit_test(mapper.world_point_to_core(world))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotTransition {
    Exited(u16),
    Entered(u16),
}

/// Tracks which hotspot the pointer is inside; at most one at a time.
#[derive(Debug, Clone, Default)]
pub struct HotspotTracker {
    active: Option<u16>,
}

impl HotspotTracker {
    pub fn active(&self) -> Option<u16> {
        self.active
    }

    /// Moves to `next`, returning the exit event (if any) before the enter.
    pub fn update(&mut self, next: Option<u16>) -> Vec<HotspotTransition> {
        if next == self.active {
            return Vec::new();
        }
        let mut transitions = Vec::with_capacity(2);
        if let Some(previous) = self.active.take() {
            transitions.push(HotspotTransition::Exited(previous));
        }
        if let Some(entered) = next {
            transitions.push(HotspotTransition::Entered(entered));
        }
        self.active = next;
        transitions
    }

    pub fn reset(&mut self) {
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use rx_formats::CoreRectRecord;

    fn record(id: u16, left: i16, top: i16, right: i16, bottom: i16) -> HotspotRecord {
        HotspotRecord {
            id,
            rect: CoreRectRecord {
                left,
                top,
                right,
                bottom,
            },
            cursor: 2000 + id,
            name: format!("spot{id}"),
            enabled: true,
            scripts: Vec::new(),
        }
    }

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(Size::new(608.0, 392.0), 80.0, Size::new(608.0, 472.0))
    }

    #[test]
    fn overlapping_hotspots_prefer_declaration_order() {
        let mut table = HotspotTable::new(
            vec![record(10, 0, 0, 200, 200), record(11, 100, 100, 300, 300)],
            &mapper(),
        );
        let inside_both = Point::new(150.0, 150.0);
        assert_eq!(table.hit_test(inside_both).map(Hotspot::id), Some(10));

        table.by_id_mut(10).unwrap().enabled = false;
        assert_eq!(table.hit_test(inside_both).map(Hotspot::id), Some(11));

        table.by_id_mut(11).unwrap().enabled = false;
        assert!(table.hit_test(inside_both).is_none());
    }

    #[test]
    fn world_hit_test_goes_through_mapper() {
        let mapper = mapper();
        let table = HotspotTable::new(vec![record(1, 0, 0, 100, 50)], &mapper);
        // core (10, 10) sits near the top of the card, high in world space
        let world = Point::new(10.0, 80.0 + 392.0 - 10.0);
        assert_eq!(table.hit_test_world(&mapper, world).map(Hotspot::id), Some(1));
        let below = Point::new(10.0, 80.0 + 392.0 - 60.0);
        assert!(table.hit_test_world(&mapper, below).is_none());
    }

    #[test]
    fn world_frames_follow_viewport_changes() {
        let mut mapper = mapper();
        let mut table = HotspotTable::new(vec![record(1, 0, 0, 100, 50)], &mapper);
        let before = table.get(0).unwrap().world_frame();
        mapper.viewport_changed(Size::new(1216.0, 944.0));
        table.viewport_changed(&mapper);
        let after = table.get(0).unwrap().world_frame();
        assert!((after.width - before.width * 2.0).abs() < 1e-3);
    }

    #[test]
    fn tracker_exits_before_entering() {
        let mut tracker = HotspotTracker::default();
        assert_eq!(tracker.update(Some(0)), vec![HotspotTransition::Entered(0)]);
        assert!(tracker.update(Some(0)).is_empty());
        assert_eq!(
            tracker.update(Some(1)),
            vec![HotspotTransition::Exited(0), HotspotTransition::Entered(1)]
        );
        assert_eq!(tracker.update(None), vec![HotspotTransition::Exited(1)]);
        assert_eq!(tracker.active(), None);
    }
}
