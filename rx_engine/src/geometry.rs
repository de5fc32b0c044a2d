//! Mapping between authored card coordinates ("core" space, top-left origin,
//! fixed resolution) and live viewport coordinates ("world" space, bottom-left
//! origin, arbitrary size).

use rx_formats::CoreRectRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
            || !self.width.is_finite()
            || !self.height.is_finite()
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// World-space rectangle: origin is the bottom-left corner, Y grows upward.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A raw pointer sample: a point with no area.
    pub fn pointer(point: Point) -> Self {
        Self::new(point.x, point.y, f32::INFINITY, f32::INFINITY)
    }
}

/// Core-space rectangle in authored card pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CoreRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl CoreRect {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Half-open containment test.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

impl From<CoreRectRecord> for CoreRect {
    fn from(record: CoreRectRecord) -> Self {
        CoreRect::new(
            f32::from(record.left),
            f32::from(record.top),
            f32::from(record.right),
            f32::from(record.bottom),
        )
    }
}

/// Computes where the card content sits inside `viewport`, keeping the core
/// aspect ratio and leaving `margin_height` free at the bottom.
///
/// Degenerate inputs (no area, or no room above the margin) yield
/// [`Rect::ZERO`].
pub fn effective_frame(viewport: Size, core: Size, margin_height: f32) -> Rect {
    let available_height = viewport.height - margin_height.max(0.0);
    if viewport.is_degenerate() || core.is_degenerate() || !(available_height > 0.0) {
        return Rect::ZERO;
    }

    let content_aspect = core.aspect();
    let (width, height) = if viewport.aspect() > content_aspect {
        let mut width = viewport.width;
        let mut height = width / content_aspect;
        if height > available_height {
            height = available_height;
            width = height * content_aspect;
        }
        (width, height)
    } else {
        let mut height = available_height;
        let mut width = height * content_aspect;
        if width > viewport.width {
            width = viewport.width;
            height = width / content_aspect;
        }
        (width, height)
    };

    Rect::new(
        (viewport.width - width) / 2.0,
        margin_height.max(0.0),
        width,
        height,
    )
}

/// Converts between core and world space for one viewport. The effective
/// frame is computed by [`CoordinateMapper::viewport_changed`] and cached
/// until the next call.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    core: Size,
    margin_height: f32,
    viewport: Size,
    frame: Rect,
}

impl CoordinateMapper {
    pub fn new(core: Size, margin_height: f32, viewport: Size) -> Self {
        let mut mapper = CoordinateMapper {
            core,
            margin_height,
            viewport,
            frame: Rect::ZERO,
        };
        mapper.viewport_changed(viewport);
        mapper
    }

    pub fn viewport_changed(&mut self, viewport: Size) {
        self.viewport = viewport;
        self.frame = effective_frame(viewport, self.core, self.margin_height);
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn core_size(&self) -> Size {
        self.core
    }

    pub fn effective_frame(&self) -> Rect {
        self.frame
    }

    fn scale(&self) -> Option<(f32, f32)> {
        if self.frame.width > 0.0 && self.frame.height > 0.0 {
            Some((
                self.frame.width / self.core.width,
                self.frame.height / self.core.height,
            ))
        } else {
            None
        }
    }

    pub fn core_to_world(&self, rect: CoreRect) -> Rect {
        let Some((scale_x, scale_y)) = self.scale() else {
            return Rect::ZERO;
        };
        // flip into a bottom-left origin before scaling
        let flipped_y = self.core.height - rect.bottom;
        Rect::new(
            self.frame.x + rect.left * scale_x,
            self.frame.y + flipped_y * scale_y,
            rect.width() * scale_x,
            rect.height() * scale_y,
        )
    }

    pub fn world_to_core(&self, rect: Rect) -> CoreRect {
        let Some((scale_x, scale_y)) = self.scale() else {
            return CoreRect::default();
        };
        let mut rect = rect;
        if rect.width.is_infinite() && rect.height.is_infinite() {
            rect.width = 0.0;
            rect.height = 0.0;
        }

        let left = (rect.x - self.frame.x) / scale_x;
        let flipped_y = (rect.y - self.frame.y) / scale_y;
        let width = rect.width / scale_x;
        let height = rect.height / scale_y;
        let bottom = self.core.height - flipped_y;
        CoreRect::new(left, bottom - height, left + width, bottom)
    }

    pub fn world_point_to_core(&self, point: Point) -> Point {
        let core = self.world_to_core(Rect::pointer(point));
        Point::new(core.left, core.top)
    }
}
