//! Screen regions: absolute rectangles, window-relative ratios, and the
//! spec a wait uses to re-resolve its region on every poll.

use serde::{Deserialize, Serialize};

/// A rectangle in absolute screen pixels.
///
/// The origin is signed because monitors left of or above the primary one
/// have negative coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Saturates at `i32::MAX` for extents past the coordinate range.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(span(self.width))
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(span(self.height))
    }

    /// Returns the overlap with `bounds`, or `None` if they don't touch.
    pub fn intersect(&self, bounds: &Region) -> Option<Region> {
        let left = self.x.max(bounds.x);
        let top = self.y.max(bounds.y);
        let right = self.right().min(bounds.right());
        let bottom = self.bottom().min(bounds.bottom());

        if right <= left || bottom <= top {
            return None;
        }
        Some(Region::new(
            left,
            top,
            right.abs_diff(left),
            bottom.abs_diff(top),
        ))
    }

    /// Center point, used for clicking.
    pub fn center(&self) -> (i32, i32) {
        (
            self.x.saturating_add(span(self.width / 2)),
            self.y.saturating_add(span(self.height / 2)),
        )
    }

    /// Parses `x,y,w,h` as written on the command line.
    ///
    /// Sizes must fit in `i32`, like every screen coordinate.
    pub fn parse(s: &str) -> Option<Region> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return None;
        }
        let size = |p: &str| -> Option<u32> {
            let v: u32 = p.parse().ok()?;
            i32::try_from(v).is_ok().then_some(v)
        };
        Some(Region::new(
            parts[0].parse().ok()?,
            parts[1].parse().ok()?,
            size(parts[2])?,
            size(parts[3])?,
        ))
    }
}

fn span(extent: u32) -> i32 {
    i32::try_from(extent).unwrap_or(i32::MAX)
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// A rectangle in relative coordinates (0.0 to 1.0).
/// Used for defining screen regions that scale with window size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativeRect {
    /// X position of top-left corner (0.0 = left edge, 1.0 = right edge)
    pub x: f32,
    /// Y position of top-left corner (0.0 = top edge, 1.0 = bottom edge)
    pub y: f32,
    /// Width as fraction of window width
    pub width: f32,
    /// Height as fraction of window height
    pub height: f32,
}

impl Default for RelativeRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

impl RelativeRect {
    /// `absolute = window_origin + window_size * ratio`
    pub fn resolve(&self, window: &Region) -> Region {
        let w = window.width as f32;
        let h = window.height as f32;
        Region::new(
            window.x.saturating_add((w * self.x) as i32),
            window.y.saturating_add((h * self.y) as i32),
            (w * self.width) as u32,
            (h * self.height) as u32,
        )
    }
}

/// Where a wait should look. Resolved again on every poll so a moved or
/// resized window is followed.
#[derive(Clone, Debug, PartialEq)]
pub enum RegionSpec {
    Absolute(Region),
    WindowRelative {
        title: String,
        /// Tried when no window matches `title`
        fallback_title: Option<String>,
        rect: RelativeRect,
    },
}

impl RegionSpec {
    pub fn window_relative(title: &str, rect: RelativeRect) -> Self {
        RegionSpec::WindowRelative {
            title: title.to_string(),
            fallback_title: None,
            rect,
        }
    }

    pub fn with_fallback_title(self, fallback: &str) -> Self {
        match self {
            RegionSpec::WindowRelative { title, rect, .. } => RegionSpec::WindowRelative {
                title,
                fallback_title: Some(fallback.to_string()),
                rect,
            },
            other => other,
        }
    }
}

impl From<Region> for RegionSpec {
    fn from(region: Region) -> Self {
        RegionSpec::Absolute(region)
    }
}
