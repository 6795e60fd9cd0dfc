/// Result of comparing one frame against the reference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    /// True iff at least one region passed the area threshold.
    pub motion_detected: bool,
    /// Regions whose area reached the threshold. Order is not meaningful.
    pub regions: Vec<Region>,
}

/// Bounding box and area of one connected area of change, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Area enclosed by the region's outer contour.
    pub area: f64,
}

impl Region {
    /// True when the pixel `(px, py)` lies inside the bounding box.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && py >= self.y && px < self.x + self.width && py < self.y + self.height
    }
}
