use anyhow::{anyhow, Result};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;

use super::result::{DetectionResult, Region};
use crate::frame::GrayFrame;

/// Intensity difference (0-255) a pixel must exceed to count as changed.
pub const DEFAULT_CHANGE_THRESHOLD: u8 = 25;

/// Passes of 3x3 dilation applied to the change mask.
pub const DEFAULT_DILATE_ITERATIONS: u8 = 2;

const CHANGED: u8 = 255;

/// Frame differencing detector.
///
/// Pipeline: absolute difference, binarize, dilate, external contours, area filter.
/// Stateless: the reference frame is owned by the caller.
#[derive(Clone, Debug)]
pub struct ChangeDetector {
    change_threshold: u8,
    dilate_iterations: u8,
    area_threshold: f64,
}

impl ChangeDetector {
    pub fn new(area_threshold: u32) -> Self {
        Self {
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            dilate_iterations: DEFAULT_DILATE_ITERATIONS,
            area_threshold: f64::from(area_threshold),
        }
    }

    pub fn with_change_threshold(mut self, change_threshold: u8) -> Self {
        self.change_threshold = change_threshold;
        self
    }

    pub fn with_dilate_iterations(mut self, dilate_iterations: u8) -> Self {
        self.dilate_iterations = dilate_iterations;
        self
    }

    pub fn area_threshold(&self) -> f64 {
        self.area_threshold
    }

    /// Binary mask (0 or 255) of changed pixels after dilation.
    pub fn change_mask(&self, reference: &GrayFrame, current: &GrayFrame) -> Result<GrayImage> {
        if reference.dimensions() != current.dimensions() {
            return Err(anyhow!(
                "frame dimensions changed: reference {}x{}, current {}x{}",
                reference.width(),
                reference.height(),
                current.width(),
                current.height()
            ));
        }

        let cutoff = self.change_threshold;
        let mask = GrayImage::from_fn(current.width(), current.height(), |x, y| {
            let a = reference.get_pixel(x, y)[0];
            let b = current.get_pixel(x, y)[0];
            if a.abs_diff(b) > cutoff {
                Luma([CHANGED])
            } else {
                Luma([0])
            }
        });

        // Repeated 3x3 dilation is the same as one chessboard-distance dilation.
        if self.dilate_iterations == 0 {
            Ok(mask)
        } else {
            Ok(dilate(&mask, Norm::LInf, self.dilate_iterations))
        }
    }

    /// Compare `current` against `reference` and report the regions of change.
    pub fn detect(&self, reference: &GrayFrame, current: &GrayFrame) -> Result<DetectionResult> {
        let mask = self.change_mask(reference, current)?;
        let (width, height) = mask.dimensions();

        // Foreground touching the image edge only gets an outer border once it is
        // surrounded by background, so trace on a copy with a one pixel empty frame.
        let regions: Vec<Region> = find_contours::<i32>(&with_empty_border(&mask))
            .iter()
            .filter(|contour| is_external(contour))
            .filter_map(|contour| region_from_contour(contour, width, height))
            .filter(|region| region.area >= self.area_threshold)
            .collect();

        Ok(DetectionResult {
            motion_detected: !regions.is_empty(),
            regions,
        })
    }
}

fn with_empty_border(mask: &GrayImage) -> GrayImage {
    let mut padded = GrayImage::new(mask.width() + 2, mask.height() + 2);
    image::imageops::replace(&mut padded, mask, 1, 1);
    padded
}

fn is_external(contour: &Contour<i32>) -> bool {
    contour.border_type == BorderType::Outer && contour.parent.is_none()
}

/// Bounding box in mask coordinates. Contour points come from the bordered copy and are
/// shifted back by one pixel.
fn region_from_contour(contour: &Contour<i32>, width: u32, height: u32) -> Option<Region> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    let clamp = |v: i32, len: u32| (v - 1).clamp(0, len as i32 - 1);
    let (min_x, max_x) = (clamp(min_x, width), clamp(max_x, width));
    let (min_y, max_y) = (clamp(min_y, height), clamp(max_y, height));

    Some(Region {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
        area: polygon_area(contour),
    })
}

/// Shoelace area of the closed contour polygon.
fn polygon_area(contour: &Contour<i32>) -> f64 {
    let points = &contour.points;
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += i64::from(p.x) * i64::from(q.y) - i64::from(q.x) * i64::from(p.y);
    }
    twice_area.abs() as f64 / 2.0
}
