//! Snapshot overlays.
//!
//! Overlays are additive: a pixel is only written when it is part of a region outline or
//! a lit glyph cell. Everything else in the frame is left untouched.

use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::config::OutputSettings;
use crate::detect::Region;

/// e.g. `Monday 19 October 2026 08:15:42.123456`
pub const TIMESTAMP_FORMAT: &str = "%A %d %B %Y %H:%M:%S%.6f";

pub const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TIMESTAMP_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Distance of the timestamp from the left edge and of its baseline from the bottom edge.
const TEXT_MARGIN: u32 = 10;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnotationOptions {
    /// Write the capture time in the bottom-left corner.
    pub timestamp: bool,
    /// Outline every detected region.
    pub highlight: bool,
}

impl From<&OutputSettings> for AnnotationOptions {
    fn from(settings: &OutputSettings) -> Self {
        Self {
            timestamp: settings.add_date_to_picture,
            highlight: settings.highlight_detected_changes,
        }
    }
}

/// Draw the enabled overlays onto `frame`.
pub fn annotate(
    frame: &mut RgbImage,
    regions: &[Region],
    captured_at: &DateTime<Local>,
    options: AnnotationOptions,
) {
    if options.highlight {
        log::debug!("highlighting {} region(s)", regions.len());
        for region in regions {
            draw_region(frame, region);
        }
    }
    if options.timestamp {
        let text = format_timestamp(captured_at);
        let baseline = frame.height().saturating_sub(TEXT_MARGIN);
        draw_text(frame, TEXT_MARGIN, baseline, &text, TIMESTAMP_COLOR);
    }
}

pub fn format_timestamp(captured_at: &DateTime<Local>) -> String {
    captured_at.format(TIMESTAMP_FORMAT).to_string()
}

fn draw_region(frame: &mut RgbImage, region: &Region) {
    if region.width == 0 || region.height == 0 {
        return;
    }
    let rect = Rect::at(region.x as i32, region.y as i32).of_size(region.width, region.height);
    draw_hollow_rect_mut(frame, rect, HIGHLIGHT_COLOR);
}

/// Render `text` with the built-in 5x7 font. `baseline` is the row just below the glyphs.
/// Characters without a glyph advance the cursor like a space. Pixels off-frame are
/// clipped.
pub fn draw_text(frame: &mut RgbImage, x: u32, baseline: u32, text: &str, color: Rgb<u8>) {
    let top = i64::from(baseline) - i64::from(GLYPH_HEIGHT);
    let (width, height) = (i64::from(frame.width()), i64::from(frame.height()));

    for (index, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let left = i64::from(x) + index as i64 * i64::from(GLYPH_ADVANCE);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = left + i64::from(col);
                let py = top + row as i64;
                if (0..width).contains(&px) && (0..height).contains(&py) {
                    frame.put_pixel(px as u32, py as u32, color);
                }
            }
        }
    }
}

/// Letters render in capitals.
fn glyph(ch: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    let rows = match ch.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        _ => return None,
    };
    Some(rows)
}
