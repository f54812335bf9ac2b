use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::Path;

const TITLE_FONT_SIZE: f32 = 130.0;
const LINE_SPACING: i32 = -20;
const STROKE_WIDTH: i32 = 3;
const SHADOW_OFFSET: (i32, i32) = (3, 3);
const SHADOW_ALPHA: u8 = 150;
const WRAP_WIDTH_FRACTION: f32 = 0.9;

const FILL: Rgba<u8> = Rgba([255, 215, 0, 255]);
const STROKE: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Rasterizes the title to a full-frame transparent PNG: gold fill, black
/// stroke, soft drop shadow, word-wrapped and centered near the top.
pub fn render_title(output_path: &Path, text: &str, frame: (u32, u32), font_bytes: Vec<u8>) -> Result<()> {
    let (width, height) = frame;
    let font = FontArc::try_from_vec(font_bytes).map_err(|_| anyhow::anyhow!("invalid font file"))?;
    let scale = PxScale::from(TITLE_FONT_SIZE);

    let max_line_width = (width as f32 * WRAP_WIDTH_FRACTION) as u32;
    let lines = wrap_words(text, max_line_width, |candidate| {
        text_size(scale, &font, candidate).0
    });

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    let line_advance = TITLE_FONT_SIZE as i32 + LINE_SPACING;
    let mut y = (height as f32 * 0.10) as i32;

    for line in &lines {
        let (line_w, _) = text_size(scale, &font, line);
        let x = (width as i32 - line_w as i32) / 2;

        let shadow = Rgba([0, 0, 0, SHADOW_ALPHA]);
        draw_text_mut(
            &mut canvas,
            shadow,
            x + SHADOW_OFFSET.0,
            y + SHADOW_OFFSET.1,
            scale,
            &font,
            line,
        );

        for (dx, dy) in stroke_offsets(STROKE_WIDTH) {
            draw_text_mut(&mut canvas, STROKE, x + dx, y + dy, scale, &font, line);
        }

        draw_text_mut(&mut canvas, FILL, x, y, scale, &font, line);
        y += line_advance;
    }

    canvas
        .save(output_path)
        .with_context(|| format!("write title: {}", output_path.display()))?;
    Ok(())
}

/// Ring of offsets approximating a stroke of the given radius.
fn stroke_offsets(radius: i32) -> Vec<(i32, i32)> {
    let mut out = Vec::new();
    for dx in -radius..=radius {
        for dy in -radius..=radius {
            if dx == 0 && dy == 0 {
                continue;
            }
            if dx * dx + dy * dy <= radius * radius {
                out.push((dx, dy));
            }
        }
    }
    out
}

/// Greedy word wrap against a caller-supplied measurement. A single word
/// wider than the budget gets its own line rather than being split.
pub fn wrap_words<F>(text: &str, max_width: u32, measure: F) -> Vec<String>
where
    F: Fn(&str) -> u32,
{
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };

        if measure(&candidate) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
