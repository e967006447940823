use crate::config::Color;
use crate::error::{Result, SubreelError};
use crate::layout::TextMeasure;
use crate::timeline::CaptionBlock;

use std::path::Path;

use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};

/// A loaded font, used both for layout measurement and for drawing.
pub struct FontFace {
    font: Font,
}

impl FontFace {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| SubreelError::Font {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|e| SubreelError::Font {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(FontFace { font })
    }

    fn ascent(&self, px: f32) -> f32 {
        self.font
            .horizontal_line_metrics(px)
            .map_or(px * 0.8, |m| m.ascent)
    }

    /// Draws `text` with its top-left corner at (`x`, `y`) into `canvas`.
    fn draw_line(&self, canvas: &mut RgbaImage, text: &str, px: f32, x: f32, y: f32, color: Color) {
        let baseline = y + self.ascent(px);
        let [r, g, b] = color.0;
        let mut cursor = x;
        for c in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(c, px);
            let gx = (cursor + metrics.xmin as f32).round() as i64;
            let gy = (baseline - (metrics.height as i32 + metrics.ymin) as f32).round() as i64;
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let coverage = bitmap[row * metrics.width + col];
                    if coverage == 0 {
                        continue;
                    }
                    let px_x = gx + col as i64;
                    let px_y = gy + row as i64;
                    if px_x < 0
                        || px_y < 0
                        || px_x >= canvas.width() as i64
                        || px_y >= canvas.height() as i64
                    {
                        continue;
                    }
                    let pixel = canvas.get_pixel_mut(px_x as u32, px_y as u32);
                    if coverage > pixel.0[3] {
                        *pixel = Rgba([r, g, b, coverage]);
                    }
                }
            }
            cursor += metrics.advance_width;
        }
    }

    /// Renders a block (label and wrapped lines) onto a transparent tile the
    /// size of the block. The tile's origin is the block's top-left corner.
    pub fn rasterize(&self, block: &CaptionBlock, label_color: Color, text_color: Color) -> RgbaImage {
        let text_width = block
            .lines
            .iter()
            .map(|l| self.width(l, block.text_font_size))
            .fold(0.0f32, f32::max);
        let width = (block.text_offset + text_width).ceil().max(1.0) as u32;
        let height = block.height().ceil().max(1.0) as u32;
        let mut tile = RgbaImage::new(width, height);

        self.draw_line(&mut tile, &block.label, block.label_font_size, 0.0, 0.0, label_color);
        for (i, line) in block.lines.iter().enumerate() {
            let y = i as f32 * (block.line_height + block.line_spacing);
            self.draw_line(&mut tile, line, block.text_font_size, block.text_offset, y, text_color);
        }
        tile
    }
}

impl TextMeasure for FontFace {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        text.chars()
            .map(|c| self.font.metrics(c, font_size).advance_width)
            .sum()
    }

    fn line_height(&self, font_size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(font_size)
            .map_or(font_size * 1.2, |m| m.new_line_size)
    }
}
