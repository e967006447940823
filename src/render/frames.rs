use super::font::FontFace;
use super::RenderBackend;
use crate::config::RenderConfig;
use crate::error::{Result, SubreelError};
use crate::ffmpeg::SegmentEncoder;
use crate::recovery::{concatenate_segments, ConcatenationTool};
use crate::scheduler::RenderOp;
use crate::timeline::{BlockId, CaptionBlock};

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage, RgbaImage};
use tracing::{debug, info};

struct SceneBlock {
    id: BlockId,
    tile: RgbaImage,
    x: f32,
    y: f32,
}

/// Converts virtual time into whole frames without accumulating rounding
/// error: each call returns how many frames bring the output up to the
/// running total.
#[derive(Debug, Default)]
pub struct FrameClock {
    fps: u32,
    elapsed: f64,
    frames: u64,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        FrameClock {
            fps,
            elapsed: 0.0,
            frames: 0,
        }
    }

    pub fn advance(&mut self, seconds: f64) -> u64 {
        self.elapsed += seconds.max(0.0);
        let target = (self.elapsed * self.fps as f64).round() as u64;
        let n = target.saturating_sub(self.frames);
        self.frames += n;
        n
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Eases in and out over `t` in [0, 1].
fn smooth(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub struct FrameBackend<'a, C> {
    config: &'a RenderConfig,
    font: &'a FontFace,
    encoder: SegmentEncoder,
    concat: C,
    segment_dir: PathBuf,
    output: PathBuf,
    scene: Vec<SceneBlock>,
    segments: Vec<PathBuf>,
    clock: FrameClock,
    width: u32,
    height: u32,
}

impl<'a, C: ConcatenationTool> FrameBackend<'a, C> {
    pub fn new(
        config: &'a RenderConfig,
        font: &'a FontFace,
        ffmpeg: PathBuf,
        concat: C,
        segment_dir: &Path,
        output: &Path,
    ) -> Result<Self> {
        let (width, height, fps) = config.frame();
        std::fs::create_dir_all(segment_dir)?;
        Ok(FrameBackend {
            config,
            font,
            encoder: SegmentEncoder {
                ffmpeg,
                width,
                height,
                fps,
                crf: config.crf,
                preset: config.preset.clone(),
            },
            concat,
            segment_dir: segment_dir.to_path_buf(),
            output: output.to_path_buf(),
            scene: Vec::new(),
            segments: Vec::new(),
            clock: FrameClock::new(fps),
            width,
            height,
        })
    }

    fn background(&self) -> RgbImage {
        RgbImage::from_pixel(self.width, self.height, Rgb(self.config.background.0))
    }

    /// Draws the scene; the block at `partial` is only drawn up to the
    /// given fraction of its width.
    fn compose(&self, partial: Option<(BlockId, f32)>) -> RgbImage {
        let mut frame = self.background();
        for block in &self.scene {
            let visible = match partial {
                Some((id, fraction)) if id == block.id => fraction,
                _ => 1.0,
            };
            blit(&mut frame, &block.tile, block.x, block.y, visible);
        }
        frame
    }

    /// Encodes `count` frames produced by `frame_at(i)` into the next
    /// segment. A failed segment is removed before the error propagates.
    fn emit<F>(&mut self, count: u64, mut frame_at: F) -> Result<()>
    where
        F: FnMut(&Self, u64) -> RgbImage,
    {
        if count == 0 {
            return Ok(());
        }
        let path = self
            .segment_dir
            .join(format!("{:05}.mp4", self.segments.len()));
        let mut writer = self.encoder.start(&path)?;
        for i in 0..count {
            let frame = frame_at(self, i);
            if let Err(err) = writer.write_frame(frame.as_raw()) {
                writer.abort();
                return Err(err);
            }
        }
        let path = writer.finish()?;
        debug!("Wrote {} frames to {}", count, path.display());
        self.segments.push(path);
        Ok(())
    }

    fn reveal(&mut self, block: &CaptionBlock, duration: f64) -> Result<()> {
        let label_color = self.config.speaker_color(&block.speaker);
        debug!("Revealing block {} ({} in {})", block.id, block.label, label_color);
        let tile = self.font.rasterize(block, label_color, self.config.text_color);
        self.scene.push(SceneBlock {
            id: block.id,
            tile,
            x: block.left,
            y: block.top,
        });
        let count = self.clock.advance(duration);
        let id = block.id;
        self.emit(count, |backend, i| {
            backend.compose(Some((id, (i + 1) as f32 / count as f32)))
        })
    }

    fn shift(&mut self, blocks: &[BlockId], offset: f32, duration: f64) -> Result<()> {
        let starts: Vec<(usize, f32)> = self
            .scene
            .iter()
            .enumerate()
            .filter(|(_, b)| blocks.contains(&b.id))
            .map(|(i, b)| (i, b.y))
            .collect();
        let count = self.clock.advance(duration);
        let result = self.emit(count, |backend, i| {
            let progress = smooth((i + 1) as f32 / count as f32);
            let mut frame = backend.background();
            for (index, block) in backend.scene.iter().enumerate() {
                let y = match starts.iter().find(|(j, _)| *j == index) {
                    Some((_, start)) => start - offset * progress,
                    None => block.y,
                };
                blit(&mut frame, &block.tile, block.x, y, 1.0);
            }
            frame
        });
        // Applied even when the shift got no frames.
        for (index, start) in starts {
            self.scene[index].y = start - offset;
        }
        result
    }

    fn hold(&mut self, duration: f64) -> Result<()> {
        let count = self.clock.advance(duration);
        let frame = self.compose(None);
        self.emit(count, |_, _| frame.clone())
    }
}

impl<C: ConcatenationTool> RenderBackend for FrameBackend<'_, C> {
    fn apply(&mut self, op: &RenderOp) -> Result<()> {
        match op {
            RenderOp::Reveal { block, duration } => self.reveal(block, *duration),
            RenderOp::Shift {
                blocks,
                offset,
                duration,
            } => self.shift(blocks, *offset, *duration),
            RenderOp::Hold { duration } => self.hold(*duration),
            RenderOp::Evict { block } => {
                self.scene.retain(|b| b.id != *block);
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> Result<PathBuf> {
        if self.segments.is_empty() {
            return Err(SubreelError::backend("nothing was rendered"));
        }
        info!(
            "Rendered {} frames in {} segments",
            self.clock.frames(),
            self.segments.len()
        );
        concatenate_segments(
            &self.concat,
            self.segments.clone(),
            &self.segment_dir,
            &self.output,
        )
    }
}

/// Alpha-blends `tile` onto `frame` at (`x`, `y`), keeping only the left
/// `visible` fraction of the tile.
fn blit(frame: &mut RgbImage, tile: &RgbaImage, x: f32, y: f32, visible: f32) {
    let ox = x.round() as i64;
    let oy = y.round() as i64;
    let cols = (tile.width() as f32 * visible.clamp(0.0, 1.0)).ceil() as u32;
    for ty in 0..tile.height() {
        let fy = oy + ty as i64;
        if fy < 0 || fy >= frame.height() as i64 {
            continue;
        }
        for tx in 0..cols.min(tile.width()) {
            let fx = ox + tx as i64;
            if fx < 0 || fx >= frame.width() as i64 {
                continue;
            }
            let src = tile.get_pixel(tx, ty).0;
            if src[3] == 0 {
                continue;
            }
            let dst = frame.get_pixel_mut(fx as u32, fy as u32);
            let alpha = src[3] as u32;
            for c in 0..3 {
                dst.0[c] = ((src[c] as u32 * alpha + dst.0[c] as u32 * (255 - alpha)) / 255) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Color;
    use image::Rgba;

    fn pixel(frame: &RgbImage, x: u32, y: u32) -> Color {
        Color(frame.get_pixel(x, y).0)
    }

    #[test]
    fn test_frame_clock_does_not_drift() {
        let mut clock = FrameClock::new(30);
        let mut total = 0;
        for _ in 0..10 {
            total += clock.advance(0.1);
            total += clock.advance(1.0 / 7.0);
        }
        let expected = ((10.0 * (0.1 + 1.0 / 7.0)) * 30.0f64).round() as u64;

        assert_eq!(total, expected);
        assert_eq!(clock.frames(), expected);
    }

    #[test]
    fn test_frame_clock_example_pacing() {
        let mut clock = FrameClock::new(30);
        let counts: Vec<u64> = [0.5, 1.5, 0.5, 1.5, 1.0]
            .iter()
            .map(|&d| clock.advance(d))
            .collect();

        assert_eq!(counts, vec![15, 45, 15, 45, 30]);
        assert_eq!(clock.frames(), 150);
    }

    #[test]
    fn test_frame_clock_tiny_durations_may_take_no_frames() {
        let mut clock = FrameClock::new(30);

        assert_eq!(clock.advance(0.01), 0);
        assert_eq!(clock.advance(0.01), 1);
    }

    #[test]
    fn test_smooth_endpoints() {
        assert_eq!(smooth(0.0), 0.0);
        assert_eq!(smooth(1.0), 1.0);
        assert_eq!(smooth(0.5), 0.5);
        assert_eq!(smooth(2.0), 1.0);
    }

    fn solid_tile(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255]))
    }

    #[test]
    fn test_blit_clips_to_frame() {
        let mut frame = RgbImage::new(4, 4);
        blit(&mut frame, &solid_tile(3, 3), 2.0, -1.0, 1.0);

        assert_eq!(pixel(&frame, 2, 0), Color([255, 0, 0]));
        assert_eq!(pixel(&frame, 3, 1), Color([255, 0, 0]));
        assert_eq!(pixel(&frame, 2, 2), Color::BLACK);
        assert_eq!(pixel(&frame, 1, 0), Color::BLACK);
    }

    #[test]
    fn test_blit_partial_reveal() {
        let mut frame = RgbImage::new(4, 1);
        blit(&mut frame, &solid_tile(4, 1), 0.0, 0.0, 0.5);

        assert_eq!(pixel(&frame, 1, 0), Color([255, 0, 0]));
        assert_eq!(pixel(&frame, 2, 0), Color::BLACK);
    }

    #[test]
    fn test_blit_blends_alpha() {
        let mut frame = RgbImage::from_pixel(1, 1, Rgb([0, 0, 255]));
        let tile = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 0]));
        blit(&mut frame, &tile, 0.0, 0.0, 1.0);

        assert_eq!(pixel(&frame, 0, 0), Color([0, 0, 255]));
    }
}
