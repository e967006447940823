use crate::error::{Result, SubreelError};
use crate::scheduler::Pacing;
use crate::timeline::BlockStyle;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Production,
    Fourk,
}

impl Quality {
    /// Width, height and frame rate of the preset.
    pub fn dimensions(self) -> (u32, u32, u32) {
        match self {
            Quality::Low => (854, 480, 15),
            Quality::Medium => (1280, 720, 30),
            Quality::High => (1920, 1080, 60),
            Quality::Production => (2560, 1440, 60),
            Quality::Fourk => (3840, 2160, 60),
        }
    }
}

/// An opaque `#rrggbb` colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0]);
    pub const WHITE: Color = Color([255, 255, 255]);
}

impl FromStr for Color {
    type Err = SubreelError;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SubreelError::Config(format!("not a #rrggbb colour: '{}'", s)));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| SubreelError::Config(format!("bad colour '{}': {}", s, e)))
        };
        Ok(Color([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<String> for Color {
    type Error = SubreelError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(fmt, "#{:02x}{:02x}{:02x}", r, g, b)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub quality: Quality,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub crf: u32,
    pub preset: String,

    pub max_visible_height_fraction: f32,
    pub top_margin: f32,
    pub left_margin: f32,
    pub label_gap: f32,
    pub block_spacing: f32,
    pub line_spacing: f32,
    pub speaker_font_size: f32,
    pub text_font_size: f32,

    pub speaker_colors: BTreeMap<String, Color>,
    pub text_color: Color,
    pub background: Color,

    pub reveal_cap: f64,
    pub reveal_fraction: f64,
    pub shift_duration: f64,

    pub font_path: Option<PathBuf>,
    pub keep_segments: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let speaker_colors = [
            ("S1", [0x34, 0x98, 0xdb]),
            ("S2", [0x2e, 0xcc, 0x71]),
            ("S3", [0xf1, 0xc4, 0x0f]),
            ("S4", [0x9b, 0x59, 0xb6]),
        ]
        .into_iter()
        .map(|(speaker, rgb)| (speaker.to_string(), Color(rgb)))
        .collect();

        RenderConfig {
            quality: Quality::Medium,
            width: None,
            height: None,
            fps: None,
            crf: 23,
            preset: "medium".to_string(),
            max_visible_height_fraction: 0.8,
            top_margin: 90.0,
            left_margin: 45.0,
            label_gap: 27.0,
            block_spacing: 27.0,
            line_spacing: 9.0,
            speaker_font_size: 32.0,
            text_font_size: 28.0,
            speaker_colors,
            text_color: Color::WHITE,
            background: Color::BLACK,
            reveal_cap: 0.5,
            reveal_fraction: 0.3,
            shift_duration: 0.5,
            font_path: None,
            keep_segments: true,
        }
    }
}

impl RenderConfig {
    /// Reads a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: RenderConfig = toml::from_str(&data)
            .map_err(|e| SubreelError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (width, height, fps) = self.frame();
        if width == 0 || height == 0 || fps == 0 {
            return Err(SubreelError::Config(format!(
                "frame must be non-empty, got {}x{}@{}",
                width, height, fps
            )));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(SubreelError::Config(format!(
                "frame dimensions must be even for yuv420p, got {}x{}",
                width, height
            )));
        }
        if !(self.max_visible_height_fraction > 0.0 && self.max_visible_height_fraction <= 1.0) {
            return Err(SubreelError::Config(
                "max_visible_height_fraction must be in (0, 1]".to_string(),
            ));
        }
        if self.speaker_font_size <= 0.0 || self.text_font_size <= 0.0 {
            return Err(SubreelError::Config("font sizes must be positive".to_string()));
        }
        if self.reveal_cap < 0.0 || self.shift_duration < 0.0 {
            return Err(SubreelError::Config("durations must not be negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.reveal_fraction) {
            return Err(SubreelError::Config(
                "reveal_fraction must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Width, height and fps after applying explicit overrides to the preset.
    pub fn frame(&self) -> (u32, u32, u32) {
        let (width, height, fps) = self.quality.dimensions();
        (
            self.width.unwrap_or(width),
            self.height.unwrap_or(height),
            self.fps.unwrap_or(fps),
        )
    }

    pub fn max_visible_height(&self) -> f32 {
        let (_, height, _) = self.frame();
        height as f32 * self.max_visible_height_fraction
    }

    pub fn speaker_color(&self, speaker: &str) -> Color {
        self.speaker_colors
            .get(speaker)
            .copied()
            .unwrap_or(Color::WHITE)
    }

    pub fn block_style(&self) -> BlockStyle {
        let (width, _, _) = self.frame();
        BlockStyle {
            frame_width: width as f32,
            left_margin: self.left_margin,
            label_gap: self.label_gap,
            speaker_font_size: self.speaker_font_size,
            text_font_size: self.text_font_size,
            line_spacing: self.line_spacing,
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            reveal_cap: self.reveal_cap,
            reveal_fraction: self.reveal_fraction,
            shift_duration: self.shift_duration,
        }
    }
}
