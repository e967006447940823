use regex::Regex;

/// Anything that can tell how wide a string renders at a given pixel size.
pub trait TextMeasure {
    fn width(&self, text: &str, font_size: f32) -> f32;

    /// Distance between the baselines of two consecutive lines.
    fn line_height(&self, font_size: f32) -> f32 {
        font_size * 1.2
    }
}

impl<M: TextMeasure + ?Sized> TextMeasure for &M {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        (**self).width(text, font_size)
    }

    fn line_height(&self, font_size: f32) -> f32 {
        (**self).line_height(font_size)
    }
}

/// Every character advances by a fixed fraction of the font size.
/// Used by `plan` when no font is available, and by tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvance {
    pub em_fraction: f32,
}

impl Default for FixedAdvance {
    fn default() -> Self {
        Self { em_fraction: 0.6 }
    }
}

impl TextMeasure for FixedAdvance {
    fn width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().count() as f32 * font_size * self.em_fraction
    }
}

const CJK_PUNCTUATION: &str = "，。！？；：、（）【】《》“”‘’…—";

pub struct Tokenizer {
    separators: Regex,
    mixed_runs: Regex,
}

impl Tokenizer {
    pub fn new() -> Result<Self, regex::Error> {
        let separators = Regex::new(&format!(r"\s+|[{}]", CJK_PUNCTUATION))?;
        let mixed_runs =
            Regex::new(r"[\x{4e00}-\x{9fff}]+|[a-zA-Z]+|\d+|[^\s\x{4e00}-\x{9fff}\w]|\S")?;
        Ok(Self {
            separators,
            mixed_runs,
        })
    }

    pub fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut tokens = Vec::new();
        let mut last = 0;
        for sep in self.separators.find_iter(text) {
            self.push_segment(&text[last..sep.start()], &mut tokens);
            let sep_text = sep.as_str();
            if !sep_text.trim().is_empty() {
                tokens.push(sep_text);
            }
            last = sep.end();
        }
        self.push_segment(&text[last..], &mut tokens);
        tokens
    }

    fn push_segment<'a>(&self, segment: &'a str, tokens: &mut Vec<&'a str>) {
        let segment = segment.trim();
        if segment.is_empty() {
            return;
        }
        if segment.chars().any(is_cjk_ideograph) {
            tokens.extend(self.mixed_runs.find_iter(segment).map(|m| m.as_str()));
        } else {
            tokens.extend(segment.split_whitespace());
        }
    }
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

pub struct LayoutEngine {
    tokenizer: Tokenizer,
}

impl LayoutEngine {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            tokenizer: Tokenizer::new()?,
        })
    }

    /// Greedy line packing. A token wider than `max_width` on its own gets a
    /// line to itself; tokens are never split.
    pub fn wrap<M: TextMeasure + ?Sized>(
        &self,
        text: &str,
        max_width: f32,
        font_size: f32,
        measure: &M,
    ) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for token in self.tokenizer.tokenize(text) {
            current.push(token);
            let candidate = current.join(" ");
            if measure.width(&candidate, font_size) <= max_width {
                continue;
            }
            current.pop();
            if current.is_empty() {
                lines.push(token.to_string());
            } else {
                lines.push(current.join(" "));
                current.clear();
                current.push(token);
            }
        }

        if !current.is_empty() {
            lines.push(current.join(" "));
        }
        if lines.is_empty() {
            lines.push(String::new());
        }
        lines
    }
}
