use serde::Serialize;

pub const DEFAULT_SPEAKER: &str = "S1";

/// One timed caption unit. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cue {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    pub text: String,
}

impl Cue {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}
