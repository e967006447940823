use crate::cue::Cue;
use crate::layout::{LayoutEngine, TextMeasure};
use crate::timeline::{BlockId, BlockStyle, CaptionBlock, LayoutOp, Timeline};

use serde::Serialize;
use tracing::{debug, info};

/// Timing knobs for turning cues into operations. Durations in seconds.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub reveal_cap: f64,
    pub reveal_fraction: f64,
    pub shift_duration: f64,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            reveal_cap: 0.5,
            reveal_fraction: 0.3,
            shift_duration: 0.5,
        }
    }
}

/// One step of the render pass. Durations are virtual seconds of output
/// video, not wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum RenderOp {
    Shift {
        blocks: Vec<BlockId>,
        offset: f32,
        duration: f64,
    },
    Reveal {
        block: CaptionBlock,
        duration: f64,
    },
    Hold {
        duration: f64,
    },
    Evict {
        block: BlockId,
    },
}

impl RenderOp {
    pub fn duration(&self) -> f64 {
        match self {
            RenderOp::Shift { duration, .. }
            | RenderOp::Reveal { duration, .. }
            | RenderOp::Hold { duration } => *duration,
            RenderOp::Evict { .. } => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub ops: Vec<RenderOp>,
    /// Sum of cue durations.
    pub narrated_total: f64,
    /// Trailing hold that stretches the output to the audio length.
    pub final_pad: f64,
}

impl Schedule {
    pub fn total_duration(&self) -> f64 {
        self.ops.iter().map(RenderOp::duration).sum()
    }
}

pub struct Scheduler<M> {
    layout: LayoutEngine,
    measure: M,
    style: BlockStyle,
    pacing: Pacing,
    max_visible_height: f32,
    top_margin: f32,
    block_spacing: f32,
}

impl<M: TextMeasure> Scheduler<M> {
    pub fn new(
        layout: LayoutEngine,
        measure: M,
        style: BlockStyle,
        pacing: Pacing,
        max_visible_height: f32,
        top_margin: f32,
        block_spacing: f32,
    ) -> Self {
        Scheduler {
            layout,
            measure,
            style,
            pacing,
            max_visible_height,
            top_margin,
            block_spacing,
        }
    }

    pub fn schedule(&self, cues: &[Cue], audio_duration: f64) -> Schedule {
        let mut timeline = Timeline::new(self.max_visible_height, self.top_margin, self.block_spacing);
        let mut ops = Vec::new();

        for (id, cue) in cues.iter().enumerate() {
            let block = CaptionBlock::from_cue(id, cue, &self.layout, &self.measure, &self.style);
            let duration = cue.duration();
            let reveal = self
                .pacing
                .reveal_cap
                .min(duration * self.pacing.reveal_fraction);
            let mut remaining = duration - reveal;

            let mut evictions = Vec::new();
            for op in timeline.admit(block) {
                match op {
                    LayoutOp::Shift { blocks, offset } => {
                        // The scroll comes out of this cue's hold so the cue
                        // still occupies exactly its own duration.
                        let shift = self.pacing.shift_duration.min(remaining.max(0.0));
                        remaining -= shift;
                        ops.push(RenderOp::Shift {
                            blocks,
                            offset,
                            duration: shift,
                        });
                    }
                    LayoutOp::Reveal { block } => ops.push(RenderOp::Reveal {
                        block,
                        duration: reveal,
                    }),
                    LayoutOp::Evict { block } => evictions.push(RenderOp::Evict { block }),
                }
            }

            if remaining > 0.0 {
                ops.push(RenderOp::Hold {
                    duration: remaining,
                });
            }
            ops.extend(evictions);
            debug!(
                "Scheduled cue {} ({}) reveal {:.3}s hold {:.3}s, {} blocks tracked ({:.1}px)",
                cue.index,
                cue.speaker,
                reveal,
                remaining.max(0.0),
                timeline.visible().len(),
                timeline.cumulative_height()
            );
        }

        let narrated_total: f64 = cues.iter().map(Cue::duration).sum();
        let final_pad = (audio_duration - narrated_total).max(0.0);
        if final_pad > 0.0 {
            debug!("Adding final hold of {:.2}s", final_pad);
            ops.push(RenderOp::Hold {
                duration: final_pad,
            });
        }

        info!(
            "Scheduled {} operations for {} cues ({:.2}s narrated, {:.2}s pad)",
            ops.len(),
            cues.len(),
            narrated_total,
            final_pad
        );

        Schedule {
            ops,
            narrated_total,
            final_pad,
        }
    }
}
