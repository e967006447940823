use crate::cue::Cue;
use crate::layout::{LayoutEngine, TextMeasure};

use serde::Serialize;
use tracing::debug;

pub type BlockId = usize;

/// Fixed geometry shared by every block of one render pass.
#[derive(Debug, Clone)]
pub struct BlockStyle {
    pub frame_width: f32,
    pub left_margin: f32,
    pub label_gap: f32,
    pub speaker_font_size: f32,
    pub text_font_size: f32,
    pub line_spacing: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionBlock {
    pub id: BlockId,
    pub speaker: String,
    pub label: String,
    pub lines: Vec<String>,
    pub label_font_size: f32,
    pub text_font_size: f32,
    pub label_height: f32,
    pub line_height: f32,
    pub line_spacing: f32,
    /// Horizontal distance from `left` to the first text column.
    pub text_offset: f32,
    pub left: f32,
    /// Frame pixels, y grows downwards.
    pub top: f32,
}

impl CaptionBlock {
    /// Lays out `cue` as a label followed by wrapped text. The block is not
    /// positioned vertically yet; the timeline does that on admission.
    pub fn from_cue<M: TextMeasure + ?Sized>(
        id: BlockId,
        cue: &Cue,
        layout: &LayoutEngine,
        measure: &M,
        style: &BlockStyle,
    ) -> Self {
        let label = format!("{}:", cue.speaker);
        let label_width = measure.width(&label, style.speaker_font_size);
        let text_offset = label_width + style.label_gap;
        let max_width = style.frame_width - 2.0 * style.left_margin - text_offset;
        let lines = layout.wrap(&cue.text, max_width, style.text_font_size, measure);

        CaptionBlock {
            id,
            speaker: cue.speaker.clone(),
            label,
            lines,
            label_font_size: style.speaker_font_size,
            text_font_size: style.text_font_size,
            label_height: measure.line_height(style.speaker_font_size),
            line_height: measure.line_height(style.text_font_size),
            line_spacing: style.line_spacing,
            text_offset,
            left: style.left_margin,
            top: 0.0,
        }
    }

    pub fn height(&self) -> f32 {
        let n = self.lines.len().max(1) as f32;
        let text = n * self.line_height + (n - 1.0) * self.line_spacing;
        text.max(self.label_height)
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutOp {
    /// Move `blocks` up by `offset` pixels, all at once.
    Shift { blocks: Vec<BlockId>, offset: f32 },
    Reveal { block: CaptionBlock },
    Evict { block: BlockId },
}

pub struct Timeline {
    visible: Vec<CaptionBlock>,
    cumulative_height: f32,
    max_visible_height: f32,
    top_margin: f32,
    block_spacing: f32,
}

impl Timeline {
    pub fn new(max_visible_height: f32, top_margin: f32, block_spacing: f32) -> Self {
        Timeline {
            visible: Vec::new(),
            cumulative_height: 0.0,
            max_visible_height,
            top_margin,
            block_spacing,
        }
    }

    pub fn visible(&self) -> &[CaptionBlock] {
        &self.visible
    }

    pub fn cumulative_height(&self) -> f32 {
        self.cumulative_height
    }

    pub fn admit(&mut self, mut block: CaptionBlock) -> Vec<LayoutOp> {
        let mut ops = Vec::new();

        block.top = match self.visible.last() {
            Some(last) => last.bottom() + self.block_spacing,
            None => self.top_margin,
        };
        self.visible.push(block);
        self.recompute_height();

        if self.cumulative_height > self.max_visible_height && self.visible.len() > 1 {
            let excess = self.cumulative_height - self.max_visible_height;
            let (new_block, older) = match self.visible.split_last_mut() {
                Some(split) => split,
                None => unreachable!("a block was just pushed"),
            };
            for b in older.iter_mut() {
                b.top -= excess;
            }
            new_block.top -= excess;
            debug!("Scrolling {} blocks up by {:.1}px", older.len(), excess);
            ops.push(LayoutOp::Shift {
                blocks: older.iter().map(|b| b.id).collect(),
                offset: excess,
            });
        }

        if let Some(revealed) = self.visible.last() {
            ops.push(LayoutOp::Reveal {
                block: revealed.clone(),
            });
        }

        // Only blocks that have left the frame entirely are dropped.
        let before = self.visible.len();
        let mut evicted = Vec::new();
        self.visible.retain(|b| {
            let gone = b.bottom() < 0.0;
            if gone {
                evicted.push(b.id);
            }
            !gone
        });
        if self.visible.len() != before {
            self.recompute_height();
            debug!("Evicted {} blocks", before - self.visible.len());
        }
        ops.extend(evicted.into_iter().map(|block| LayoutOp::Evict { block }));

        ops
    }

    fn recompute_height(&mut self) {
        self.cumulative_height = self
            .visible
            .iter()
            .map(|b| b.height() + self.block_spacing)
            .sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FixedAdvance;

    fn block(id: BlockId, lines: usize) -> CaptionBlock {
        CaptionBlock {
            id,
            speaker: "S1".to_string(),
            label: "S1:".to_string(),
            lines: vec!["x".to_string(); lines],
            label_font_size: 10.0,
            text_font_size: 10.0,
            label_height: 10.0,
            line_height: 10.0,
            line_spacing: 0.0,
            text_offset: 20.0,
            left: 5.0,
            top: 0.0,
        }
    }

    fn shifts(ops: &[LayoutOp]) -> Vec<(Vec<BlockId>, f32)> {
        ops.iter()
            .filter_map(|op| match op {
                LayoutOp::Shift { blocks, offset } => Some((blocks.clone(), *offset)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_block_height_follows_lines() {
        let mut b = block(0, 3);
        b.line_spacing = 2.0;

        assert_eq!(b.height(), 34.0);

        b.lines.truncate(1);
        assert_eq!(b.height(), 10.0);
    }

    #[test]
    fn test_label_sets_minimum_height() {
        let mut b = block(0, 1);
        b.label_height = 14.0;

        assert_eq!(b.height(), 14.0);
    }

    #[test]
    fn test_first_block_sits_at_top_margin() {
        let mut timeline = Timeline::new(100.0, 7.0, 5.0);
        let ops = timeline.admit(block(0, 1));

        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], LayoutOp::Reveal { block } if block.top == 7.0));
        assert_eq!(timeline.cumulative_height(), 15.0);
    }

    #[test]
    fn test_blocks_stack_below_each_other() {
        let mut timeline = Timeline::new(1000.0, 7.0, 5.0);
        timeline.admit(block(0, 2));
        timeline.admit(block(1, 1));

        let visible = timeline.visible();
        assert_eq!(visible[1].top, visible[0].bottom() + 5.0);
        assert_eq!(visible[1].left, visible[0].left);
        assert_eq!(timeline.cumulative_height(), 25.0 + 15.0);
    }

    #[test]
    fn test_overflow_shifts_older_blocks_by_excess() {
        let mut timeline = Timeline::new(40.0, 20.0, 5.0);
        timeline.admit(block(0, 1));
        timeline.admit(block(1, 1));
        let ops = timeline.admit(block(2, 2));

        // 15 + 15 + 25 = 55 against a budget of 40.
        assert_eq!(shifts(&ops), vec![(vec![0, 1], 15.0)]);
        assert!(matches!(&ops[0], LayoutOp::Shift { .. }));
        assert!(matches!(&ops[1], LayoutOp::Reveal { block } if block.id == 2));
        assert_eq!(ops.len(), 2);

        let tops: Vec<_> = timeline.visible().iter().map(|b| b.top).collect();
        assert_eq!(tops, vec![5.0, 20.0, 35.0]);
    }

    #[test]
    fn test_exactly_full_budget_does_not_shift() {
        let mut timeline = Timeline::new(30.0, 20.0, 5.0);
        timeline.admit(block(0, 1));
        let ops = timeline.admit(block(1, 1));

        // 15 + 15 fills the budget of 30 without exceeding it.
        assert_eq!(timeline.cumulative_height(), 30.0);
        assert!(shifts(&ops).is_empty());
        assert_eq!(ops.len(), 1);
        let tops: Vec<_> = timeline.visible().iter().map(|b| b.top).collect();
        assert_eq!(tops, vec![20.0, 35.0]);
    }

    #[test]
    fn test_new_block_is_revealed_at_shifted_position() {
        let mut timeline = Timeline::new(20.0, 0.0, 0.0);
        timeline.admit(block(0, 2));
        let ops = timeline.admit(block(1, 1));

        match &ops[1] {
            LayoutOp::Reveal { block } => assert_eq!(block.top, 10.0),
            other => panic!("expected reveal, got {:?}", other),
        }
    }

    #[test]
    fn test_single_oversized_block_never_shifts() {
        let mut timeline = Timeline::new(20.0, 0.0, 0.0);
        let ops = timeline.admit(block(0, 5));

        assert!(shifts(&ops).is_empty());
        assert_eq!(timeline.visible()[0].top, 0.0);
    }

    #[test]
    fn test_blocks_above_frame_are_evicted() {
        let mut timeline = Timeline::new(20.0, 0.0, 0.0);
        timeline.admit(block(0, 1));
        timeline.admit(block(1, 1));
        let ops = timeline.admit(block(2, 1));

        // 30 against 20: everything moves up by 10, block 0 ends at y = -10..0
        // and block 1 at 0..10; block 0's bottom edge is exactly at the top,
        // so it stays.
        assert!(ops.iter().all(|op| !matches!(op, LayoutOp::Evict { .. })));

        let ops = timeline.admit(block(3, 1));
        // 40 against 20: shift by 20, blocks 0 and 1 end up fully above.
        assert!(ops.contains(&LayoutOp::Evict { block: 0 }));
        assert!(ops.contains(&LayoutOp::Evict { block: 1 }));
        assert!(matches!(ops.last(), Some(LayoutOp::Evict { .. })));
        assert_eq!(timeline.visible()[0].id, 2);
        assert_eq!(timeline.cumulative_height(), 20.0);
    }

    #[test]
    fn test_cumulative_height_matches_visible_blocks() {
        let mut timeline = Timeline::new(50.0, 3.0, 2.0);
        for id in 0..20 {
            timeline.admit(block(id, 1 + id % 3));
            let expected: f32 = timeline.visible().iter().map(|b| b.height() + 2.0).sum();
            assert_eq!(timeline.cumulative_height(), expected);
            // Oldest first.
            let ids: Vec<_> = timeline.visible().iter().map(|b| b.id).collect();
            let mut sorted = ids.clone();
            sorted.sort();
            assert_eq!(ids, sorted);
        }
    }

    #[test]
    fn test_from_cue_wraps_within_available_width() {
        let cue = Cue {
            index: 1,
            start: 0.0,
            end: 1.0,
            speaker: "S2".to_string(),
            text: "aaaa bbbb cccc".to_string(),
        };
        let style = BlockStyle {
            frame_width: 30.0,
            left_margin: 2.0,
            label_gap: 1.0,
            speaker_font_size: 1.0,
            text_font_size: 1.0,
            line_spacing: 0.5,
        };
        let measure = FixedAdvance { em_fraction: 1.0 };
        let layout = LayoutEngine::new().unwrap();
        let b = CaptionBlock::from_cue(4, &cue, &layout, &measure, &style);

        // "S2:" is 3 wide, so text gets 30 - 4 - 4 = 22.
        assert_eq!(b.label, "S2:");
        assert_eq!(b.text_offset, 4.0);
        assert_eq!(b.lines, vec!["aaaa bbbb cccc"]);
        assert_eq!(b.left, 2.0);

        let narrow = BlockStyle {
            frame_width: 20.0,
            ..style
        };
        let b = CaptionBlock::from_cue(4, &cue, &layout, &measure, &narrow);
        assert_eq!(b.lines, vec!["aaaa bbbb", "cccc"]);
        assert_eq!(b.height(), 1.2 * 2.0 + 0.5);
    }
}
