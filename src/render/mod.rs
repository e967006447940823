pub mod font;
pub mod frames;

use crate::error::{Result, SubreelError};
use crate::recovery::{ConcatenationTool, RecoveryAssembler};
use crate::scheduler::{RenderOp, Schedule};

use std::path::{Path, PathBuf};

use tracing::{error, info};

/// Something that turns render operations into video.
pub trait RenderBackend {
    fn apply(&mut self, op: &RenderOp) -> Result<()>;

    /// Completes the pass and returns the rendered file.
    fn finish(&mut self) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    pub path: PathBuf,
    /// The video was stitched together from the segments of a failed pass.
    pub recovered: bool,
}

/// Applies every operation in order; the first failure stops the pass.
pub fn execute<B: RenderBackend + ?Sized>(schedule: &Schedule, backend: &mut B) -> Result<PathBuf> {
    for (i, op) in schedule.ops.iter().enumerate() {
        backend.apply(op).map_err(|e| {
            SubreelError::backend(format!("operation {} of {}: {}", i + 1, schedule.ops.len(), e))
        })?;
    }
    backend.finish()
}

/// Runs the schedule and, if the backend gives up halfway, falls back to
/// whatever segments it left in `segment_dir`.
pub fn render_pass<B, C>(
    schedule: &Schedule,
    backend: &mut B,
    recovery: &RecoveryAssembler<C>,
    segment_dir: &Path,
    output: &Path,
) -> Result<RenderOutcome>
where
    B: RenderBackend + ?Sized,
    C: ConcatenationTool,
{
    info!("Rendering {} operations", schedule.ops.len());
    let render_err = match execute(schedule, backend) {
        Ok(path) => {
            info!("Successfully generated video: {}", path.display());
            return Ok(RenderOutcome {
                path,
                recovered: false,
            });
        }
        Err(err) => err,
    };

    error!("Rendering failed: {}", render_err);
    info!("Attempting to recover using partial video files");
    match recovery.recover(segment_dir, output) {
        Ok(path) => Ok(RenderOutcome {
            path,
            recovered: true,
        }),
        Err(recovery_err) => Err(SubreelError::Unrecoverable {
            render: Box::new(render_err),
            recovery: Box::new(recovery_err),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::tests::FakeConcat;

    /// Writes one fake segment per timed operation; can be told to fail.
    struct RecordingBackend {
        dir: PathBuf,
        output: PathBuf,
        applied: Vec<RenderOp>,
        fail_at: Option<usize>,
    }

    impl RecordingBackend {
        fn new(dir: &Path, fail_at: Option<usize>) -> Self {
            RecordingBackend {
                dir: dir.to_path_buf(),
                output: dir.join("rendered.bin"),
                applied: Vec::new(),
                fail_at,
            }
        }
    }

    impl RenderBackend for RecordingBackend {
        fn apply(&mut self, op: &RenderOp) -> Result<()> {
            if self.fail_at == Some(self.applied.len()) {
                return Err(SubreelError::backend("boom"));
            }
            let segment = self.dir.join(format!("{:05}.mp4", self.applied.len()));
            std::fs::write(segment, format!("{:?};", op.duration()))?;
            self.applied.push(op.clone());
            Ok(())
        }

        fn finish(&mut self) -> Result<PathBuf> {
            std::fs::write(&self.output, "done")?;
            Ok(self.output.clone())
        }
    }

    fn schedule(holds: &[f64]) -> Schedule {
        Schedule {
            ops: holds
                .iter()
                .map(|&duration| RenderOp::Hold { duration })
                .collect(),
            narrated_total: holds.iter().sum(),
            final_pad: 0.0,
        }
    }

    #[test]
    fn test_successful_pass_skips_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::new(dir.path(), None);
        let tool = FakeConcat::default();
        let recovery = RecoveryAssembler::new(&tool);

        let outcome = render_pass(
            &schedule(&[1.0, 2.0]),
            &mut backend,
            &recovery,
            dir.path(),
            &dir.path().join("out.bin"),
        )
        .unwrap();

        assert!(!outcome.recovered);
        assert_eq!(outcome.path, dir.path().join("rendered.bin"));
        assert_eq!(backend.applied.len(), 2);
        assert!(tool.manifests.borrow().is_empty());
    }

    #[test]
    fn test_failure_aborts_and_recovers_partial_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::new(dir.path(), Some(2));
        let tool = FakeConcat::default();
        let recovery = RecoveryAssembler::new(&tool);
        let output = dir.path().join("out.bin");

        let outcome = render_pass(
            &schedule(&[1.0, 2.0, 3.0, 4.0]),
            &mut backend,
            &recovery,
            dir.path(),
            &output,
        )
        .unwrap();

        assert!(outcome.recovered);
        assert_eq!(outcome.path, output);
        assert_eq!(backend.applied.len(), 2);
        assert_eq!(tool.manifests.borrow()[0].entries.len(), 2);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "1.0;2.0;");
    }

    #[test]
    fn test_failure_on_first_operation_is_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::new(dir.path(), Some(0));
        let tool = FakeConcat::default();
        let recovery = RecoveryAssembler::new(&tool);

        let err = render_pass(
            &schedule(&[1.0]),
            &mut backend,
            &recovery,
            dir.path(),
            &dir.path().join("out.bin"),
        )
        .unwrap_err();

        match err {
            SubreelError::Unrecoverable { render, recovery } => {
                assert!(matches!(*render, SubreelError::Backend(_)));
                assert!(matches!(*recovery, SubreelError::NoPartialOutput { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_failed_concatenation_is_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = RecordingBackend::new(dir.path(), Some(1));
        let tool = FakeConcat {
            fail: true,
            ..FakeConcat::default()
        };
        let recovery = RecoveryAssembler::new(&tool);

        let err = render_pass(
            &schedule(&[1.0, 1.0]),
            &mut backend,
            &recovery,
            dir.path(),
            &dir.path().join("out.bin"),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SubreelError::Unrecoverable { recovery, .. }
                if matches!(*recovery, SubreelError::ConcatenationFailed { .. })
        ));
    }
}
