use crate::error::{Result, SubreelError};

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

pub const MANIFEST_NAME: &str = "concat.txt";

/// Ordered list of segment files, in the format understood by ffmpeg's
/// concat demuxer.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub path: PathBuf,
    pub entries: Vec<PathBuf>,
}

impl Manifest {
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|p| format!("file '{}'\n", escape(&p.to_string_lossy())))
            .collect()
    }

    pub fn write(&self) -> Result<()> {
        std::fs::write(&self.path, self.render())?;
        Ok(())
    }
}

// Single quotes cannot be escaped inside a quoted string, so close the
// quote, emit an escaped quote, and reopen.
fn escape(path: &str) -> String {
    path.replace('\'', r"'\''")
}

/// Lossless, stream-copy concatenation of the files listed in a manifest.
pub trait ConcatenationTool {
    fn concatenate(&self, manifest: &Manifest, output: &Path) -> Result<()>;
}

impl<T: ConcatenationTool + ?Sized> ConcatenationTool for &T {
    fn concatenate(&self, manifest: &Manifest, output: &Path) -> Result<()> {
        (**self).concatenate(manifest, output)
    }
}

/// Lists segment files in `dir` with the given extension, in name order.
pub fn discover_segments(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == extension) {
            segments.push(std::fs::canonicalize(&path)?);
        }
    }
    segments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(segments)
}

/// Writes a manifest for `segments` next to them and concatenates them
/// into `output`.
pub fn concatenate_segments<C: ConcatenationTool + ?Sized>(
    tool: &C,
    segments: Vec<PathBuf>,
    manifest_dir: &Path,
    output: &Path,
) -> Result<PathBuf> {
    let manifest = Manifest {
        path: manifest_dir.join(MANIFEST_NAME),
        entries: segments,
    };
    manifest.write()?;
    debug!(
        "Concatenating {} segments via {}",
        manifest.entries.len(),
        manifest.path.display()
    );

    let failed = |message: String| SubreelError::ConcatenationFailed {
        output: output.to_path_buf(),
        message,
    };
    tool.concatenate(&manifest, output)
        .map_err(|e| failed(e.to_string()))?;
    if !output.exists() {
        return Err(failed("tool reported success but wrote no file".to_string()));
    }
    Ok(output.to_path_buf())
}

pub struct RecoveryAssembler<C> {
    tool: C,
    extension: String,
}

impl<C: ConcatenationTool> RecoveryAssembler<C> {
    pub fn new(tool: C) -> Self {
        RecoveryAssembler {
            tool,
            extension: "mp4".to_string(),
        }
    }

    /// Single attempt; missing segments are never re-rendered.
    pub fn recover(&self, segment_dir: &Path, output: &Path) -> Result<PathBuf> {
        let segments = discover_segments(segment_dir, &self.extension)?;
        if segments.is_empty() {
            error!("No partial video files found in {}", segment_dir.display());
            return Err(SubreelError::NoPartialOutput {
                dir: segment_dir.to_path_buf(),
            });
        }

        info!(
            "Found {} partial video files, combining them into {}",
            segments.len(),
            output.display()
        );
        match concatenate_segments(&self.tool, segments, segment_dir, output) {
            Ok(path) => {
                info!("Recovered partial render into {}", path.display());
                Ok(path)
            }
            Err(err) => {
                error!("Failed to combine partial video files: {}", err);
                Err(err)
            }
        }
    }
}
