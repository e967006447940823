use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SubreelError>;

#[derive(Debug, thiserror::Error)]
pub enum SubreelError {
    #[error("render backend failed: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} exited unsuccessfully: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("failed to load font '{}': {message}", path.display())]
    Font { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no partial output found in '{}'", dir.display())]
    NoPartialOutput { dir: PathBuf },

    #[error("concatenation failed for '{}': {message}", output.display())]
    ConcatenationFailed { output: PathBuf, message: String },

    #[error("rendering failed ({render}) and recovery failed too")]
    Unrecoverable {
        render: Box<SubreelError>,
        #[source]
        recovery: Box<SubreelError>,
    },
}

impl SubreelError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
