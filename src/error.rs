use thiserror::Error;

pub type Result<T, E = BenchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("transport failure talking to {peer}: {detail}")]
    Transport { peer: String, detail: String },

    #[error("command `{command}` on {peer} exited with status {status}")]
    CommandFailed {
        peer: String,
        command: String,
        status: i32,
    },

    #[error("load generator on {peer} did not become ready: {detail}")]
    GeneratorUnready { peer: String, detail: String },

    #[error("generator protocol error: {0}")]
    Protocol(String),

    #[error("test run interrupted by user")]
    Interrupted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// I/O-class failures get more detailed logging than generic ones;
    /// control flow is the same for both.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            BenchError::Transport { .. }
                | BenchError::CommandFailed { .. }
                | BenchError::GeneratorUnready { .. }
                | BenchError::Io(_)
        )
    }
}
