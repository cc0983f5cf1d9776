/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] simlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] simlink_frame::FrameError),

    /// No stream epoch is active; the supervisor is (re)connecting.
    #[error("not connected to the simulator")]
    NotConnected,

    /// The session is shutting down.
    #[error("session is shutting down")]
    ShuttingDown,

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;
