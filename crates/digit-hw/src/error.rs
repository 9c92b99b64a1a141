use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigitError {
    #[error("no DIGIT with serial {0}")]
    NotFound(String),
    #[error("device busy: {path}: {reason}")]
    DeviceBusy { path: String, reason: String },
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::session::ConnectionState,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("bad sensor profile: {0}")]
    Profile(String),
    #[error(transparent)]
    Frame(#[from] crate::frame::FrameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DigitError>;
