/// Error types shared across the application
///
/// Capture errors are part of the backend wire contract and travel inside
/// tagged results; everything else is local to this process.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reading a detector correction file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum CorrectionError {
    #[error("detector library error: {0}")]
    SLError(String),
    #[error("correction file not found: {0}")]
    FileNotFound(String),
}

/// Closed set of errors a capture-related command can report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum CaptureError {
    #[error("detector disconnected")]
    DetectorDisconnected,
    #[error("detector in use")]
    DetectorInUse,
    #[error("correction file error: {0}")]
    File2Error(CorrectionError),
    #[error("detector library error: {0}")]
    SLError(String),
    #[error("unknown capture error")]
    Unknown,
}

/// Errors raised while talking to the backend
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("could not connect to backend at {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("backend connection closed")]
    Disconnected,
    #[error("backend did not answer within {0} ms")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("backend rejected command: {0}")]
    Rejected(String),
    #[error("unexpected reply for {command}: {reason}")]
    Decode { command: &'static str, reason: String },
    #[error("command failed")]
    CommandFailed,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => BridgeError::Disconnected,
            _ => BridgeError::Io(e.to_string()),
        }
    }
}

/// Errors parsing a width/height prefixed pixel buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame buffer too short for header: {0} bytes")]
    MissingHeader(usize),
    #[error("frame payload is {actual} bytes, expected {expected} for {width}x{height}")]
    PayloadSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("frame dimensions {width}x{height} overflow")]
    TooLarge { width: u32, height: u32 },
}

/// Errors loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid backend override {0:?}, expected \"sim\" or \"tcp://host:port\"")]
    BackendOverride(String),
}

/// Errors parsing a colour string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColourError {
    #[error("invalid colour format: {0:?}")]
    Format(String),
    #[error("invalid {channel} value in {input:?}")]
    Channel { channel: &'static str, input: String },
}

/// Validation failures in the capture settings form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("select at least one exposure time")]
    NoExposureTimes,
    #[error("{field} must be a positive whole number")]
    NotPositive { field: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_wire_format() {
        assert_eq!(
            serde_json::to_string(&CaptureError::DetectorInUse).unwrap(),
            "\"DetectorInUse\""
        );
        let err: CaptureError =
            serde_json::from_str(r#"{"File2Error":{"FileNotFound":"dark_100.tif"}}"#).unwrap();
        assert_eq!(
            err,
            CaptureError::File2Error(CorrectionError::FileNotFound("dark_100.tif".into()))
        );
        let err: CaptureError = serde_json::from_str(r#"{"SLError":"timeout"}"#).unwrap();
        assert_eq!(err, CaptureError::SLError("timeout".into()));
    }

    #[test]
    fn io_eof_maps_to_disconnected() {
        let e = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(BridgeError::from(e), BridgeError::Disconnected));
    }
}
