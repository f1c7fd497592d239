use thiserror::Error;

use crate::engine::AssetSlot;

/// Failures raised while turning raw asset bytes into sample data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Header or chunk layout could not be parsed.
    #[error("malformed container: {0}")]
    MalformedContainer(String),
    /// The container was recognized but its sample encoding is not supported.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Declared coefficient count exceeds the safety bound.
    #[error("asset too large: {declared} coefficients declared, limit is {limit}")]
    AssetTooLarge { declared: u64, limit: u64 },
    /// Declared payload is longer than the bytes actually present.
    ///
    /// Decoders truncate and carry on; this variant is surfaced as a warning.
    #[error("buffer overrun: {declared} bytes declared, {available} available")]
    BufferOverrun { declared: u64, available: u64 },
}

/// Failures on the control path when publishing an asset to the render path.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A newer request for the same slot was issued before this one finished.
    #[error("{slot} load {generation} superseded by a newer request")]
    Superseded { slot: AssetSlot, generation: u64 },
    /// The render path has not drained its command queue.
    #[error("engine command queue is full")]
    QueueFull,
}

/// Failures parsing a settings snapshot supplied by the host.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_render_their_fields() {
        let err = DecodeError::AssetTooLarge {
            declared: 3_000_000,
            limit: 2_000_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("3000000"), "message should carry declared count: {msg}");
        assert!(msg.contains("2000000"), "message should carry limit: {msg}");
    }

    #[test]
    fn load_error_wraps_decode_error_transparently() {
        let err: LoadError = DecodeError::MalformedContainer("no data chunk".into()).into();
        assert_eq!(err.to_string(), "malformed container: no data chunk");
    }
}
