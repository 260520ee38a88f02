//! Custom error types for the crate.
//!
//! `LpmError` is the single error enum shared by the transport, protocol,
//! and calibration layers. Fatality is a property of the caller, not the
//! variant: `MeterStart` aborts a whole calibration run, `Transport` aborts
//! the current command and is never retried, while `ProtocolTimeout` and
//! `Measurement` are retried by the feedback loop and only become permanent
//! once its retry budget is spent.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LpmResult<T> = std::result::Result<T, LpmError>;

/// Errors produced by the LED driver protocol and the calibration loops.
#[derive(Error, Debug)]
pub enum LpmError {
    /// Byte-level read/write failure on the serial link.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The device kept producing lines without ever sending the response
    /// sentinel within the configured read-attempt budget.
    #[error("no response sentinel after {attempts} line reads")]
    ProtocolTimeout {
        /// Read attempts consumed before giving up.
        attempts: u32,
    },

    /// The spectrometer refused to enter remote mode. Fatal for the run.
    #[error("spectrometer could not start remote mode")]
    MeterStart,

    /// Transient or permanent failure while taking a spectral measurement.
    #[error("measurement failed: {0}")]
    Measurement(String),

    /// Semantically invalid configuration (valid YAML, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed configuration file.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failure writing a report file.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A one-shot device command that is not part of the vocabulary.
    #[error("unknown device command: '{0}'")]
    UnknownCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_wrap_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: LpmError = io.into();
        match err {
            LpmError::Transport(inner) => {
                assert_eq!(inner.kind(), std::io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn protocol_timeout_reports_budget() {
        let err = LpmError::ProtocolTimeout { attempts: 64 };
        assert!(err.to_string().contains("64"));
    }
}
