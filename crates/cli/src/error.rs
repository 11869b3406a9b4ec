//! Error types for bundlectl

use thiserror::Error;
use updatekit_errors::{ErrorKind, UpdateError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Update(UpdateError),
}

impl CliError {
    /// Process exit code: 2 for a rejected bundle, 3 for bad input, 1
    /// otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::VerificationFailed(_) => 2,
            CliError::InvalidInput(_) => 3,
            _ => 1,
        }
    }

    /// Classify an error from the accessor's verification chain.
    pub fn from_verification(error: UpdateError) -> Self {
        match error.kind() {
            ErrorKind::Unauthenticated | ErrorKind::OutOfRange => {
                CliError::VerificationFailed(error.to_string())
            }
            ErrorKind::DataLoss | ErrorKind::InvalidArgument => {
                CliError::InvalidInput(error.to_string())
            }
            _ => CliError::Update(error),
        }
    }
}

impl From<UpdateError> for CliError {
    fn from(error: UpdateError) -> Self {
        match error.kind() {
            ErrorKind::InvalidArgument | ErrorKind::DataLoss => {
                CliError::InvalidInput(error.to_string())
            }
            _ => CliError::Update(error),
        }
    }
}

impl From<updatekit_crypto::CryptoError> for CliError {
    fn from(error: updatekit_crypto::CryptoError) -> Self {
        CliError::InvalidInput(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::VerificationFailed(String::new()).exit_code(), 2);
        assert_eq!(CliError::InvalidInput(String::new()).exit_code(), 3);
        assert_eq!(CliError::Update(UpdateError::internal("x")).exit_code(), 1);
    }

    #[test]
    fn verification_errors_are_classified() {
        let rejected = CliError::from_verification(UpdateError::unauthenticated("bad sig"));
        assert_eq!(rejected.exit_code(), 2);
        let garbage = CliError::from_verification(UpdateError::data_loss("truncated"));
        assert_eq!(garbage.exit_code(), 3);
    }
}
