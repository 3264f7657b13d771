//! Error taxonomy shared by every eUICC operation

use std::fmt;

use thiserror::Error;

use crate::card::SpecVersion;
use crate::channel::ChannelError;
use crate::tlv::{TLVError, TLV};

/// The eUICC operation an element-reported code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Operation {
    Unknown = 0,
    GetProfile = 1,
    DisableProfile = 2,
    SwitchToProfile = 3,
    SetNickname = 4,
    DeleteProfile = 5,
    ResetMemory = 6,
    SetDefaultSmdpAddress = 7,
    AuthenticateServer = 8,
    PrepareDownload = 9,
    LoadBoundProfilePackage = 10,
    CancelSession = 11,
    ListNotifications = 12,
    RetrieveNotification = 13,
    RemoveNotificationFromList = 14,
}

impl Operation {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors returned by eUICC operations
#[derive(Debug, Error)]
pub enum EuiccError {
    #[error("Tag 0x{0:X} not found in response")]
    TagNotFound(u32),

    #[error("Invalid response data: {0}")]
    InvalidData(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Cannot determine the SGP.22 version of the eUICC")]
    CannotDetermineVersion,

    #[error("Unsupported SGP.22 version {0}")]
    UnsupportedVersion(SpecVersion),

    #[error("Malformed bound profile package: {0}")]
    MalformedPackage(String),

    #[error("{operation} failed with code {code}")]
    OperationFailed {
        operation: Operation,
        code: i32,
        detail: Option<TLV>,
    },

    #[error("Cannot send APDU: {0}")]
    CommandFailed(#[from] ChannelError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EuiccError {
    /// Element failure without extra detail
    pub fn operation_failed(operation: Operation, code: i32) -> Self {
        EuiccError::OperationFailed {
            operation,
            code,
            detail: None,
        }
    }

    /// The operation and element code of an [`EuiccError::OperationFailed`]
    pub fn operation_code(&self) -> Option<(Operation, i32)> {
        match self {
            EuiccError::OperationFailed {
                operation, code, ..
            } => Some((*operation, *code)),
            _ => None,
        }
    }
}

impl From<TLVError> for EuiccError {
    fn from(err: TLVError) -> Self {
        match err {
            TLVError::Empty => EuiccError::EmptyResponse,
            TLVError::TagNotFound(tag) => EuiccError::TagNotFound(tag),
            other => EuiccError::InvalidData(other.to_string()),
        }
    }
}

/// Result type for eUICC operations
pub type Result<T> = std::result::Result<T, EuiccError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tlv_error() {
        assert!(matches!(
            EuiccError::from(TLVError::Empty),
            EuiccError::EmptyResponse
        ));
        assert!(matches!(
            EuiccError::from(TLVError::TagNotFound(0x5A)),
            EuiccError::TagNotFound(0x5A)
        ));
        assert!(matches!(
            EuiccError::from(TLVError::InvalidLength),
            EuiccError::InvalidData(_)
        ));
    }

    #[test]
    fn test_operation_code() {
        let err = EuiccError::operation_failed(Operation::DeleteProfile, 3);
        assert_eq!(err.operation_code(), Some((Operation::DeleteProfile, 3)));
        assert_eq!(Operation::DeleteProfile.code(), 5);
        assert_eq!(err.to_string(), "DeleteProfile failed with code 3");
        assert_eq!(EuiccError::EmptyResponse.operation_code(), None);
    }
}
