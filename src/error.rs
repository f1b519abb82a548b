//! Structured error taxonomy shared by every subsystem.
//!
//! Every public operation in this crate returns `Result<T, DdxError>` (or
//! `anyhow::Result<T>` at internal call sites, wrapped into a `DdxError` at
//! the module boundary). No subsystem panics on a reachable input.

use std::fmt;

/// Stable, symbolic error codes. Adding a variant is a closed change in
/// this file; callers match on `category()` for coarse handling and on the
/// code only when they need to special-case a specific failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // 2xxx — user input
    ErrUsage,
    ErrInvalidPath,

    // 3xxx — config / library
    ErrConfigInvalid,
    ErrConfigCycle,
    ErrLibraryMissing,
    ErrWorkflowDefinitionInvalid,

    // 4xxx — state
    ErrWorkflowNotActive,
    ErrPhaseGateFailed,
    ErrPhaseSkipNotSupported,
    ErrConcurrentMutation,
    ErrSyncBusy,
    ErrSyncConflict,

    // 5xxx — system
    ErrIo,
    ErrGit,
    ErrAuthRequired,
    ErrNetwork,

    // 6xxx — fatal / invariant violation
    ErrBackupCorrupt,
    ErrStateCorrupt,
    ErrCancelled,
}

impl ErrorCode {
    /// Numeric process exit code for the CLI adapter to return.
    pub fn exit_code(self) -> i32 {
        use ErrorCode::*;
        match self {
            ErrUsage | ErrInvalidPath => 2,
            ErrConfigInvalid | ErrConfigCycle | ErrWorkflowDefinitionInvalid => 3,
            ErrLibraryMissing => 4,
            ErrPhaseGateFailed | ErrPhaseSkipNotSupported => 5,
            ErrSyncConflict => 6,
            ErrAuthRequired => 7,
            ErrWorkflowNotActive
            | ErrConcurrentMutation
            | ErrSyncBusy
            | ErrIo
            | ErrGit
            | ErrNetwork
            | ErrBackupCorrupt
            | ErrStateCorrupt
            | ErrCancelled => 1,
        }
    }

    pub fn category(self) -> ErrorCategory {
        use ErrorCategory::*;
        use ErrorCode::*;
        match self {
            ErrUsage | ErrInvalidPath => UserInput,
            ErrConfigInvalid | ErrConfigCycle | ErrLibraryMissing | ErrWorkflowDefinitionInvalid => {
                ConfigLibrary
            }
            ErrWorkflowNotActive
            | ErrPhaseGateFailed
            | ErrPhaseSkipNotSupported
            | ErrConcurrentMutation
            | ErrSyncBusy
            | ErrSyncConflict => State,
            ErrIo | ErrGit | ErrAuthRequired | ErrNetwork => System,
            ErrBackupCorrupt | ErrStateCorrupt | ErrCancelled => Fatal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Coarse error family used to group related error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    UserInput,
    ConfigLibrary,
    State,
    System,
    Fatal,
}

/// The one error type that crosses every module boundary in this crate.
#[derive(Debug, thiserror::Error)]
pub struct DdxError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
    #[source]
    pub cause: Option<anyhow::Error>,
}

impl DdxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: None,
            cause: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}

impl fmt::Display for DdxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(s) = &self.suggestion {
            write!(f, " (suggestion: {})", s)?;
        }
        Ok(())
    }
}

/// Construct a [`DdxError`] with a format string, analogous to `anyhow!`.
macro_rules! ddx_err {
    ($code:expr, $($arg:tt)*) => {
        $crate::error::DdxError::new($code, format!($($arg)*))
    };
}
pub(crate) use ddx_err;

pub type Result<T> = std::result::Result<T, DdxError>;
