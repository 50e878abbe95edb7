//! Process exit codes
//!
//! Scripts rely on these values; never renumber an existing variant.

/// Exit status of a `dyns` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Bad arguments or configuration
    UsageError = 2,
    /// Backend transport or SDK failure
    NetworkError = 3,
    NotFound = 5,
    /// Routing key rejected by a strict registry, or a refused removal
    RoutingError = 6,
    UnsupportedFeature = 7,
}

impl ExitCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::GeneralError),
            2 => Some(ExitCode::UsageError),
            3 => Some(ExitCode::NetworkError),
            5 => Some(ExitCode::NotFound),
            6 => Some(ExitCode::RoutingError),
            7 => Some(ExitCode::UnsupportedFeature),
            _ => None,
        }
    }

    pub fn from_error(error: &dynstore_core::Error) -> Self {
        Self::from_i32(error.exit_code()).unwrap_or(ExitCode::GeneralError)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}
