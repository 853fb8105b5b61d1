//! Result codes shared by the arena and the broker.

use core::fmt;

/// Numeric result vocabulary for the broker's event-dispatch surface.
///
/// Values match a C-compatible vocabulary exactly so that callers bridging
/// to a C ABI can cast `ResultCode as i8`.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    Unknown = -1,
    SizeMismatch = -2,
    Unsupported = -3,
    NoCallback = -4,
    NoCache = -5,
    NoCommitted = -6,
    NotFound = -7,
    ParamError = -8,
}

impl ResultCode {
    /// True for `ResultCode::Ok`.
    #[inline]
    pub fn is_ok(self) -> bool {
        matches!(self, ResultCode::Ok)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResultCode::Ok => "ok",
            ResultCode::Unknown => "unknown account",
            ResultCode::SizeMismatch => "size mismatch",
            ResultCode::Unsupported => "unsupported request",
            ResultCode::NoCallback => "no callback registered",
            ResultCode::NoCache => "no cache configured",
            ResultCode::NoCommitted => "nothing committed",
            ResultCode::NotFound => "not found",
            ResultCode::ParamError => "parameter error",
        };
        f.write_str(text)
    }
}
