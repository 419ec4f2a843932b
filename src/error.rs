use crate::HtpStatus;

/// Alias for the result type used throughout the crate. Only
/// `HtpStatus::ERROR` and `HtpStatus::STOP` are fatal to a stream
/// direction; the other error-position statuses are flow control.
pub type Result<T> = std::result::Result<T, HtpStatus>;

impl From<std::io::Error> for HtpStatus {
    fn from(_: std::io::Error) -> Self {
        HtpStatus::ERROR
    }
}

impl<E> From<nom::Err<E>> for HtpStatus {
    fn from(_: nom::Err<E>) -> Self {
        HtpStatus::ERROR
    }
}

