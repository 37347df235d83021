// Copyright 2025 Irreducible Inc.

/// Coarse classification of an [`Error`], stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
	InvalidArgument,
	OutOfRange,
	NotFound,
	FailedPrecondition,
	ResourceExhausted,
	DeadlineExceeded,
	Aborted,
	Unimplemented,
	PermissionDenied,
	Unavailable,
	Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	#[error("out of range: {0}")]
	OutOfRange(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("failed precondition: {0}")]
	FailedPrecondition(String),
	#[error("resource exhausted: {0}")]
	ResourceExhausted(String),
	#[error("deadline exceeded")]
	DeadlineExceeded,
	#[error("semaphore failed: {0}")]
	SemaphoreFailed(String),
	#[error("aborted: {0}")]
	Aborted(String),
	#[error("unimplemented: {0}")]
	Unimplemented(String),
	#[error("permission denied: {0}")]
	PermissionDenied(String),
	#[error("file error: {0}")]
	Io(#[from] std::io::Error),
	/// Generic variant for failures raised by concrete device backends. Passed through unchanged.
	#[error("device error: {0}")]
	DeviceError(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
	pub fn kind(&self) -> StatusKind {
		match self {
			Self::InvalidArgument(_) => StatusKind::InvalidArgument,
			Self::OutOfRange(_) => StatusKind::OutOfRange,
			Self::NotFound(_) => StatusKind::NotFound,
			Self::FailedPrecondition(_) => StatusKind::FailedPrecondition,
			Self::ResourceExhausted(_) => StatusKind::ResourceExhausted,
			Self::DeadlineExceeded => StatusKind::DeadlineExceeded,
			Self::SemaphoreFailed(_) | Self::Aborted(_) => StatusKind::Aborted,
			Self::Unimplemented(_) => StatusKind::Unimplemented,
			Self::PermissionDenied(_) => StatusKind::PermissionDenied,
			Self::Io(_) => StatusKind::Unavailable,
			Self::DeviceError(_) => StatusKind::Internal,
		}
	}

	pub fn is_deadline_exceeded(&self) -> bool {
		matches!(self, Self::DeadlineExceeded)
	}
}

/// Returns early with [`Error::InvalidArgument`] built from a format string.
macro_rules! invalid_argument {
	($($arg:tt)*) => {
		return Err($crate::Error::InvalidArgument(format!($($arg)*)))
	};
}

/// Returns early with [`Error::InvalidArgument`] unless the condition holds.
macro_rules! ensure_argument {
	($cond:expr, $($arg:tt)*) => {
		if !$cond {
			$crate::error::invalid_argument!($($arg)*);
		}
	};
}

pub(crate) use ensure_argument;
pub(crate) use invalid_argument;

#[cfg(test)]
mod tests {
	use super::*;

	fn checked(value: usize) -> Result<usize, Error> {
		ensure_argument!(value < 4, "value {value} must be below 4");
		Ok(value)
	}

	#[test]
	fn test_ensure_argument() {
		assert_eq!(checked(3).unwrap(), 3);
		let err = checked(7).unwrap_err();
		assert_eq!(err.kind(), StatusKind::InvalidArgument);
		assert_eq!(err.to_string(), "invalid argument: value 7 must be below 4");
	}

	#[test]
	fn test_backend_errors_keep_their_message() {
		let err = Error::DeviceError("queue 3 lost".into());
		assert_eq!(err.kind(), StatusKind::Internal);
		assert_eq!(err.to_string(), "device error: queue 3 lost");
	}
}
