//! Error taxonomy shared by every component of the parser.
//!
//! Every fallible operation in this crate returns [`Error`], which pairs a
//! classification ([`ErrorKind`]) with a human-readable message and a trail
//! of the call layers it passed through. Nothing here recovers from an
//! error on the caller's behalf: a checksum mismatch or a bounds violation
//! is always surfaced, never silently patched over.

use std::fmt;

/// Classification of a failure, independent of the message text.
///
/// Mirrors the taxonomy used by on-disk format parsers in this space:
/// a small fixed set of kinds rather than one variant per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
	/// A caller-supplied value is out of contract (zero buffer, bad offset, ...).
	#[error("invalid argument")]
	InvalidArgument,
	/// The I/O source failed; see the wrapped message for the underlying cause.
	#[error("I/O error")]
	Io,
	/// A structure's magic signature did not match what was expected.
	#[error("signature mismatch")]
	SignatureMismatch,
	/// A v5 (CRC-enabled) block failed its CRC32C self-check.
	#[error("checksum mismatch")]
	ChecksumMismatch,
	/// The on-disk format version is not one this parser understands.
	#[error("unsupported version")]
	UnsupportedVersion,
	/// A field selects a variant (fork type, namespace flag, ...) this parser does not implement.
	#[error("unsupported value")]
	UnsupportedValue,
	/// Bounds were violated, a field was self-inconsistent, or a cycle-depth cap was hit.
	#[error("invalid data")]
	InvalidData,
	/// A path, inode, attribute, or tree key was not found.
	#[error("not found")]
	NotFound,
	/// An offset or length fell outside a known extent or inode size.
	#[error("out of bounds")]
	OutOfBounds,
	/// The volume's cooperative cancel flag was observed set.
	#[error("abort requested")]
	AbortRequested,
}

/// An error raised by any operation in this crate.
///
/// Carries a [`ErrorKind`], a structural message, and a trace of the
/// component boundaries it was passed through via [`Error::context`], so a
/// failure three layers deep prints as e.g.
/// `read_directory -> parse_block -> decode_entry: name length out of bounds`.
#[derive(Debug)]
pub struct Error {
	kind: ErrorKind,
	message: String,
	trace: Vec<&'static str>,
}

impl Error {
	/// Creates a new error of the given kind with a structural message.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			trace: Vec::new(),
		}
	}

	/// Returns the error's classification.
	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	/// Appends the name of the calling layer to the error's trace and
	/// returns it, for use in a `.map_err(|e| e.context("parse_block"))` chain.
	pub fn context(mut self, layer: &'static str) -> Self {
		self.trace.push(layer);
		self
	}

	/// Shorthand for `Err(Error::new(kind, message))`.
	pub fn err<T>(kind: ErrorKind, message: impl Into<String>) -> std::result::Result<T, Self> {
		Err(Self::new(kind, message))
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.trace.is_empty() {
			write!(f, "{}: {}", self.kind, self.message)
		} else {
			for (i, layer) in self.trace.iter().rev().enumerate() {
				if i > 0 {
					f.write_str(" -> ")?;
				}
				f.write_str(layer)?;
			}
			write!(f, ": {}: {}", self.kind, self.message)
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Self {
		Self::new(ErrorKind::Io, e.to_string())
	}
}

/// Extension trait for pushing a layer name onto a `Result`'s error context.
pub trait ResultExt<T> {
	/// Appends `layer` to the error's trace, if this result is an error.
	fn context(self, layer: &'static str) -> std::result::Result<T, Error>;
}

impl<T> ResultExt<T> for std::result::Result<T, Error> {
	fn context(self, layer: &'static str) -> std::result::Result<T, Error> {
		self.map_err(|e| e.context(layer))
	}
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
