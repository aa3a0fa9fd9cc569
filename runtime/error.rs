//! Error types for the coder runtime.
//!
//! There are three specific failure classes,
//! each with a static message so they are cheap to construct on the hot path:
//! - [`BuildError`]: a message type's coder table cannot be built.
//!   Fatal for that type and cached alongside the table slot.
//! - [`EncodeError`]: a field value cannot be encoded (per call, recoverable).
//! - [`DecodeError`]: input bytes are malformed.
//!
//! Public entry points unify these into [`Error`].

use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult, Write};
use std::result::Result as StdResult;

/// The [error](StdError) type.
pub struct Error {
    /// Developer-facing message.
    pub msg: String,

    /// Developer-facing parent cause of this error.
    source: Option<Box<dyn StdError + Send + Sync>>,

    /// Which class of failure this is.
    kind: ErrorKind,
}

/// A [result](StdResult) that fails with [`Error`].
pub type Result<T> = StdResult<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A message type's coder table could not be built.
    Build,
    /// A value could not be encoded.
    Encode,
    /// Input bytes could not be decoded.
    Decode,
    /// A schema-level misuse, *e.g.* setting a field number the type does not declare.
    Schema,
}

/// Fatal failure to build a message type's coder table.
///
/// Indicates a mismatch between a schema and its storage layout,
/// never bad input data, so it is reported identically to every caller.
#[derive(Clone)]
pub struct BuildError {
    /// Full name of the message type whose table could not be built.
    pub message_type: String,

    /// The offending field, if the problem is specific to one.
    pub field: Option<u32>,

    /// Basic error message.
    pub reason: &'static str,
}

/// An error encountered while encoding a value.
pub struct EncodeError {
    /// Basic error message.
    message: &'static str,

    /// Traceback of nested fields (most recent first).
    traceback: Vec<Level>,
}

/// An error encountered while decoding input bytes.
pub struct DecodeError {
    /// Basic error message.
    message: &'static str,

    /// Traceback of nested fields (most recent first).
    traceback: Vec<Level>,
}

/// Represents a level of nesting among message fields in an error traceback.
#[derive(Clone, Copy)]
enum Level {
    /// Field number (regular or extension).
    Field(u32),
    /// Repeated field index.
    Index(usize),
}

impl Error {
    /// Return a new error with the given message, but no source (cause).
    pub fn leaf<S: Into<String>>(kind: ErrorKind, msg: S) -> Self {
        Self {
            msg: msg.into(),
            source: None,
            kind,
        }
    }

    /// Return a new error with the given message and source (cause).
    pub fn wrap<S: Into<String>, E: StdError + Send + Sync + 'static>(
        kind: ErrorKind,
        msg: S,
        source: E,
    ) -> Self {
        Self {
            msg: msg.into(),
            source: Some(Box::new(source)),
            kind,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl BuildError {
    #[cold]
    pub(crate) fn new(message_type: &str, field: Option<u32>, reason: &'static str) -> Self {
        Self {
            message_type: message_type.to_owned(),
            field,
            reason,
        }
    }
}

impl EncodeError {
    #[cold]
    pub(crate) fn new(message: &'static str) -> Self {
        Self {
            message,
            traceback: Vec::new(),
        }
    }

    #[cold]
    pub(crate) fn with_field(mut self, number: u32) -> Self {
        self.traceback.push(Level::Field(number));
        self
    }

    #[cold]
    pub(crate) fn with_index(mut self, i: usize) -> Self {
        self.traceback.push(Level::Index(i));
        self
    }

    /// The basic error message, without traceback.
    pub fn message(&self) -> &'static str {
        self.message
    }
}

impl DecodeError {
    #[cold]
    pub(crate) fn new(message: &'static str) -> Self {
        Self {
            message,
            traceback: Vec::new(),
        }
    }

    #[cold]
    pub(crate) fn with_field(mut self, number: u32) -> Self {
        self.traceback.push(Level::Field(number));
        self
    }

    #[cold]
    pub(crate) fn with_index(mut self, i: usize) -> Self {
        self.traceback.push(Level::Index(i));
        self
    }

    /// The basic error message, without traceback.
    pub fn message(&self) -> &'static str {
        self.message
    }
}

/// Write a traceback outermost-first, like `.2.1[0].5`.
fn format_trace(traceback: &[Level], f: &mut Formatter<'_>) -> FmtResult {
    for level in traceback.iter().rev() {
        match level {
            Level::Field(number) => {
                f.write_char('.')?;
                Display::fmt(number, f)?;
            }
            Level::Index(index) => {
                f.write_char('[')?;
                Display::fmt(index, f)?;
                f.write_char(']')?;
            }
        }
    }
    Ok(())
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?}: \"{}\"", self.kind, self.msg)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.msg)
    }
}

/// A build error should be displayed like this:
///   Cannot build coder table for pkg.Message (field 3): <reason>
impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Cannot build coder table for {}", self.message_type)?;
        if let Some(number) = self.field {
            write!(f, " (field {number})")?;
        }
        write!(f, ": {}", self.reason)
    }
}

impl Debug for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

impl StdError for BuildError {}

/// An encoding error should be displayed like this:
///   EncodeError(.2.1[0].5): <message>
impl Display for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("EncodeError(")?;
        format_trace(&self.traceback, f)?;
        f.write_str("): ")?;
        f.write_str(self.message)
    }
}

impl Debug for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

impl StdError for EncodeError {}

/// Numbers following dots indicate field numbers.
/// Those between square brackets indicate repeated field indices.
///   Malformed input (.0.123[0][4].5.5): <message>
impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("Malformed input (")?;
        format_trace(&self.traceback, f)?;
        f.write_str("): ")?;
        f.write_str(self.message)
    }
}

impl Debug for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

impl StdError for DecodeError {}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Error {
        Error::wrap(ErrorKind::Build, e.to_string(), e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Error {
        Error::wrap(ErrorKind::Encode, e.to_string(), e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Error {
        Error::wrap(ErrorKind::Decode, e.to_string(), e)
    }
}
