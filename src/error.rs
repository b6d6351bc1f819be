//! # Error Handling
//!
//! Domain errors for the recorder core. Every failure is classified by the
//! subsystem it belongs to, which decides how far it unwinds:
//!
//! - **Config**: bad user input (directory, filename, encoder name, cvar
//!   value). Aborts the current command, leaves no side effects.
//! - **Graphics**: device or surface failures. During `start()` they abort
//!   the session; during a running session a failed map drops the frame.
//! - **Codec**: encoder/muxer failures. Open failures abort start; runtime
//!   failures drop the frame and log.
//! - **Extension**: a module is missing required exports or failed its
//!   init. The module is skipped; the session proceeds.
//! - **Fatal**: out-of-memory or a lost device mid-session. The session is
//!   forcibly ended and flushed where possible.
//!
//! Everything bubbles to the nearest session-scope handler (start/tick/end);
//! local handlers log and continue.

use std::error::Error as StdError;
use std::fmt;

/// Subsystem classification, see module docs for unwinding rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Graphics,
    Codec,
    Extension,
    Fatal,
}

impl ErrorKind {
    /// Short tag used as the message prefix in user-visible output.
    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Graphics => "graphics",
            ErrorKind::Codec => "codec",
            ErrorKind::Extension => "extension",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Error with subsystem classification and optional underlying cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn graphics(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Graphics, message)
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Codec, message)
    }

    pub fn extension(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Extension, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Fatal errors force the session down even mid-tick.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.tag(), self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Config, err.to_string()).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
