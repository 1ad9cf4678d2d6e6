//! Error types for the signing pipeline.
//!
//! [`NotaryError`] carries a classified [`ErrorKind`], a static description, optional dynamic
//! detail, an optional source error and the call-site location where it was raised. Several
//! errors can be aggregated into one, which is how the pipeline reports failures of more than one
//! worker during a single shutdown.
//!
//! Cancellation is not an error. Waits that can be interrupted return
//! [`crate::concurrency::shutdown::ShutdownResult`] instead.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type used across the crate.
pub type NotaryResult<T> = Result<T, NotaryError>;

/// Classification of the failures the pipeline can surface.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Queue errors
    OutOfCapacity,

    // Worker lifecycle errors
    WorkerAlreadyStarted,
    WorkerNotStarted,
    WorkerPanic,
    SignerPanic,

    // Configuration errors
    ConfigError,

    // Storage errors
    SourceQueryFailed,
    SinkQueryFailed,
    SinkWriteFailed,

    // Data and IO errors
    InvalidData,
    IoError,

    Unknown,
}

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<NotaryError>,
        location: &'static Location<'static>,
    },
}

/// Main error type of the crate.
#[derive(Debug, Clone)]
pub struct NotaryError {
    repr: ErrorRepr,
}

impl NotaryError {
    /// Returns the kind of this error.
    ///
    /// Aggregated errors report the kind of their first member, or [`ErrorKind::Unknown`] when
    /// empty.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.kind,
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(NotaryError::kind)
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every kind contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match &self.repr {
            ErrorRepr::Single(payload) => vec![payload.kind],
            ErrorRepr::Many { errors, .. } => errors.iter().flat_map(NotaryError::kinds).collect(),
        }
    }

    /// Returns the static description, or `None` for aggregated errors.
    pub fn description(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::Single(payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the dynamic detail, if any.
    ///
    /// For aggregated errors this is the detail of the first member that has one.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.detail.as_deref(),
            ErrorRepr::Many { errors, .. } => errors.iter().find_map(NotaryError::detail),
        }
    }

    /// Returns the call site where the error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns the backtrace captured with the error.
    ///
    /// Only captured when `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` enable it.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match &self.repr {
            ErrorRepr::Single(payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the number of errors aggregated in this error.
    pub fn len(&self) -> usize {
        match &self.repr {
            ErrorRepr::Single(_) => 1,
            ErrorRepr::Many { errors, .. } => errors.len(),
        }
    }

    /// Returns `true` for an aggregate without any member.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attaches the error that caused this one.
    ///
    /// Has no effect on aggregated errors, which forward their first member as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(payload) = &mut self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        NotaryError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for NotaryError {
    fn eq(&self, other: &NotaryError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for NotaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line()
                )?;

                if let Some(detail) = &payload.detail {
                    write_indented(f, "Detail:", detail)?;
                }

                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write_indented(f, "Backtrace:", &payload.backtrace.to_string())?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} errors @ {}:{}",
                    errors.len(),
                    location.file(),
                    location.line()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    write_indented(f, &format!("{}.", index + 1), &error.to_string())?;
                }

                Ok(())
            }
        }
    }
}

/// Writes `label` on its own line followed by `body` indented by two more spaces.
fn write_indented(f: &mut fmt::Formatter<'_>, label: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {label}")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            writeln!(f)?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for NotaryError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for NotaryError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> NotaryError {
        NotaryError::from_components(kind, Cow::Borrowed(description), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for NotaryError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> NotaryError {
        NotaryError::from_components(kind, Cow::Borrowed(description), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for NotaryError
where
    E: Into<NotaryError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> NotaryError {
        let location = Location::caller();
        let mut errors: Vec<NotaryError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        NotaryError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for NotaryError {
    #[track_caller]
    fn from(err: std::io::Error) -> NotaryError {
        let detail = err.to_string();
        NotaryError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps [`sqlx::Error`] by failure class.
///
/// Storage adapters usually attach a more precise kind themselves through
/// [`crate::notary_error!`], this conversion covers the remaining `?` sites.
impl From<sqlx::Error> for NotaryError {
    #[track_caller]
    fn from(err: sqlx::Error) -> NotaryError {
        let (kind, description) = match &err {
            sqlx::Error::Io(_) => (ErrorKind::IoError, "Database I/O failed"),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "Database configuration is invalid")
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorKind::InvalidData, "Database value could not be decoded")
            }
            _ => (ErrorKind::Unknown, "Database operation failed"),
        };

        let detail = err.to_string();
        NotaryError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<tokio::task::JoinError> for NotaryError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> NotaryError {
        let (kind, description) = if err.is_panic() {
            (ErrorKind::WorkerPanic, "Worker task panicked")
        } else {
            (ErrorKind::Unknown, "Worker task was cancelled")
        };

        let detail = err.to_string();
        NotaryError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
