//! The SafeScale error taxonomy.
//!
//! Every layer of the orchestrator surfaces errors from the same closed set
//! of kinds. Provider-native errors never cross the stack boundary: they are
//! normalized into an [`Error`] first. An error carries an optional cause
//! (the error it wraps) and a list of consequences (failures that happened
//! while cleaning up after the primary failure). Consequences never change
//! the kind of the primary error.

use std::fmt;

/// A result type using the SafeScale [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error kinds surfaced by every SafeScale layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    InvalidInstance,
    InvalidParameter,
    InvalidRequest,
    NotAuthenticated,
    Forbidden,
    NotFound,
    Duplicate,
    Timeout,
    Overload,
    NotAvailable,
    NotImplemented,
    Aborted,
    Inconsistent,
    Syntax,
    Execution,
    Overflow,
    UnknownProvider,
}

impl ErrorKind {
    /// Whether errors of this kind are worth retrying.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Overload | Self::NotAvailable | Self::Execution
        )
    }

    /// The CLI exit code matching this kind.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InvalidParameter | Self::InvalidRequest | Self::Syntax => 2,
            Self::NotFound => 3,
            Self::Timeout => 4,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInstance => "invalid instance",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidRequest => "invalid request",
            Self::NotAuthenticated => "not authenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::Duplicate => "duplicate",
            Self::Timeout => "timeout",
            Self::Overload => "overload",
            Self::NotAvailable => "not available",
            Self::NotImplemented => "not implemented",
            Self::Aborted => "aborted",
            Self::Inconsistent => "inconsistent",
            Self::Syntax => "syntax",
            Self::Execution => "execution",
            Self::Overflow => "overflow",
            Self::UnknownProvider => "unknown provider",
        };
        f.write_str(s)
    }
}

/// A SafeScale error: a kind from the closed taxonomy, a message, an
/// optional cause and the consequences of failed cleanup.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Box<Error>>,
    consequences: Vec<Error>,
}

impl Error {
    /// Render the error with its cause chain and indented consequences,
    /// the way the CLI presents failures.
    #[must_use]
    pub fn detailed(&self) -> String {
        let mut output = self.to_string();
        if let Some(cause) = &self.cause {
            output.push_str(&format!(" (caused by: {cause})"));
        }
        for consequence in &self.consequences {
            output.push_str(&format!("\n  consequence: {consequence}"));
        }
        output
    }
}

macro_rules! constructors {
    ($(($fn_name:ident, $kind:ident)),* $(,)?) => {
        $(
            #[doc = concat!("Create a new `", stringify!($kind), "` error.")]
            pub fn $fn_name(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        )*
    };
}

impl Error {
    /// Create a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            consequences: Vec::new(),
        }
    }

    constructors!(
        (invalid_instance, InvalidInstance),
        (invalid_parameter, InvalidParameter),
        (invalid_request, InvalidRequest),
        (not_authenticated, NotAuthenticated),
        (forbidden, Forbidden),
        (not_found, NotFound),
        (duplicate, Duplicate),
        (timeout, Timeout),
        (overload, Overload),
        (not_available, NotAvailable),
        (not_implemented, NotImplemented),
        (inconsistent, Inconsistent),
        (syntax, Syntax),
        (execution, Execution),
        (overflow, Overflow),
        (unknown_provider, UnknownProvider),
    );

    /// Create an `Aborted` error wrapping the root cause of the abort.
    #[must_use]
    pub fn aborted(cause: Option<Error>) -> Self {
        Self {
            kind: ErrorKind::Aborted,
            message: "operation aborted".to_string(),
            cause: cause.map(Box::new),
            consequences: Vec::new(),
        }
    }

    /// Fold a list of errors into a single error whose iteration order
    /// matches the input order.
    ///
    /// An empty list folds to `None`; a single error is returned as-is.
    #[must_use]
    pub fn list(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            n => {
                let kind = errors[0].kind;
                let uniform = errors.iter().all(|e| e.kind == kind);
                Some(Self {
                    kind: if uniform { kind } else { ErrorKind::Execution },
                    message: format!("{n} errors occurred"),
                    cause: None,
                    consequences: errors,
                })
            }
        }
    }

    /// Attach a cause to this error.
    #[must_use]
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach a cleanup failure as a consequence of this error.
    ///
    /// The kind and message of `self` are unchanged.
    #[must_use]
    pub fn with_consequence(mut self, consequence: Error) -> Self {
        self.consequences.push(consequence);
        self
    }

    /// Attach an optional cleanup failure as a consequence.
    #[must_use]
    pub fn with_consequence_opt(self, consequence: Option<Error>) -> Self {
        match consequence {
            Some(c) => self.with_consequence(c),
            None => self,
        }
    }

    /// The kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The message of this error, without kind or consequences.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error this one wraps, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// The innermost cause of this error (itself if it wraps nothing).
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// The cleanup failures attached to this error, in attachment order.
    ///
    /// For an error built with [`Error::list`], this is the ordered list of
    /// member errors.
    #[must_use]
    pub fn consequences(&self) -> &[Error] {
        &self.consequences
    }

    /// Whether this error is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_preserved_by_consequences() {
        let err = Error::overload("nova is busy")
            .with_consequence(Error::execution("cleanup of host failed"));
        assert_eq!(err.kind(), ErrorKind::Overload);
        assert_eq!(err.consequences().len(), 1);
    }

    #[test]
    fn transient_classification() {
        assert!(Error::timeout("t").is_transient());
        assert!(Error::overload("o").is_transient());
        assert!(Error::not_available("n").is_transient());
        assert!(Error::execution("e").is_transient());
        assert!(!Error::not_found("n").is_transient());
        assert!(!Error::duplicate("d").is_transient());
    }

    #[test]
    fn list_preserves_order() {
        let err = Error::list(vec![
            Error::not_found("first"),
            Error::overload("second"),
            Error::execution("third"),
        ])
        .unwrap();
        let messages: Vec<_> = err.consequences().iter().map(Error::message).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        // Mixed kinds fold to Execution.
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn list_of_one_is_the_error_itself() {
        let err = Error::list(vec![Error::not_found("only")]).unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "only");
        assert!(Error::list(vec![]).is_none());
    }

    #[test]
    fn aborted_wraps_root_cause() {
        let err = Error::aborted(Some(Error::overload("too many requests")));
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(err.root_cause().kind(), ErrorKind::Overload);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Error::execution("e").kind().exit_code(), 1);
        assert_eq!(Error::invalid_parameter("p").kind().exit_code(), 2);
        assert_eq!(Error::not_found("n").kind().exit_code(), 3);
        assert_eq!(Error::timeout("t").kind().exit_code(), 4);
    }
}
