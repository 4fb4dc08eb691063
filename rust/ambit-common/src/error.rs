use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Reports a contract violation by the caller, e.g. settling a call's
    /// terminal outcome twice. Usage errors are never retried.
    pub fn usage(operation: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Usage {
                operation: operation.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn rejected(reason: impl Into<String>) -> Error {
        Error(
            ErrorKind::Rejected {
                reason: reason.into(),
            }
            .into(),
        )
    }

    pub fn other<E>(context: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::Other {
                context: context.into(),
                source: Box::new(source),
            }
            .into(),
        )
    }

    /// Returns `true` for errors caused by misuse of an API contract.
    pub fn is_usage(&self) -> bool {
        matches!(self.kind(), ErrorKind::Usage { .. })
    }

    /// Returns `true` when work was refused by a dispatcher.
    pub fn is_rejected(&self) -> bool {
        matches!(self.kind(), ErrorKind::Rejected { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("usage error in {operation}: {message}")]
    Usage { operation: String, message: String },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("execution rejected: {reason}")]
    Rejected { reason: String },

    #[error("{context}: {source}")]
    Other {
        context: String,
        source: StdErrorBoxed,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_display() {
        let err = Error::usage("set_terminal_outcome", "outcome already set");
        assert!(err.is_usage());
        assert!(!err.is_rejected());
        assert_eq!(
            err.to_string(),
            "usage error in set_terminal_outcome: outcome already set"
        );
    }

    #[test]
    fn test_rejected_error_kind() {
        let err = Error::rejected("queue is full");
        assert!(err.is_rejected());
        match err.into_kind() {
            ErrorKind::Rejected { reason } => assert_eq!(reason, "queue is full"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_other_error_keeps_source() {
        let source = std::io::Error::new(std::io::ErrorKind::InvalidData, "truncated");
        let err = Error::other("executor options", source);
        assert!(!err.is_usage());
        assert_eq!(err.to_string(), "executor options: truncated");
        match err.kind() {
            ErrorKind::Other { source, .. } => assert_eq!(source.to_string(), "truncated"),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
