use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotFound,
    InvalidModel,
    InvalidArgument,
    InvalidState,
    UnexpectedNull,
    InvalidType,
    NotImplemented,
    Aggregation,
    Backend,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    /// Independent failures collected into an `Aggregation` error
    pub causes: Vec<Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context, causes: Vec::new() }
    }

    pub fn invalid_model(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidModel, context.into())
    }

    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, context.into())
    }

    pub fn not_implemented(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotImplemented, context.into())
    }

    /// Collect several failures into one error.
    ///
    /// A single error is returned as-is instead of being wrapped.
    pub fn aggregate(mut errors: Vec<Error>) -> Self {
        if errors.len() == 1 {
            return errors.remove(0);
        }
        Error {
            kind: ErrorKind::Aggregation,
            context: format!("{} errors occurred", errors.len()),
            causes: errors,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)?;
        for cause in &self.causes {
            write!(f, "\n  - {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Parse, err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::new(ErrorKind::Backend, format!("SQLite error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_lists_every_cause() {
        let err = Error::aggregate(vec![
            Error::invalid_model("users.id has no type"),
            Error::invalid_model("users.name has no type"),
        ]);
        assert!(err.is(ErrorKind::Aggregation));
        assert_eq!(err.causes.len(), 2);
        let text = err.to_string();
        assert!(text.contains("users.id"));
        assert!(text.contains("users.name"));
    }

    #[test]
    fn aggregate_of_one_is_unwrapped() {
        let err = Error::aggregate(vec![Error::invalid_argument("bad")]);
        assert!(err.is(ErrorKind::InvalidArgument));
        assert!(err.causes.is_empty());
    }
}
