use std::fmt;
use thiserror::Error;

/// Location in source code for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// All error types for tawk
#[derive(Error, Debug)]
pub enum Error {
    #[error("lexer error at {location}: {message}")]
    Lexer {
        message: String,
        location: SourceLocation,
    },

    #[error("parser error at {location}: {message}")]
    Parser {
        message: String,
        location: SourceLocation,
    },

    #[error("semantic error at {location}: {message}")]
    Semantic {
        message: String,
        location: SourceLocation,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("runtime error: {message}")]
    Runtime { message: String },

    #[error("runtime error at line {line}: {message}")]
    RuntimeWithLocation { message: String, line: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    pub fn lexer(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Lexer {
            message: message.into(),
            location: SourceLocation::new(line, column),
        }
    }

    pub fn parser(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Parser {
            message: message.into(),
            location: SourceLocation::new(line, column),
        }
    }

    pub fn semantic(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::Semantic {
            message: message.into(),
            location,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn runtime_at(message: impl Into<String>, line: usize) -> Self {
        Self::RuntimeWithLocation {
            message: message.into(),
            line,
        }
    }

    /// Attach a source line to a location-less runtime error
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            Error::Runtime { message } if line > 0 => Error::RuntimeWithLocation { message, line },
            other => other,
        }
    }
}

/// Result type alias for tawk operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location() {
        let loc = SourceLocation::new(10, 5);
        assert_eq!(loc.line, 10);
        assert_eq!(loc.column, 5);
        assert_eq!(format!("{}", loc), "line 10, column 5");
    }

    #[test]
    fn test_lexer_error() {
        let err = Error::lexer("unexpected character", 1, 5);
        assert!(matches!(err, Error::Lexer { .. }));
        let msg = format!("{}", err);
        assert!(msg.contains("lexer error"));
        assert!(msg.contains("unexpected character"));
    }

    #[test]
    fn test_semantic_error() {
        let err = Error::semantic("unresolved function 'f'", SourceLocation::new(2, 3));
        let msg = format!("{}", err);
        assert!(msg.contains("semantic error"));
        assert!(msg.contains("line 2, column 3"));
        assert!(msg.contains("unresolved function"));
    }

    #[test]
    fn test_invalid_argument() {
        let err = Error::invalid_argument("cannot compile intermediate code: a.ai");
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(format!("{}", err).starts_with("invalid argument"));
    }

    #[test]
    fn test_runtime_error_gains_line() {
        let err = Error::runtime("division by zero").at_line(7);
        assert!(matches!(err, Error::RuntimeWithLocation { line: 7, .. }));
        assert!(format!("{}", err).contains("line 7"));

        // line 0 means "unknown"
        let err = Error::runtime("division by zero").at_line(0);
        assert!(matches!(err, Error::Runtime { .. }));
    }

    #[test]
    fn test_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(format!("{}", err).contains("I/O error"));
    }

    #[test]
    fn test_regex_error() {
        let re_err = regex::Regex::new("[invalid").unwrap_err();
        let err: Error = re_err.into();
        assert!(matches!(err, Error::Regex(_)));
        assert!(format!("{}", err).contains("regex error"));
    }
}
