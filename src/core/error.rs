use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    Conflict,
    Permission,
    Invalid,
    Remote,
    Connectivity,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<String>,
    status: Option<u16>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            status: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Resource path (relative to the API base URL) the failing call targeted.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// HTTP status reported by the remote, when the failure came from one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_connectivity(&self) -> bool {
        self.kind == ErrorKind::Connectivity
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {path})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

/// Map an HTTP error status onto the error taxonomy.
pub fn kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::Invalid,
        401 | 403 => ErrorKind::Permission,
        404 => ErrorKind::NotFound,
        409 | 412 | 428 => ErrorKind::Conflict,
        _ => ErrorKind::Remote,
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::Permission => 5,
        ErrorKind::Invalid => 6,
        ErrorKind::Remote => 7,
        ErrorKind::Connectivity => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, kind_from_status, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::Conflict, 4),
            (ErrorKind::Permission, 5),
            (ErrorKind::Invalid, 6),
            (ErrorKind::Remote, 7),
            (ErrorKind::Connectivity, 8),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn status_mapping_separates_conflicts() {
        assert_eq!(kind_from_status(412), ErrorKind::Conflict);
        assert_eq!(kind_from_status(409), ErrorKind::Conflict);
        assert_eq!(kind_from_status(422), ErrorKind::Invalid);
        assert_eq!(kind_from_status(404), ErrorKind::NotFound);
        assert_eq!(kind_from_status(503), ErrorKind::Remote);
    }

    #[test]
    fn display_includes_path_and_status() {
        let err = Error::new(ErrorKind::Conflict)
            .with_message("etag mismatch")
            .with_path("people/abc")
            .with_status(412);
        assert_eq!(
            err.to_string(),
            "Conflict: etag mismatch (path: people/abc) (status: 412)"
        );
    }
}
