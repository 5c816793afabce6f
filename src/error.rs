use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// HTTP method type, re-exported for use with error inspection.
pub use reqwest::Method;
/// HTTP status code type, re-exported for use with error inspection.
pub use reqwest::StatusCode;
use reqwest::header;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The server answered with a non-2xx status
    Status,
    /// The server rejected or forbade the supplied credentials (401/403)
    Authentication,
    /// Network-level failure: DNS, refused or reset connection, timeout
    Transport,
    /// A connection probe could not reach the server at all
    Unreachable,
    /// A 2xx response whose body could not be decoded
    MalformedResponse,
    /// The server answered, but not in the shape this client understands
    ProtocolMismatch,
    /// A request parameter had a type that cannot be sent on the wire
    InvalidParameter,
    /// Invalid configuration or arguments supplied by the caller
    Validation,
    /// Error related to the event WebSocket
    WebSocket,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn status<S: Into<String>>(
        status_code: StatusCode,
        method: Method,
        path: String,
        body: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            body: body.into(),
        }
        .into()
    }

    #[must_use]
    pub fn transport(source: reqwest::Error) -> Self {
        Transport::from(source).into()
    }

    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        MalformedResponse {
            reason: reason.into(),
        }
        .into()
    }

    pub fn protocol_mismatch<S: Into<String>>(reason: S) -> Self {
        ProtocolMismatch {
            reason: reason.into(),
        }
        .into()
    }

    pub fn invalid_parameter<S: Into<String>>(name: S, found: &'static str) -> Self {
        InvalidParameterType {
            name: name.into(),
            found,
        }
        .into()
    }

    /// Re-labels this error's kind while keeping its source.
    pub(crate) fn reclassify(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// The server answered with a non-2xx status.
#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: StatusCode,
    pub method: Method,
    pub path: String,
    pub body: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making {} call to {} with {}",
            self.status_code, self.method, self.path, self.body
        )
    }
}

impl StdError for Status {}

/// Coarse classification of a network-level failure.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The caller-supplied timeout elapsed
    TimedOut,
    /// The connection could not be established (DNS failure, refused)
    Connect,
    /// Any other I/O failure while sending or receiving (reset, truncated body)
    Other,
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Transport {
    pub kind: TransportKind,
    pub source: reqwest::Error,
}

impl From<reqwest::Error> for Transport {
    fn from(source: reqwest::Error) -> Self {
        let kind = if source.is_timeout() {
            TransportKind::TimedOut
        } else if source.is_connect() {
            TransportKind::Connect
        } else {
            TransportKind::Other
        };

        Self { kind, source }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport failure ({:?}): {}", self.kind, self.source)
    }
}

impl StdError for Transport {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

/// Credentials were rejected (401) or access was forbidden (403).
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct Authentication {
    pub status_code: StatusCode,
}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication failed with status {}", self.status_code)
    }
}

impl StdError for Authentication {}

#[non_exhaustive]
#[derive(Debug)]
pub struct MalformedResponse {
    pub reason: String,
}

impl fmt::Display for MalformedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed response: {}", self.reason)
    }
}

impl StdError for MalformedResponse {}

#[non_exhaustive]
#[derive(Debug)]
pub struct ProtocolMismatch {
    pub reason: String,
}

impl fmt::Display for ProtocolMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized server response: {}", self.reason)
    }
}

impl StdError for ProtocolMismatch {}

/// A parameter value that has no wire representation, such as a nested array or object.
#[non_exhaustive]
#[derive(Debug)]
pub struct InvalidParameterType {
    pub name: String,
    pub found: &'static str,
}

impl fmt::Display for InvalidParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter `{}` has unsupported type {}",
            self.name, self.found
        )
    }
}

impl StdError for InvalidParameterType {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<header::InvalidHeaderValue> for Error {
    fn from(e: header::InvalidHeaderValue) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_html_form::ser::Error> for Error {
    fn from(e: serde_html_form::ser::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

impl From<Transport> for Error {
    fn from(err: Transport) -> Self {
        Error::with_source(Kind::Transport, err)
    }
}

impl From<Authentication> for Error {
    fn from(err: Authentication) -> Self {
        Error::with_source(Kind::Authentication, err)
    }
}

impl From<MalformedResponse> for Error {
    fn from(err: MalformedResponse) -> Self {
        Error::with_source(Kind::MalformedResponse, err)
    }
}

impl From<ProtocolMismatch> for Error {
    fn from(err: ProtocolMismatch) -> Self {
        Error::with_source(Kind::ProtocolMismatch, err)
    }
}

impl From<InvalidParameterType> for Error {
    fn from(err: InvalidParameterType) -> Self {
        Error::with_source(Kind::InvalidParameter, err)
    }
}
