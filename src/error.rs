use std::error;
use std::fmt;
use std::io;

use rustls::pki_types::InvalidDnsNameError;

/// The operation that missed its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Acquiring a connection from the pool.
    Borrow,
    /// Resolving the origin host to socket addresses.
    Resolve,
    /// Establishing the transport (TCP connect and, for `https`, the TLS
    /// handshake).
    Connect,
    /// Writing a request.
    Serialize,
    /// Reading a response.
    Parse,
    /// Gracefully shutting the transport down after an upgrade.
    Close,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Phase::Borrow => "pool borrow",
            Phase::Resolve => "address resolution",
            Phase::Connect => "connect",
            Phase::Serialize => "request serialize",
            Phase::Parse => "response parse",
            Phase::Close => "connection close",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by [`Client`](crate::Client) construction and
/// [`send`](crate::Client::send).
#[derive(Debug)]
pub enum Error {
    /// The origin URL could not be parsed.
    InvalidUrl(url::ParseError),
    /// The origin URL's scheme is neither `http` nor `https`.
    InvalidScheme(String),
    /// The origin URL has no host component.
    HostRequired,
    /// The origin host resolved to no addresses.
    AddressNotFound,
    /// A transport-level failure: resolve, connect, TLS handshake, read,
    /// write, or the peer closing the stream.
    Io(io::Error),
    /// The origin host is not a valid TLS server name.
    Tls(InvalidDnsNameError),
    /// A deadline passed before the named phase completed.
    Timeout(Phase),
    /// The peer sent something that does not parse as an HTTP response.
    Protocol(String),
    /// The caller-supplied upgrade handler failed.
    Upgrade(Box<dyn error::Error + Send + Sync>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidUrl(ref err) => write!(f, "invalid origin URL: {}", err),
            Error::InvalidScheme(ref scheme) => {
                write!(f, "unsupported scheme {:?}, expected http or https", scheme)
            }
            Error::HostRequired => f.write_str("origin URL has no host"),
            Error::AddressNotFound => f.write_str("host resolved to no addresses"),
            Error::Io(ref err) => write!(f, "transport error: {}", err),
            Error::Tls(ref err) => write!(f, "invalid TLS server name: {}", err),
            Error::Timeout(phase) => write!(f, "{} timed out", phase),
            Error::Protocol(ref msg) => write!(f, "malformed response: {}", msg),
            Error::Upgrade(ref err) => write!(f, "upgrade handler failed: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::InvalidUrl(ref err) => Some(err),
            Error::Io(ref err) => Some(err),
            Error::Tls(ref err) => Some(err),
            Error::Upgrade(ref err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl Error {
    /// Whether this error is the expiry of the given phase's deadline.
    pub fn is_timeout(&self, phase: Phase) -> bool {
        matches!(*self, Error::Timeout(p) if p == phase)
    }
}
