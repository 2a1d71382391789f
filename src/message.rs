//! Request and response types and the upgrade seam.

use std::error;
use std::fmt;

use async_trait::async_trait;

use crate::transport::Transport;

/// An HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
    /// OPTIONS
    Options,
    /// TRACE
    Trace,
}

impl Method {
    pub(crate) fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-supplied handler invoked after a successful protocol upgrade.
///
/// The handler receives the upgrade response and a mutable borrow of the
/// raw transport, which is no longer speaking HTTP. When the handler
/// returns, the client shuts the transport down and retires the
/// connection; it is never returned to the pool.
#[async_trait]
pub trait UpgradeHandler: Send + Sync {
    /// Drives the post-upgrade protocol on the raw stream.
    async fn upgrade(
        &mut self,
        response: &Response,
        stream: &mut Transport,
    ) -> Result<(), Box<dyn error::Error + Send + Sync>>;
}

/// An HTTP request to be sent with [`Client::send`](crate::Client::send).
pub struct Request {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    // Written by the client before serialization; any caller-supplied
    // Host or User-Agent header is discarded.
    pub(crate) host: String,
    pub(crate) user_agent: String,
    pub(crate) upgrade: Option<Box<dyn UpgradeHandler>>,
}

impl Request {
    /// Constructs a request with the given method and target path.
    pub fn new(method: Method, target: impl Into<String>) -> Request {
        let mut target = target.into();
        if target.is_empty() {
            target.push('/');
        }
        Request {
            method,
            target,
            headers: Vec::new(),
            body: Vec::new(),
            host: String::new(),
            user_agent: String::new(),
            upgrade: None,
        }
    }

    /// Constructs a GET request for `target`.
    pub fn get(target: impl Into<String>) -> Request {
        Request::new(Method::Get, target)
    }

    /// Constructs a HEAD request for `target`.
    pub fn head(target: impl Into<String>) -> Request {
        Request::new(Method::Head, target)
    }

    /// Constructs a POST request for `target` with the given body.
    pub fn post(target: impl Into<String>, body: impl Into<Vec<u8>>) -> Request {
        Request::new(Method::Post, target).body(body)
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Request {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Request {
        self.body = body.into();
        self
    }

    /// Attaches an upgrade handler; see [`UpgradeHandler`].
    pub fn on_upgrade(mut self, handler: Box<dyn UpgradeHandler>) -> Request {
        self.upgrade = Some(handler);
        self
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The request target path.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// A parsed HTTP response.
#[derive(Debug)]
pub struct Response {
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) version: u8,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl Response {
    /// The status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase, which may be empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The HTTP/1 minor version the peer answered with.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Looks a header up by name, case-insensitively. The first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers in the order the peer sent them.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the response, returning its body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}
