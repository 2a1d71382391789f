//! Client configuration.

use std::time::Duration;

use crate::pool::PoolSize;

/// Tunable options for a [`Client`](crate::Client).
///
/// Every option has a default; override the ones you care about with the
/// builder-style setters and pass the result to
/// [`Client::with_configuration`](crate::Client::with_configuration).
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) pool_size: PoolSize,
    pub(crate) parser_buffer_size: usize,
    pub(crate) serializer_buffer_size: usize,
    pub(crate) address_resolution_timeout: Duration,
    pub(crate) connection_timeout: Duration,
    pub(crate) borrow_timeout: Duration,
    pub(crate) parse_timeout: Duration,
    pub(crate) serialize_timeout: Duration,
    pub(crate) close_connection_timeout: Duration,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            pool_size: PoolSize::default(),
            parser_buffer_size: 4096,
            serializer_buffer_size: 4096,
            address_resolution_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(60),
            borrow_timeout: Duration::from_secs(5 * 60),
            parse_timeout: Duration::from_secs(5 * 60),
            serialize_timeout: Duration::from_secs(5 * 60),
            close_connection_timeout: Duration::from_secs(60),
        }
    }
}

impl Configuration {
    /// Constructs a `Configuration` with every option at its default.
    pub fn new() -> Configuration {
        Default::default()
    }

    /// Sets the pool bounds: the lower bound is opened eagerly at client
    /// construction, the upper bound caps growth.
    ///
    /// Defaults to `[5, 10]`.
    pub fn pool_size(mut self, pool_size: PoolSize) -> Configuration {
        self.pool_size = pool_size;
        self
    }

    /// Sets the parser's read-buffer size in bytes.
    ///
    /// Defaults to 4096.
    pub fn parser_buffer_size(mut self, parser_buffer_size: usize) -> Configuration {
        assert!(parser_buffer_size > 0, "parser buffer must be non-empty");
        self.parser_buffer_size = parser_buffer_size;
        self
    }

    /// Sets the serializer's write-buffer size in bytes.
    ///
    /// Defaults to 4096.
    pub fn serializer_buffer_size(mut self, serializer_buffer_size: usize) -> Configuration {
        assert!(
            serializer_buffer_size > 0,
            "serializer buffer must be non-empty"
        );
        self.serializer_buffer_size = serializer_buffer_size;
        self
    }

    /// Sets the deadline for resolving the origin host.
    ///
    /// Defaults to 1 minute.
    pub fn address_resolution_timeout(
        mut self,
        address_resolution_timeout: Duration,
    ) -> Configuration {
        self.address_resolution_timeout = address_resolution_timeout;
        self
    }

    /// Sets the deadline for the TCP connect and, for `https`, the TLS
    /// handshake.
    ///
    /// Defaults to 1 minute.
    pub fn connection_timeout(mut self, connection_timeout: Duration) -> Configuration {
        self.connection_timeout = connection_timeout;
        self
    }

    /// Sets the maximum time [`send`](crate::Client::send) may spend
    /// acquiring a pooled connection.
    ///
    /// Defaults to 5 minutes.
    pub fn borrow_timeout(mut self, borrow_timeout: Duration) -> Configuration {
        self.borrow_timeout = borrow_timeout;
        self
    }

    /// Sets the deadline for parsing one full response.
    ///
    /// Defaults to 5 minutes.
    pub fn parse_timeout(mut self, parse_timeout: Duration) -> Configuration {
        self.parse_timeout = parse_timeout;
        self
    }

    /// Sets the deadline for writing one full request.
    ///
    /// Defaults to 5 minutes.
    pub fn serialize_timeout(mut self, serialize_timeout: Duration) -> Configuration {
        self.serialize_timeout = serialize_timeout;
        self
    }

    /// Sets the deadline for the graceful stream shutdown after a protocol
    /// upgrade.
    ///
    /// Defaults to 1 minute.
    pub fn close_connection_timeout(mut self, close_connection_timeout: Duration) -> Configuration {
        self.close_connection_timeout = close_connection_timeout;
        self
    }
}
