//! The client: origin configuration, pool ownership, and the send loop.

use std::fmt;
use std::sync::Arc;

use log::debug;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::config::Configuration;
use crate::conn::{Connection, Manager};
use crate::error::{Error, Phase};
use crate::message::{Method, Request, Response};
use crate::pool::{BorrowError, Pool, State};

/// The User-Agent stamped on every outgoing request.
const USER_AGENT: &str = concat!("roost/", env!("CARGO_PKG_VERSION"));

/// An HTTP/1.x client bound to a single origin, multiplexing requests over
/// a bounded pool of persistent connections.
pub struct Client {
    host: String,
    port: u16,
    secure: bool,
    configuration: Configuration,
    pool: Pool<Manager>,
}

impl Client {
    /// Builds a client for `url` with the default [`Configuration`].
    ///
    /// See [`with_configuration`](Client::with_configuration).
    pub async fn new(url: &str) -> Result<Client, Error> {
        Client::with_configuration(url, Configuration::default()).await
    }

    /// Builds a client for `url`.
    ///
    /// The URL must be absolute, with an `http` or `https` scheme and a
    /// host; an explicit port overrides the scheme default (80 or 443).
    /// The pool's minimum number of connections is opened before this
    /// returns, so construction also surfaces resolve, connect, and
    /// handshake errors.
    pub async fn with_configuration(
        url: &str,
        configuration: Configuration,
    ) -> Result<Client, Error> {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(url::ParseError::EmptyHost) => return Err(Error::HostRequired),
            Err(err) => return Err(Error::InvalidUrl(err)),
        };

        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(Error::InvalidScheme(other.to_string())),
        };
        let host = match url.host_str() {
            Some(host) => host.to_string(),
            None => return Err(Error::HostRequired),
        };
        let port = url.port().unwrap_or(if secure { 443 } else { 80 });

        let tls = if secure { Some(tls_connector()) } else { None };
        let manager = Manager {
            host: host.clone(),
            port,
            tls,
            address_resolution_timeout: configuration.address_resolution_timeout,
            connection_timeout: configuration.connection_timeout,
            serializer_buffer_size: configuration.serializer_buffer_size,
            parser_buffer_size: configuration.parser_buffer_size,
        };
        let pool = Pool::new(configuration.pool_size, manager).await?;

        Ok(Client {
            host,
            port,
            secure,
            configuration,
            pool,
        })
    }

    /// The origin host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The origin port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether requests travel over TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// A snapshot of the connection pool's counters.
    pub fn pool_state(&self) -> State {
        self.pool.state()
    }

    /// Sends `request` and returns the parsed response.
    ///
    /// The request's `Host` header is set to `host:port` and its
    /// `User-Agent` to this crate's identifier, replacing any
    /// caller-supplied values.
    ///
    /// A connection-level failure (the usual cause is a pooled connection
    /// the peer closed between uses) retires the connection and
    /// transparently retries on a fresh one; the caller sees either a
    /// response or the error that stopped a connection from being
    /// acquired.
    ///
    /// If the request carries an upgrade handler, the handler runs against
    /// the raw stream once the response head is parsed; afterwards the
    /// stream is shut down and the connection retired.
    pub async fn send(&self, mut request: Request) -> Result<Response, Error> {
        request.host = format!("{}:{}", self.host, self.port);
        request.user_agent = USER_AGENT.to_string();

        loop {
            let deadline = Instant::now() + self.configuration.borrow_timeout;
            let mut conn = self.pool.borrow(deadline).await.map_err(|err| match err {
                BorrowError::TimedOut => Error::Timeout(Phase::Borrow),
                BorrowError::Connect(err) => err,
            })?;

            match self.exchange(&mut conn, &mut request).await {
                Ok(Exchange::Plain(response)) => {
                    self.pool.put_back(conn);
                    return Ok(response);
                }
                Ok(Exchange::Upgraded(response)) => {
                    debug!("upgrade complete, retiring connection");
                    self.pool.dispose(conn);
                    return Ok(response);
                }
                Err(err) => {
                    debug!("attempt failed ({}), retiring connection and retrying", err);
                    self.pool.dispose(conn);
                }
            }
        }
    }

    /// One request/response exchange on one connection.
    async fn exchange(
        &self,
        conn: &mut Connection,
        request: &mut Request,
    ) -> Result<Exchange, Error> {
        let deadline = Instant::now() + self.configuration.serialize_timeout;
        conn.write_request(request, deadline).await?;

        let deadline = Instant::now() + self.configuration.parse_timeout;
        let is_head = request.method == Method::Head;
        let response = conn.read_response(is_head, deadline).await?;

        if let Some(handler) = request.upgrade.as_mut() {
            handler
                .upgrade(&response, &mut conn.stream)
                .await
                .map_err(Error::Upgrade)?;
            let deadline = Instant::now() + self.configuration.close_connection_timeout;
            conn.stream.close(deadline).await?;
            return Ok(Exchange::Upgraded(response));
        }

        Ok(Exchange::Plain(response))
    }
}

enum Exchange {
    Plain(Response),
    Upgraded(Response),
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .finish()
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
