//! The duplex byte stream under a connection: plain TCP or TLS over TCP.

use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use log::trace;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout_at, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Phase};

/// The transport under one pooled connection.
///
/// Implements [`AsyncRead`] and [`AsyncWrite`]; upgrade handlers receive a
/// mutable borrow of this to speak the post-upgrade protocol directly.
pub enum Transport {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Gracefully shuts the stream down, bounded by `deadline`.
    ///
    /// For TLS this sends a close-notify before closing the socket.
    pub async fn close(&mut self, deadline: Instant) -> Result<(), Error> {
        match timeout_at(deadline, self.shutdown()).await {
            Ok(result) => result.map_err(Error::Io),
            Err(_) => Err(Error::Timeout(Phase::Close)),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Transport::Plain(_) => f.debug_tuple("Plain").finish(),
            Transport::Tls(_) => f.debug_tuple("Tls").finish(),
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Transport::Plain(inner) => Pin::new(inner).poll_read(cx, buf),
            Transport::Tls(inner) => Pin::new(inner).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Transport::Plain(inner) => Pin::new(inner).poll_write(cx, buf),
            Transport::Tls(inner) => Pin::new(inner).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Transport::Plain(inner) => Pin::new(inner).poll_flush(cx),
            Transport::Tls(inner) => Pin::new(inner).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Transport::Plain(inner) => Pin::new(inner).poll_shutdown(cx),
            Transport::Tls(inner) => Pin::new(inner).poll_shutdown(cx),
        }
    }
}

/// Resolves the origin and opens a transport to it.
///
/// Resolution runs under `resolve_deadline`; the TCP connect and, when a
/// TLS connector is given, the handshake both run under `connect_deadline`.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    tls: Option<&TlsConnector>,
    resolve_deadline: Instant,
    connect_deadline: Instant,
) -> Result<Transport, Error> {
    trace!("resolving {}:{}", host, port);
    let addrs: Vec<SocketAddr> = match timeout_at(resolve_deadline, lookup_host((host, port))).await
    {
        Ok(resolved) => resolved.map_err(Error::Io)?.collect(),
        Err(_) => return Err(Error::Timeout(Phase::Resolve)),
    };
    if addrs.is_empty() {
        return Err(Error::AddressNotFound);
    }

    let tcp = match timeout_at(connect_deadline, connect_each(host, &addrs)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::Timeout(Phase::Connect)),
    };

    match tls {
        Some(connector) => {
            let name = rustls::pki_types::ServerName::try_from(host.to_string())
                .map_err(Error::Tls)?;
            let stream = match timeout_at(connect_deadline, connector.connect(name, tcp)).await {
                Ok(result) => result.map_err(Error::Io)?,
                Err(_) => return Err(Error::Timeout(Phase::Connect)),
            };
            Ok(Transport::Tls(Box::new(stream)))
        }
        None => Ok(Transport::Plain(tcp)),
    }
}

/// Tries each resolved address in order, returning the first stream that
/// connects or the last error encountered.
async fn connect_each(host: &str, addrs: &[SocketAddr]) -> Result<TcpStream, Error> {
    let mut last = None;
    for addr in addrs {
        trace!("connecting to {} for {}", addr, host);
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => last = Some(err),
        }
    }
    Err(last.map(Error::Io).unwrap_or(Error::AddressNotFound))
}
