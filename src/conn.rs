//! A reusable HTTP session: the transport plus its bound serializer and
//! parser, and the factory that opens one.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

use crate::error::Error;
use crate::message::{Request, Response};
use crate::parser::ResponseParser;
use crate::pool::ManageConnection;
use crate::serializer::RequestSerializer;
use crate::transport::{self, Transport};

/// One reusable session with the origin, good for a single request and
/// response at a time.
///
/// Dropping a connection closes its transport.
pub struct Connection {
    pub(crate) stream: Transport,
    serializer: RequestSerializer,
    parser: ResponseParser,
}

impl Connection {
    pub(crate) fn new(
        stream: Transport,
        serializer: RequestSerializer,
        parser: ResponseParser,
    ) -> Connection {
        Connection {
            stream,
            serializer,
            parser,
        }
    }

    pub(crate) async fn write_request(
        &mut self,
        request: &Request,
        deadline: Instant,
    ) -> Result<(), Error> {
        self.serializer
            .serialize(&mut self.stream, request, deadline)
            .await
    }

    pub(crate) async fn read_response(
        &mut self,
        is_head: bool,
        deadline: Instant,
    ) -> Result<Response, Error> {
        self.parser.parse(&mut self.stream, is_head, deadline).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .finish()
    }
}

/// Opens connections to one origin with the configured deadlines and
/// buffer sizes.
pub(crate) struct Manager {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls: Option<TlsConnector>,
    pub(crate) address_resolution_timeout: Duration,
    pub(crate) connection_timeout: Duration,
    pub(crate) serializer_buffer_size: usize,
    pub(crate) parser_buffer_size: usize,
}

#[async_trait]
impl ManageConnection for Manager {
    type Connection = Connection;
    type Error = Error;

    async fn connect(&self) -> Result<Connection, Error> {
        debug!("opening connection to {}:{}", self.host, self.port);
        let resolve_deadline = Instant::now() + self.address_resolution_timeout;
        let connect_deadline = Instant::now() + self.connection_timeout;
        let stream = transport::connect(
            &self.host,
            self.port,
            self.tls.as_ref(),
            resolve_deadline,
            connect_deadline,
        )
        .await?;

        Ok(Connection::new(
            stream,
            RequestSerializer::with_capacity(self.serializer_buffer_size),
            ResponseParser::with_capacity(self.parser_buffer_size),
        ))
    }
}
