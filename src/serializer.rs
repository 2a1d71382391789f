//! Writes one HTTP/1.1 request to a stream under a deadline.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::error::{Error, Phase};
use crate::message::Request;

/// Serializes requests onto a connection's stream.
///
/// The head is staged in a buffer that is reused across requests on the
/// same connection.
#[derive(Debug)]
pub struct RequestSerializer {
    buf: BytesMut,
}

impl RequestSerializer {
    /// Creates a serializer whose staging buffer starts at `capacity`.
    pub fn with_capacity(capacity: usize) -> RequestSerializer {
        RequestSerializer {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Writes `request` to `stream`, completing before `deadline` or
    /// failing with a serialize timeout.
    pub async fn serialize<S>(
        &mut self,
        stream: &mut S,
        request: &Request,
        deadline: Instant,
    ) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send,
    {
        self.stage_head(request);

        let head = &self.buf;
        let write = async {
            stream.write_all(head).await?;
            if !request.body.is_empty() {
                stream.write_all(&request.body).await?;
            }
            stream.flush().await?;
            Ok::<(), io::Error>(())
        };

        match timeout_at(deadline, write).await {
            Ok(result) => result.map_err(Error::Io),
            Err(_) => Err(Error::Timeout(Phase::Serialize)),
        }
    }

    fn stage_head(&mut self, request: &Request) {
        let buf = &mut self.buf;
        buf.clear();

        buf.extend_from_slice(request.method.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(request.target.as_bytes());
        buf.extend_from_slice(b" HTTP/1.1\r\n");

        buf.extend_from_slice(b"Host: ");
        buf.extend_from_slice(request.host.as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(b"User-Agent: ");
        buf.extend_from_slice(request.user_agent.as_bytes());
        buf.extend_from_slice(b"\r\n");

        let mut has_content_length = false;
        for (name, value) in &request.headers {
            // Host and User-Agent are owned by the client.
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("user-agent") {
                continue;
            }
            if name.eq_ignore_ascii_case("content-length") {
                has_content_length = true;
            }
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        if !request.body.is_empty() && !has_content_length {
            buf.extend_from_slice(b"Content-Length: ");
            buf.extend_from_slice(request.body.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(b"\r\n");
    }
}
