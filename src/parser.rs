//! Reads one HTTP/1.x response from a stream under a deadline.

use std::io;

use bytes::{Buf, BytesMut};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

use crate::error::{Error, Phase};
use crate::message::Response;

const MAX_HEADERS: usize = 64;

/// Parses responses off a connection's stream.
///
/// Reads are buffered; bytes past the end of one response stay in the
/// buffer for the next parse on the same connection.
#[derive(Debug)]
pub struct ResponseParser {
    buf: BytesMut,
    read_size: usize,
}

impl ResponseParser {
    /// Creates a parser that buffers reads in chunks of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> ResponseParser {
        ResponseParser {
            buf: BytesMut::with_capacity(capacity),
            read_size: capacity,
        }
    }

    /// Reads exactly one response from `stream`, completing before
    /// `deadline` or failing with a parse timeout.
    ///
    /// `is_head` tells the parser the request was HEAD, whose responses
    /// carry framing headers but no body.
    pub async fn parse<S>(
        &mut self,
        stream: &mut S,
        is_head: bool,
        deadline: Instant,
    ) -> Result<Response, Error>
    where
        S: AsyncRead + Unpin + Send,
    {
        match timeout_at(deadline, self.parse_inner(stream, is_head)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(Phase::Parse)),
        }
    }

    async fn parse_inner<S>(&mut self, stream: &mut S, is_head: bool) -> Result<Response, Error>
    where
        S: AsyncRead + Unpin + Send,
    {
        let mut response = loop {
            let parsed = {
                let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let mut head = httparse::Response::new(&mut headers);
                match head
                    .parse(&self.buf)
                    .map_err(|err| Error::Protocol(err.to_string()))?
                {
                    httparse::Status::Complete(len) => Some((owned_head(&head)?, len)),
                    httparse::Status::Partial => None,
                }
            };

            match parsed {
                Some((response, len)) => {
                    self.buf.advance(len);
                    break response;
                }
                None => {
                    if self.fill(stream).await? == 0 {
                        return Err(closed_early());
                    }
                }
            }
        };

        trace!("parsed response head: {}", response.status);

        if is_head || !has_body(response.status) {
            return Ok(response);
        }

        if self.is_chunked(&response) {
            response.body = self.read_chunked(stream).await?;
        } else if let Some(value) = response.header("content-length") {
            let length: usize = value
                .trim()
                .parse()
                .map_err(|_| Error::Protocol(format!("bad content-length {:?}", value)))?;
            response.body = self.read_sized(stream, length).await?;
        } else {
            response.body = self.read_until_closed(stream).await?;
        }

        Ok(response)
    }

    fn is_chunked(&self, response: &Response) -> bool {
        response
            .header("transfer-encoding")
            .map(|value| value.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    async fn read_sized<S>(&mut self, stream: &mut S, length: usize) -> Result<Vec<u8>, Error>
    where
        S: AsyncRead + Unpin + Send,
    {
        while self.buf.len() < length {
            if self.fill(stream).await? == 0 {
                return Err(closed_early());
            }
        }
        Ok(self.buf.split_to(length).to_vec())
    }

    async fn read_until_closed<S>(&mut self, stream: &mut S) -> Result<Vec<u8>, Error>
    where
        S: AsyncRead + Unpin + Send,
    {
        while self.fill(stream).await? > 0 {}
        Ok(self.buf.split().to_vec())
    }

    async fn read_chunked<S>(&mut self, stream: &mut S) -> Result<Vec<u8>, Error>
    where
        S: AsyncRead + Unpin + Send,
    {
        let mut body = Vec::new();
        loop {
            let (consumed, size) = loop {
                match httparse::parse_chunk_size(&self.buf) {
                    Ok(httparse::Status::Complete(parsed)) => break parsed,
                    Ok(httparse::Status::Partial) => {
                        if self.fill(stream).await? == 0 {
                            return Err(closed_early());
                        }
                    }
                    Err(_) => return Err(Error::Protocol("bad chunk size".to_string())),
                }
            };
            self.buf.advance(consumed);

            if size == 0 {
                self.read_trailers(stream).await?;
                return Ok(body);
            }

            let size = size as usize;
            while self.buf.len() < size + 2 {
                if self.fill(stream).await? == 0 {
                    return Err(closed_early());
                }
            }
            body.extend_from_slice(&self.buf[..size]);
            if &self.buf[size..size + 2] != b"\r\n" {
                return Err(Error::Protocol("chunk data not CRLF-terminated".to_string()));
            }
            self.buf.advance(size + 2);
        }
    }

    /// Consumes trailer lines after the last chunk, through the blank line.
    async fn read_trailers<S>(&mut self, stream: &mut S) -> Result<(), Error>
    where
        S: AsyncRead + Unpin + Send,
    {
        loop {
            match self.buf.windows(2).position(|pair| pair == b"\r\n") {
                Some(0) => {
                    self.buf.advance(2);
                    return Ok(());
                }
                Some(end) => self.buf.advance(end + 2),
                None => {
                    if self.fill(stream).await? == 0 {
                        return Err(closed_early());
                    }
                }
            }
        }
    }

    async fn fill<S>(&mut self, stream: &mut S) -> Result<usize, Error>
    where
        S: AsyncRead + Unpin + Send,
    {
        self.buf.reserve(self.read_size);
        let n = stream.read_buf(&mut self.buf).await.map_err(Error::Io)?;
        Ok(n)
    }
}

fn owned_head(head: &httparse::Response) -> Result<Response, Error> {
    let status = head
        .code
        .ok_or_else(|| Error::Protocol("missing status code".to_string()))?;
    Ok(Response {
        status,
        reason: head.reason.unwrap_or("").to_string(),
        version: head.version.unwrap_or(1),
        headers: head
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect(),
        body: Vec::new(),
    })
}

/// Whether a response with this status carries a body.
fn has_body(status: u16) -> bool {
    !(status < 200 || status == 204 || status == 304)
}

fn closed_early() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed before a full response",
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    async fn parse_all(raw: &[u8]) -> Result<Response, Error> {
        let mut parser = ResponseParser::with_capacity(4096);
        let mut stream = raw;
        parser.parse(&mut stream, false, soon()).await
    }

    #[tokio::test]
    async fn parses_content_length_body() {
        let response = parse_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.reason(), "OK");
        assert_eq!(response.body(), b"hello");
    }

    #[tokio::test]
    async fn parses_chunked_body_with_trailers() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    5\r\nhello\r\n6\r\n world\r\n0\r\nExpires: never\r\n\r\n";
        let response = parse_all(raw).await.unwrap();
        assert_eq!(response.body(), b"hello world");
    }

    #[tokio::test]
    async fn reads_to_close_without_framing_headers() {
        let response = parse_all(b"HTTP/1.1 200 OK\r\n\r\nuntil the end")
            .await
            .unwrap();
        assert_eq!(response.body(), b"until the end");
    }

    #[tokio::test]
    async fn no_body_for_204_and_switching_protocols() {
        let response = parse_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
        assert_eq!(response.body(), b"");

        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: echo\r\n\r\nraw bytes";
        let mut parser = ResponseParser::with_capacity(4096);
        let mut stream: &[u8] = raw;
        let response = parser.parse(&mut stream, false, soon()).await.unwrap();
        assert_eq!(response.status(), 101);
        assert_eq!(response.body(), b"");
    }

    #[tokio::test]
    async fn head_response_body_is_not_awaited() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";
        let mut parser = ResponseParser::with_capacity(4096);
        let mut stream = raw;
        let response = parser.parse(&mut stream, true, soon()).await.unwrap();
        assert_eq!(response.header("content-length"), Some("100"));
        assert_eq!(response.body(), b"");
    }

    #[tokio::test]
    async fn leftover_bytes_carry_over_to_the_next_parse() {
        let raw: &[u8] =
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\noneHTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo";
        let mut parser = ResponseParser::with_capacity(4096);
        let mut stream = raw;
        let first = parser.parse(&mut stream, false, soon()).await.unwrap();
        assert_eq!(first.body(), b"one");
        let second = parser.parse(&mut stream, false, soon()).await.unwrap();
        assert_eq!(second.body(), b"two");
    }

    #[tokio::test]
    async fn closed_stream_is_a_transport_error() {
        let result = parse_all(b"HTTP/1.1 200 OK\r\nContent-Le").await;
        match result {
            Err(Error::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn garbage_is_a_protocol_error() {
        let result = parse_all(b"NOT HTTP AT ALL\r\n\r\n").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (_keep_open, mut far_end) = tokio::io::duplex(64);
        let mut parser = ResponseParser::with_capacity(4096);
        let deadline = Instant::now() + Duration::from_millis(100);
        let result = parser.parse(&mut far_end, false, deadline).await;
        assert!(matches!(result, Err(Error::Timeout(Phase::Parse))));
    }
}
