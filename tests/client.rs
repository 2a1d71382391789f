//! End-to-end behavior against real loopback servers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use roost::{
    Client, Configuration, Error, Phase, PoolSize, Request, Response, Transport, UpgradeHandler,
};

/// Reads one request head (through the blank line), returning it as text.
/// Returns `None` once the peer closes without sending one.
async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(String::from_utf8_lossy(&head).into_owned());
        }
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    (listener, url)
}

fn small_pool() -> Configuration {
    Configuration::new().pool_size(PoolSize::new(0, 2))
}

#[tokio::test]
async fn round_trip_stamps_host_and_user_agent() {
    let (listener, url) = bind().await;

    // Echo the request head back as the response body.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = read_head(&mut stream).await.unwrap();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            head.len(),
            head
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    });

    let client = Client::with_configuration(&url, small_pool()).await.unwrap();
    let response = client.send(Request::get("/whoami")).await.unwrap();

    assert_eq!(response.status(), 200);
    let echoed = String::from_utf8(response.into_body()).unwrap();
    assert!(echoed.starts_with("GET /whoami HTTP/1.1\r\n"));
    assert!(echoed.contains(&format!("Host: {}:{}\r\n", client.host(), client.port())));
    assert!(echoed.contains("User-Agent: roost/"));
}

#[tokio::test]
async fn requests_reuse_one_keep_alive_connection() {
    let (listener, url) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));

    let server_accepted = accepted.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            server_accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                while read_head(&mut stream).await.is_some() {
                    stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                        .await
                        .unwrap();
                }
            });
        }
    });

    let client = Client::with_configuration(&url, small_pool()).await.unwrap();
    for _ in 0..3 {
        let response = client.send(Request::get("/")).await.unwrap();
        assert_eq!(response.body(), b"ok");
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    let state = client.pool_state();
    assert_eq!((state.borrowed, state.idle), (0, 1));
}

#[tokio::test]
async fn stale_pooled_connection_is_replaced_transparently() {
    let (listener, url) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));

    // One response per connection, then close: every pooled connection the
    // client holds on to goes stale.
    let server_accepted = accepted.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            server_accepted.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if read_head(&mut stream).await.is_some() {
                    stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                        .await
                        .unwrap();
                }
            });
        }
    });

    let configuration = Configuration::new().pool_size(PoolSize::new(1, 1));
    let client = Client::with_configuration(&url, configuration).await.unwrap();

    let first = client.send(Request::get("/a")).await.unwrap();
    assert_eq!(first.status(), 200);

    // The server has closed the connection we just put back.
    let second = client.send(Request::get("/b")).await.unwrap();
    assert_eq!(second.status(), 200);

    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn borrow_times_out_while_the_pool_is_busy() {
    let (listener, url) = bind().await;

    // Accept, read the request, and never answer.
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let _ = read_head(&mut stream).await;
                tokio::time::sleep(Duration::from_secs(600)).await;
                drop(stream);
            });
        }
    });

    let configuration = Configuration::new()
        .pool_size(PoolSize::new(1, 1))
        .borrow_timeout(Duration::from_millis(100))
        .parse_timeout(Duration::from_secs(30));
    let client = Arc::new(
        Client::with_configuration(&url, configuration)
            .await
            .unwrap(),
    );

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.send(Request::get("/slow")).await })
    };

    // Wait until the first request holds the pool's only connection.
    while client.pool_state().borrowed == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = client.send(Request::get("/blocked")).await.unwrap_err();
    assert!(
        err.is_timeout(Phase::Borrow),
        "expected a borrow timeout, got {:?}",
        err
    );

    let state = client.pool_state();
    assert_eq!((state.borrowed, state.waiting), (1, 0));

    in_flight.abort();
}

struct PingPong {
    ran: Arc<AtomicBool>,
}

#[async_trait]
impl UpgradeHandler for PingPong {
    async fn upgrade(
        &mut self,
        response: &Response,
        stream: &mut Transport,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        assert_eq!(response.status(), 101);
        assert_eq!(response.header("upgrade"), Some("echo"));

        stream.write_all(b"ping").await?;
        stream.flush().await?;
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"ping");

        self.ran.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn upgrade_hands_the_raw_stream_to_the_handler() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_head(&mut stream).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: echo\r\nConnection: Upgrade\r\n\r\n")
            .await
            .unwrap();

        // Echo until the client shuts the stream down.
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });

    let ran = Arc::new(AtomicBool::new(false));
    let client = Client::with_configuration(&url, small_pool()).await.unwrap();
    let request = Request::get("/socket")
        .header("Connection", "Upgrade")
        .header("Upgrade", "echo")
        .on_upgrade(Box::new(PingPong { ran: ran.clone() }));

    let response = client.send(request).await.unwrap();

    assert_eq!(response.status(), 101);
    assert!(ran.load(Ordering::SeqCst));

    // The upgraded connection was retired, not returned.
    let state = client.pool_state();
    assert_eq!((state.borrowed, state.idle), (0, 0));
}

#[tokio::test]
async fn origin_urls_are_validated() {
    match Client::new("ftp://example.com/x").await {
        Err(Error::InvalidScheme(scheme)) => assert_eq!(scheme, "ftp"),
        other => panic!("expected an invalid scheme error, got {:?}", other),
    }

    match Client::new("http:///x").await {
        Err(Error::HostRequired) => {}
        other => panic!("expected a missing host error, got {:?}", other),
    }

    match Client::new("::not a url::").await {
        Err(Error::InvalidUrl(_)) => {}
        other => panic!("expected an invalid URL error, got {:?}", other),
    }
}

#[tokio::test]
async fn ports_default_from_the_scheme() {
    let lazy = Configuration::new().pool_size(PoolSize::new(0, 1));

    let client = Client::with_configuration("http://example.com/x", lazy.clone())
        .await
        .unwrap();
    assert_eq!((client.host(), client.port()), ("example.com", 80));
    assert!(!client.is_secure());

    let client = Client::with_configuration("https://example.com:8443/x", lazy)
        .await
        .unwrap();
    assert_eq!(client.port(), 8443);
    assert!(client.is_secure());
}
