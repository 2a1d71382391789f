//! A pooled HTTP/1.x client for a single origin.
//!
//! Opening a new connection for every request is both slow and, under
//! load, a good way to exhaust sockets. `roost` keeps a bounded pool of
//! persistent connections to one origin (scheme, host, port) and reuses
//! them across requests: connections are handed out most-recently-used
//! first, the pool grows lazily up to its upper bound, and callers beyond
//! the bound wait for a connection to come back, up to a deadline.
//!
//! A connection that fails mid-request is quietly retired and the request
//! retried on a fresh one, which transparently absorbs the common case of
//! a pooled socket the server closed between uses. Protocol upgrades
//! (e.g. WebSocket handshakes) are supported by handing the raw byte
//! stream to a caller-supplied handler after the `101` response.
//!
//! # Example
//!
//! ```no_run
//! use roost::{Client, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), roost::Error> {
//!     let client = Client::new("http://example.com").await?;
//!     let response = client.send(Request::get("/")).await?;
//!     println!("{} {}", response.status(), response.reason());
//!     Ok(())
//! }
//! ```
//!
//! The pool itself is generic: implement [`ManageConnection`] and
//! [`Pool`] will manage any connection-like resource with the same
//! borrow / put back / dispose lifecycle.
#![deny(missing_docs, missing_debug_implementations)]

mod client;
mod config;
mod conn;
mod error;
mod message;
mod parser;
mod pool;
mod serializer;
mod transport;

pub use crate::client::Client;
pub use crate::config::Configuration;
pub use crate::error::{Error, Phase};
pub use crate::message::{Method, Request, Response, UpgradeHandler};
pub use crate::parser::ResponseParser;
pub use crate::pool::{BorrowError, ManageConnection, Pool, PoolSize, State};
pub use crate::serializer::RequestSerializer;
pub use crate::transport::Transport;
