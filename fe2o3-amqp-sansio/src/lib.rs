#![deny(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A sans-io implementation of the AMQP 1.0 connection layer
//!
//! The [`Connection`] performs the protocol header exchange and the OPEN/CLOSE handshake on top
//! of any [`Transport`](transport::Transport), and multiplexes [`Endpoint`]s over channels. It
//! never blocks and owns no thread: the application calls [`Connection::do_work`] from its own
//! event loop.
//!
//! # Feature flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `"tracing"` | enables logging with `tracing` |
//! | `"log"` | enables logging with `log` |
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//!
//! use fe2o3_amqp_sansio::{transport::StreamTransport, Builder, ConnectionState};
//!
//! let stream = TcpStream::connect("localhost:5672").unwrap();
//! stream.set_nonblocking(true).unwrap();
//!
//! let mut connection = Builder::new()
//!     .container_id("connection-1")
//!     .hostname("localhost")
//!     .build(StreamTransport::new(stream))
//!     .unwrap();
//!
//! while connection.state() != ConnectionState::Opened {
//!     connection.do_work();
//!     if connection.state() == ConnectionState::End {
//!         panic!("connection failed to open");
//!     }
//! }
//!
//! connection.close(None).unwrap();
//! while connection.state() != ConnectionState::End {
//!     connection.do_work();
//! }
//! ```

pub mod connection;
pub mod endpoint;
pub mod frames;
pub mod protocol_header;
pub mod states;
pub mod tick_counter;
pub mod transport;

pub use connection::{Builder, Connection, ConnectionEvent};
pub use endpoint::{Endpoint, EndpointHandler};
pub use states::ConnectionState;
