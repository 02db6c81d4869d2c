//! TLS layered over any byte-stream transport, using [**Rustls**]
//!
//! A [`TlsLayer`] sits between a transport that moves ciphertext and
//! an application [`Protocol`] that sees plaintext.  The layer never
//! touches a socket.  The transport's driver passes in connection
//! events and received bytes, and the layer writes encrypted bytes
//! back out through the [`Transport`] trait.  Everything happens on
//! the caller's thread, and each call pumps data in all directions
//! until no further progress can be made, so there is no buffered
//! data left waiting for some later call to move it.
//!
//! Internally ciphertext and plaintext are held in [`PipeBuf`]
//! buffers, and the TLS state machine is the buffered **Rustls**
//! connection, behind the [`Engine`] trait.
//!
//! # Flow control
//!
//! The application may register one producer with the layer, either
//! streaming ([`PushProducer`]) or non-streaming ([`PullProducer`]).
//! The producer is paused whilst the transport applies backpressure to
//! the layer, and also whilst TLS writes are blocked waiting for data
//! from the peer, for example during the handshake.  It is resumed
//! once neither condition applies.  A non-streaming producer is driven
//! by a [`PullToPush`] adapter, one chunk per call to
//! [`TlsLayer::tick`].
//!
//! # Shutdown
//!
//! [`TlsTransport::lose_connection`] waits for any producer to
//! unregister and for all data written so far to reach the engine,
//! then sends a TLS close alert.  The transport is closed when the
//! peer answers with its own close alert.  Failures abort the
//! transport and are reported to the protocol through
//! [`CloseReason`].
//!
//! # Selecting [**Rustls**] crate features
//!
//! This crate brings in [**Rustls**] with only `std` enabled.  This
//! means that you need to include the same version of [**Rustls**] in
//! your own dependencies in order to select the crypto provider:
//!
//! ```ignore
//! [dependencies]
//! tlslayer = "0.1"
//! rustls = { version = "0.23", features = ["ring"] }
//! ```
//!
//! **Rustls** is re-exported as `tlslayer::rustls`.
//!
//! [`PipeBuf`]: https://crates.io/crates/pipebuf
//! [**Rustls**]: https://crates.io/crates/rustls

#![forbid(unsafe_code)]

pub use rustls;

mod config;
mod engine;
mod error;
mod flow;
mod layer;
mod pull;
mod transport;

pub use config::{Options, Role};
pub use engine::{Engine, Recv, RustlsEngine, Sent};
pub use error::{AlreadyRegistered, BoxError, CloseReason, EngineError, ErrorSink, LogSink};
pub use flow::{Producer, ProducerSlot, PullProducer, PushProducer};
pub use layer::TlsLayer;
pub use pull::{PullToPush, TaskState};
pub use transport::{Consumer, Protocol, TlsTransport, Transport};
