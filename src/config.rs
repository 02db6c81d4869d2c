use crate::{ErrorSink, LogSink, RustlsEngine};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use std::rc::Rc;
use std::sync::Arc;

/// Tuning and collaborators for a [`TlsLayer`]
///
/// [`TlsLayer`]: crate::TlsLayer
#[derive(Clone)]
pub struct Options {
    /// Largest chunk of plaintext offered to the engine in one go.
    /// The default is one maximum-sized TLS record.
    pub send_chunk: usize,

    /// Largest chunk of plaintext read from the engine in one go
    pub recv_chunk: usize,

    /// Where producer faults are reported
    pub error_sink: Rc<dyn ErrorSink>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            send_chunk: 16 * 1024,
            recv_chunk: 32 * 1024,
            error_sink: Rc::new(LogSink),
        }
    }
}

impl Options {
    /// Replace the error sink
    pub fn with_error_sink(mut self, sink: Rc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }
}

/// Which end of the TLS connection to play, and with what identity.
/// One `Role` can be used to create any number of connections.
#[derive(Clone)]
pub enum Role {
    /// Client connecting to the named server
    Client(Arc<ClientConfig>, ServerName<'static>),
    /// Server with its certificate configuration
    Server(Arc<ServerConfig>),
}

impl Role {
    /// Is this the client end?
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(..))
    }

    /// Create a fresh engine for a new connection
    pub fn engine(&self) -> Result<RustlsEngine, rustls::Error> {
        match self {
            Self::Client(config, name) => RustlsEngine::client(config.clone(), name.clone()),
            Self::Server(config) => RustlsEngine::server(config.clone()),
        }
    }
}
