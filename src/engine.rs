use crate::EngineError;
use pipebuf::{PBufRd, PBufWr};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

/// Outcome of offering plaintext to the engine
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    /// This many bytes (always more than zero) were taken
    Accepted(usize),
    /// Nothing can be taken until the engine has flushed output or
    /// received more input from the peer
    Stalled,
}

/// Outcome of asking the engine for plaintext
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recv {
    /// This many bytes (always more than zero) were appended
    Data(usize),
    /// Nothing decryptable from the ciphertext received so far
    WouldBlock,
    /// Peer sent its close alert and all plaintext has been read
    Closed,
    /// Ciphertext stream ended without a close alert
    UnexpectedEof,
}

/// In-memory TLS engine contract
///
/// The engine never touches a socket: ciphertext is fed in and
/// drained out through buffers, and the same goes for plaintext.
/// [`RustlsEngine`] is the implementation normally used.
pub trait Engine {
    /// Is the handshake still in progress?
    fn is_handshaking(&self) -> bool;

    /// Does the engine want more ciphertext?
    fn wants_read(&self) -> bool;

    /// Does the engine have ciphertext ready to send?
    fn wants_write(&self) -> bool;

    /// Take ciphertext from `ciphertext` and process it
    fn feed(&mut self, ciphertext: &mut PBufRd<'_, u8>) -> Result<(), EngineError>;

    /// Indicate that the ciphertext stream has ended
    fn feed_eof(&mut self) -> Result<(), EngineError>;

    /// Move all pending ciphertext into `out`, returning the number of
    /// bytes moved
    fn drain(&mut self, out: &mut PBufWr<'_, u8>) -> Result<usize, EngineError>;

    /// Offer plaintext for encryption
    fn send(&mut self, plaintext: &[u8]) -> Result<Sent, EngineError>;

    /// Append up to `max` bytes of decrypted plaintext to `out`
    fn recv(&mut self, out: &mut PBufWr<'_, u8>, max: usize) -> Result<Recv, EngineError>;

    /// Queue a close alert
    fn close(&mut self);

    /// Certificate chain presented by the peer, once known
    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]>;

    /// Live **Rustls** connection behind this engine, if any
    fn connection(&self) -> Option<&Connection> {
        None
    }
}

/// [`Engine`] over a buffered [**Rustls**] client or server
/// connection
///
/// [**Rustls**]: https://crates.io/crates/rustls
pub struct RustlsEngine {
    conn: Connection,
}

impl RustlsEngine {
    /// Create a client engine for the given server name
    pub fn client(
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
    ) -> Result<Self, rustls::Error> {
        Ok(Self {
            conn: ClientConnection::new(config, name)?.into(),
        })
    }

    /// Create a server engine
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, rustls::Error> {
        Ok(Self {
            conn: ServerConnection::new(config)?.into(),
        })
    }
}

impl From<Connection> for RustlsEngine {
    fn from(conn: Connection) -> Self {
        Self { conn }
    }
}

impl Engine for RustlsEngine {
    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn wants_read(&self) -> bool {
        self.conn.wants_read()
    }

    fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    fn feed(&mut self, ciphertext: &mut PBufRd<'_, u8>) -> Result<(), EngineError> {
        // The PipeBuf Read implementation doesn't return an error if
        // there are bytes.  Rustls may fail if its buffer is full, but
        // we are only called when it wants more data.
        self.conn.read_tls(ciphertext)?;
        self.process()
    }

    fn feed_eof(&mut self) -> Result<(), EngineError> {
        // A zero-length read is how Rustls learns of end-of-file
        self.conn.read_tls(&mut io::empty())?;
        self.process()
    }

    fn drain(&mut self, out: &mut PBufWr<'_, u8>) -> Result<usize, EngineError> {
        // PipeBuf Write implementation doesn't return Err, and
        // `write_tls` is just copying from an internal Rustls buffer
        let mut total = 0;
        while self.conn.wants_write() {
            total += self.conn.write_tls(out)?;
        }
        Ok(total)
    }

    fn send(&mut self, plaintext: &[u8]) -> Result<Sent, EngineError> {
        // Until the handshake is done, writes wait on reads.  Rustls
        // would buffer some of it, but then the stall would only show
        // up once its buffer filled.
        if self.conn.is_handshaking() {
            return Ok(Sent::Stalled);
        }
        match self.conn.writer().write(plaintext)? {
            0 => Ok(Sent::Stalled),
            n => Ok(Sent::Accepted(n)),
        }
    }

    fn recv(&mut self, out: &mut PBufWr<'_, u8>, max: usize) -> Result<Recv, EngineError> {
        let space = out.space(max);
        match self.conn.reader().read(space) {
            Ok(0) => Ok(Recv::Closed),
            Ok(len) => {
                out.commit(len);
                Ok(Recv::Data(len))
            }
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock => Ok(Recv::WouldBlock),
                ErrorKind::UnexpectedEof => Ok(Recv::UnexpectedEof),
                _ => Err(EngineError::Io(e)),
            },
        }
    }

    fn close(&mut self) {
        self.conn.send_close_notify();
    }

    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.conn.peer_certificates()
    }

    fn connection(&self) -> Option<&Connection> {
        Some(&self.conn)
    }
}

impl RustlsEngine {
    fn process(&mut self) -> Result<(), EngineError> {
        let handshaking = self.conn.is_handshaking();
        match self.conn.process_new_packets() {
            Ok(_) => Ok(()),
            Err(e) if handshaking => Err(EngineError::Handshake(e)),
            Err(e) => Err(EngineError::Protocol(e)),
        }
    }
}
