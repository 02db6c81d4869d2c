use crate::{AlreadyRegistered, BoxError, CloseReason, Engine, Producer};
use rustls::pki_types::CertificateDer;
use std::io;

/// Underlying byte-stream transport that carries the ciphertext
///
/// The transport's driver feeds events back into the layer:
/// [`TlsLayer::data_received`] for incoming bytes,
/// [`TlsLayer::connection_lost`] once it has closed, and the layer's
/// [`PushProducer`] methods to apply write backpressure after
/// [`Transport::register_producer`] has been called.
///
/// [`TlsLayer::data_received`]: crate::TlsLayer::data_received
/// [`TlsLayer::connection_lost`]: crate::TlsLayer::connection_lost
/// [`PushProducer`]: crate::PushProducer
pub trait Transport {
    /// Queue bytes for sending
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Queue several chunks for sending, in order
    fn write_sequence(&mut self, chunks: &[&[u8]]) -> io::Result<()> {
        for chunk in chunks {
            self.write(chunk)?;
        }
        Ok(())
    }

    /// Close once all queued bytes have been sent
    fn lose_connection(&mut self);

    /// Close immediately.  Defaults to [`Transport::lose_connection`].
    fn abort_connection(&mut self) {
        self.lose_connection();
    }

    /// The layer has a producer, and wants to be paused and resumed
    /// according to the transport's write pressure
    fn register_producer(&mut self, streaming: bool) -> Result<(), AlreadyRegistered>;

    /// The layer no longer has a producer
    fn unregister_producer(&mut self);
}

/// Sink for a producer's data
pub trait Consumer {
    /// Write plaintext
    fn write(&mut self, data: &[u8]);

    /// Remove the registered producer, if any
    fn unregister_producer(&mut self) -> Result<(), BoxError>;

    /// Is a producer currently registered?
    fn has_producer(&self) -> bool;
}

/// Secure transport presented to the application [`Protocol`]
pub trait TlsTransport: Consumer {
    /// Write the concatenation of `chunks`
    fn write_sequence(&mut self, chunks: &[&[u8]]);

    /// Close with a TLS close alert once everything written so far has
    /// been sent and any registered producer has unregistered.
    /// Repeated calls have no further effect.
    fn lose_connection(&mut self);

    /// Register the single producer feeding this transport.  If the
    /// connection has already been lost, the producer is stopped
    /// instead of being registered.
    fn register_producer(&mut self, producer: Producer) -> Result<(), AlreadyRegistered>;

    /// Has `lose_connection` been called?
    fn is_disconnecting(&self) -> bool;

    /// Certificate chain presented by the peer, once the handshake has
    /// got that far
    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]>;

    /// TLS engine handle, for diagnostics and identity queries
    fn engine(&self) -> &dyn Engine;
}

/// Application protocol running over a [`TlsTransport`]
pub trait Protocol {
    /// The layer is attached to a connected transport.  Writes made
    /// here are held until the handshake completes.
    fn connection_made(&mut self, _transport: &mut dyn TlsTransport) {}

    /// The TLS handshake has completed.  Called at most once.
    fn handshake_completed(&mut self, _transport: &mut dyn TlsTransport) {}

    /// Decrypted bytes have arrived.  `data` is never empty.
    fn data_received(&mut self, transport: &mut dyn TlsTransport, data: &[u8]);

    /// The underlying transport has closed.  Called exactly once.
    fn connection_lost(&mut self, reason: CloseReason);
}
