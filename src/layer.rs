use crate::flow::{ProducerMembrane, Registration};
use crate::pull::PullToPush;
use crate::{
    AlreadyRegistered, BoxError, CloseReason, Consumer, Engine, EngineError, Options, Producer,
    Protocol, PushProducer, Recv, Role, Sent, TlsTransport, Transport,
};
use pipebuf::PipeBuf;
use rustls::pki_types::CertificateDer;
use tracing::{debug, trace, warn};

/// TLS layered over a [`Transport`], running a [`Protocol`]
///
/// Ciphertext arriving from the transport is passed in through
/// [`TlsLayer::data_received`], and decrypted data is passed on to the
/// protocol.  Data written by the protocol (or by a producer
/// registered by the protocol) is encrypted and written to the
/// transport.  Both directions are pumped until no further progress
/// can be made before each call returns.
///
/// Data written before the handshake completes is held and sent once
/// it does.  Whilst writes are held, any registered producer is
/// paused.  The layer is itself a [`PushProducer`] from the point of
/// view of the transport, and transport backpressure applied through
/// that is combined with the held-writes condition: the registered
/// producer is paused whilst either applies.
///
/// [`TlsTransport::lose_connection`] is converted into a TLS close
/// alert once any producer has unregistered and all held writes have
/// been sent.  A close alert from the peer is answered with one, and
/// then the transport is closed.  The protocol's
/// [`Protocol::connection_lost`] is only called once the transport
/// reports that it has closed, via [`TlsLayer::connection_lost`].
pub struct TlsLayer<T: Transport, P: Protocol> {
    session: Session<T>,
    proto: P,
    // Decrypted data on its way to `proto`
    plaintext: PipeBuf<u8>,
    lost: bool,
}

impl<T: Transport, P: Protocol> TlsLayer<T, P> {
    /// Layer `engine` over `transport`, running `proto`
    pub fn new(engine: impl Engine + 'static, transport: T, proto: P, options: Options) -> Self {
        Self {
            session: Session {
                engine: Box::new(engine),
                transport,
                options,
                incoming: PipeBuf::new(),
                outgoing: PipeBuf::new(),
                pending: PipeBuf::new(),
                membrane: ProducerMembrane::default(),
                reason: None,
                connected: false,
                handshake_done: false,
                disconnecting: false,
                blocked_on_read: false,
                close_sent: false,
                peer_closed: false,
                tls_lost: false,
                transport_closed: false,
            },
            proto,
            plaintext: PipeBuf::new(),
            lost: false,
        }
    }

    /// Create a layer with a fresh engine for `role`
    pub fn with_role(
        role: &Role,
        transport: T,
        proto: P,
        options: Options,
    ) -> Result<Self, rustls::Error> {
        Ok(Self::new(role.engine()?, transport, proto, options))
    }

    /// The transport is connected.  Tells the protocol, and then starts
    /// the handshake.
    pub fn connection_made(&mut self) {
        if self.session.connected {
            return;
        }
        self.session.connected = true;
        self.proto.connection_made(&mut self.session);
        self.pump();
    }

    /// Ciphertext has arrived from the transport
    pub fn data_received(&mut self, data: &[u8]) {
        if self.session.tls_lost || data.is_empty() {
            return;
        }
        self.session.incoming.wr().append(data);
        self.pump();
    }

    /// The transport has closed.  Any plaintext still decryptable is
    /// delivered, and then the protocol is told, exactly once.  A clean
    /// TLS close passes on `reason`.  Otherwise the failure seen by the
    /// engine takes precedence, with end-of-stream without a close
    /// alert reported as [`CloseReason::Lost`].
    pub fn connection_lost(&mut self, reason: CloseReason) {
        if self.lost {
            return;
        }
        self.lost = true;
        self.session.transport_closed = true;
        if !self.session.tls_lost {
            let result = match self.session.engine.feed_eof() {
                Ok(()) => self.process(),
                Err(e) => Err(e.into()),
            };
            if let Err(reason) = result {
                self.session.record(reason);
            }
            self.session.tls_lost = true;
        }
        self.session.teardown();
        let reason = self.session.reason.take().unwrap_or(reason);
        debug!(%reason, "Connection lost");
        self.proto.connection_lost(reason);
    }

    /// Give a registered non-streaming producer the chance to produce
    /// one chunk.  Returns `true` if it was called.  To be called
    /// repeatedly by the scheduler whilst it returns `true`, interleaved
    /// with other work.
    pub fn tick(&mut self) -> bool {
        self.session.tick()
    }

    /// Application protocol
    pub fn protocol(&self) -> &P {
        &self.proto
    }

    /// Application protocol, mutably
    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.proto
    }

    /// Underlying transport
    pub fn underlying(&self) -> &T {
        &self.session.transport
    }

    /// Underlying transport, mutably
    pub fn underlying_mut(&mut self) -> &mut T {
        &mut self.session.transport
    }

    /// Has [`TlsLayer::connection_made`] been called?
    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// Has the TLS handshake completed?
    pub fn is_handshake_complete(&self) -> bool {
        self.session.handshake_done
    }

    /// Is the registered producer currently paused?
    pub fn is_producer_paused(&self) -> bool {
        self.session.membrane.is_paused()
    }

    /// Has [`TlsLayer::connection_lost`] been called?
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    fn pump(&mut self) {
        if let Err(reason) = self.process() {
            self.session.fail(reason);
        }
    }

    /// Move data in all directions until nothing more can be done
    fn process(&mut self) -> Result<(), CloseReason> {
        loop {
            if self.session.tls_lost {
                break;
            }

            // Engine -> transport
            if self.session.engine.wants_write() {
                self.session.flush()?;
                continue;
            }

            if !self.session.handshake_done && !self.session.engine.is_handshaking() {
                self.session.handshake_done = true;
                debug!("TLS handshake complete");
                self.proto.handshake_completed(&mut self.session);
                self.session.shutdown_if_idle()?;
                continue;
            }

            // Held writes -> engine
            if self.session.blocked_on_read && !self.session.engine.is_handshaking() {
                let sent = self.session.unbuffer()?;
                if !self.session.blocked_on_read {
                    self.session.shutdown_if_idle()?;
                }
                if sent > 0 {
                    continue;
                }
            }

            // Transport -> engine
            if self.session.engine.wants_read() && !self.session.incoming.rd().is_empty() {
                let fed = self.session.engine.feed(&mut self.session.incoming.rd());
                if let Err(e) = fed {
                    // Get out any alert the engine queued, but the
                    // engine's error is what counts
                    let _ = self.session.flush();
                    return Err(e.into());
                }
                continue;
            }

            // Engine -> protocol
            if self.deliver()? {
                continue;
            }

            // Nothing left to do
            break;
        }
        Ok(())
    }

    /// Pass one chunk of decrypted data to the protocol, or handle the
    /// end of the TLS stream.  Returns `true` if anything happened.
    fn deliver(&mut self) -> Result<bool, CloseReason> {
        let max = self.session.options.recv_chunk;
        let recv = self.session.engine.recv(&mut self.plaintext.wr(), max)?;
        match recv {
            Recv::Data(_) => {
                let mut rd = self.plaintext.rd();
                let data = rd.data();
                let len = data.len();
                self.proto.data_received(&mut self.session, data);
                rd.consume(len);
                Ok(true)
            }
            Recv::WouldBlock => Ok(false),
            Recv::Closed => {
                debug!("TLS close alert received");
                self.session.peer_closed = true;
                self.session.shutdown_tls()?;
                self.session.finish(None);
                Ok(true)
            }
            Recv::UnexpectedEof if self.session.handshake_done => Err(CloseReason::Lost(
                "Peer closed connection without sending TLS close alert".into(),
            )),
            Recv::UnexpectedEof => Err(EngineError::HandshakeInterrupted.into()),
        }
    }
}

impl<T: Transport, P: Protocol> PushProducer for TlsLayer<T, P> {
    /// Transport wants writes to stop for now
    fn pause_producing(&mut self) {
        self.session.membrane.set_transport_paused(true);
    }

    /// Transport can take more writes
    fn resume_producing(&mut self) {
        self.session.membrane.set_transport_paused(false);
    }

    /// Passed on to the registered producer
    fn stop_producing(&mut self) {
        self.session.membrane.stop();
    }
}

impl<T: Transport, P: Protocol> Consumer for TlsLayer<T, P> {
    fn write(&mut self, data: &[u8]) {
        self.session.write(data);
    }

    fn unregister_producer(&mut self) -> Result<(), BoxError> {
        self.session.unregister_producer()
    }

    fn has_producer(&self) -> bool {
        self.session.has_producer()
    }
}

impl<T: Transport, P: Protocol> TlsTransport for TlsLayer<T, P> {
    fn write_sequence(&mut self, chunks: &[&[u8]]) {
        self.session.write_sequence(chunks);
    }

    fn lose_connection(&mut self) {
        self.session.lose_connection();
    }

    fn register_producer(&mut self, producer: Producer) -> Result<(), AlreadyRegistered> {
        self.session.register_producer(producer)
    }

    fn is_disconnecting(&self) -> bool {
        self.session.is_disconnecting()
    }

    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.session.peer_certificates()
    }

    fn engine(&self) -> &dyn Engine {
        self.session.engine()
    }
}

/// Everything apart from the protocol.  This is what the protocol and
/// producers see as their transport.
struct Session<T: Transport> {
    engine: Box<dyn Engine>,
    transport: T,
    options: Options,
    // Ciphertext from the transport not yet taken by the engine
    incoming: PipeBuf<u8>,
    // Ciphertext on its way to the transport
    outgoing: PipeBuf<u8>,
    // Plaintext not yet taken by the engine
    pending: PipeBuf<u8>,
    membrane: ProducerMembrane,
    reason: Option<CloseReason>,
    connected: bool,
    handshake_done: bool,
    disconnecting: bool,
    blocked_on_read: bool,
    close_sent: bool,
    peer_closed: bool,
    // No more TLS traffic either way: closed cleanly or aborted
    tls_lost: bool,
    // Transport has closed or been told to close
    transport_closed: bool,
}

impl<T: Transport> Session<T> {
    /// Feed held plaintext to the engine, flushing ciphertext after
    /// each chunk.  Stops when everything is taken, or when the engine
    /// stalls with nothing to flush, which means it is waiting for the
    /// peer.  Returns the number of bytes taken.
    fn unbuffer(&mut self) -> Result<usize, CloseReason> {
        let mut total = 0;
        self.blocked_on_read = false;
        loop {
            let sent = {
                let mut rd = self.pending.rd();
                let data = rd.data();
                if data.is_empty() {
                    break;
                }
                let len = data.len().min(self.options.send_chunk);
                let sent = self.engine.send(&data[..len])?;
                if let Sent::Accepted(n) = sent {
                    rd.consume(n);
                }
                sent
            };
            let flushed = self.flush()?;
            match sent {
                Sent::Accepted(n) if n > 0 => total += n,
                _ if flushed > 0 => (),
                _ => {
                    trace!("TLS writes blocked until more data is read");
                    self.blocked_on_read = true;
                    break;
                }
            }
        }
        self.membrane.set_engine_blocked(self.blocked_on_read);
        Ok(total)
    }

    /// Move all ciphertext the engine has ready out to the transport.
    /// Returns the number of bytes written.
    fn flush(&mut self) -> Result<usize, CloseReason> {
        self.engine.drain(&mut self.outgoing.wr())?;
        let mut rd = self.outgoing.rd();
        let len = rd.data().len();
        if len == 0 {
            return Ok(0);
        }
        if self.transport_closed {
            // Nowhere for it to go
            rd.consume(len);
            return Ok(0);
        }
        self.transport
            .write(rd.data())
            .map_err(CloseReason::Transport)?;
        rd.consume(len);
        Ok(len)
    }

    /// Send our close alert.  If the peer has already sent theirs, the
    /// transport can be closed too.
    fn shutdown_tls(&mut self) -> Result<(), CloseReason> {
        if self.tls_lost {
            return Ok(());
        }
        if !self.close_sent {
            self.close_sent = true;
            debug!("Sending TLS close alert");
            self.engine.close();
        }
        self.flush()?;
        if self.peer_closed {
            self.close_transport(false);
        }
        Ok(())
    }

    /// Start the TLS shutdown if `lose_connection` was called and
    /// nothing is holding it up any more.  A close alert can't be sent
    /// in the middle of the handshake, so that waits for it to finish.
    fn shutdown_if_idle(&mut self) -> Result<(), CloseReason> {
        if self.disconnecting
            && self.handshake_done
            && !self.blocked_on_read
            && !self.membrane.is_registered()
        {
            self.shutdown_tls()?;
        }
        Ok(())
    }

    /// TLS traffic is over.  `None` for a clean close, which closes the
    /// transport normally, otherwise the transport is aborted.
    fn finish(&mut self, reason: Option<CloseReason>) {
        let abort = reason.is_some();
        if let Some(reason) = reason {
            self.record(reason);
        }
        self.tls_lost = true;
        self.close_transport(abort);
    }

    /// Abort the connection
    fn fail(&mut self, reason: CloseReason) {
        warn!(%reason, "Aborting TLS connection");
        self.teardown();
        self.finish(Some(reason));
    }

    fn check<R>(&mut self, result: Result<R, CloseReason>) {
        if let Err(reason) = result {
            self.fail(reason);
        }
    }

    /// Drop held writes and stop any producer
    fn teardown(&mut self) {
        self.pending = PipeBuf::new();
        self.blocked_on_read = false;
        if self.membrane.sever() && !self.transport_closed {
            self.transport.unregister_producer();
        }
    }

    fn record(&mut self, reason: CloseReason) {
        if self.reason.is_none() {
            self.reason = Some(reason);
        }
    }

    fn close_transport(&mut self, abort: bool) {
        if self.transport_closed {
            return;
        }
        self.transport_closed = true;
        if abort {
            self.transport.abort_connection();
        } else {
            self.transport.lose_connection();
        }
    }

    fn tick(&mut self) -> bool {
        let Some(mut task) = self.membrane.take_runnable() else {
            return false;
        };
        let pulled = task.step(self);
        self.membrane.restore(task);
        pulled
    }
}

impl<T: Transport> Consumer for Session<T> {
    fn write(&mut self, data: &[u8]) {
        if self.tls_lost || self.close_sent {
            trace!(len = data.len(), "Dropping write to closed TLS connection");
            return;
        }
        if self.disconnecting && !self.membrane.is_registered() {
            trace!(len = data.len(), "Dropping write after lose_connection");
            return;
        }
        if data.is_empty() {
            return;
        }
        // Whilst blocked, writes queue up behind the held data
        self.pending.wr().append(data);
        if !self.blocked_on_read {
            let result = self.unbuffer();
            self.check(result);
        }
    }

    fn unregister_producer(&mut self) -> Result<(), BoxError> {
        let Some(registration) = self.membrane.unregister() else {
            return Ok(());
        };
        if let Registration::Pull(mut task) = registration {
            task.stop_streaming();
        }
        self.transport.unregister_producer();
        let result = self.shutdown_if_idle();
        self.check(result);
        Ok(())
    }

    fn has_producer(&self) -> bool {
        self.membrane.is_registered()
    }
}

impl<T: Transport> TlsTransport for Session<T> {
    fn write_sequence(&mut self, chunks: &[&[u8]]) {
        self.write(&chunks.concat());
    }

    fn lose_connection(&mut self) {
        if self.disconnecting {
            return;
        }
        self.disconnecting = true;
        let result = self.shutdown_if_idle();
        self.check(result);
    }

    fn register_producer(&mut self, producer: Producer) -> Result<(), AlreadyRegistered> {
        if self.tls_lost {
            // Nothing will ever be written, so stop it straight away
            trace!("Stopping producer registered on closed TLS connection");
            match producer {
                Producer::Streaming(mut p) => p.stop_producing(),
                Producer::NonStreaming(mut p) => p.stop_producing(),
            }
            return Ok(());
        }
        if self.membrane.is_registered() {
            return Err(AlreadyRegistered);
        }
        self.transport.register_producer(true)?;
        let registration = match producer {
            Producer::Streaming(p) => Registration::Streaming(p),
            Producer::NonStreaming(p) => {
                let mut task = PullToPush::new(p, self.options.error_sink.clone());
                task.start_streaming();
                Registration::Pull(Box::new(task))
            }
        };
        self.membrane.register(registration)
    }

    fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.engine.peer_certificates()
    }

    fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }
}
