use crate::pull::{PullToPush, TaskState};
use crate::{AlreadyRegistered, BoxError, Consumer};

/// Push-style producer, controlled by its consumer
pub trait PushProducer {
    /// Stop producing data until resumed
    fn pause_producing(&mut self);

    /// Start producing data again
    fn resume_producing(&mut self);

    /// Stop producing data for good
    fn stop_producing(&mut self);
}

/// Pull-style producer, which writes one chunk to its consumer per
/// call to `resume_producing`.  It signals that it has finished by
/// unregistering itself from the consumer.
pub trait PullProducer {
    /// Produce the next chunk
    fn resume_producing(&mut self, consumer: &mut dyn Consumer) -> Result<(), BoxError>;

    /// Stop producing data for good
    fn stop_producing(&mut self);
}

/// Producer offered for registration with a transport
pub enum Producer {
    Streaming(Box<dyn PushProducer>),
    NonStreaming(Box<dyn PullProducer>),
}

impl Producer {
    /// Wrap a push-style producer
    pub fn streaming(producer: impl PushProducer + 'static) -> Self {
        Self::Streaming(Box::new(producer))
    }

    /// Wrap a pull-style producer
    pub fn non_streaming(producer: impl PullProducer + 'static) -> Self {
        Self::NonStreaming(Box::new(producer))
    }

    /// Is this a push-style producer?
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }
}

/// Slot holding at most one registered producer
#[derive(Debug)]
pub struct ProducerSlot<P>(Option<P>);

impl<P> Default for ProducerSlot<P> {
    fn default() -> Self {
        Self(None)
    }
}

impl<P> ProducerSlot<P> {
    /// Take the slot.  Fails and leaves the current occupant in place
    /// if the slot is already taken.
    pub fn claim(&mut self, producer: P) -> Result<(), AlreadyRegistered> {
        if self.0.is_some() {
            return Err(AlreadyRegistered);
        }
        self.0 = Some(producer);
        Ok(())
    }

    /// Empty the slot, returning the occupant
    pub fn release(&mut self) -> Option<P> {
        self.0.take()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.is_some()
    }

    pub fn get_mut(&mut self) -> Option<&mut P> {
        self.0.as_mut()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Control {
    Pause,
    Resume,
    Stop,
}

fn apply(producer: &mut dyn PushProducer, control: Control) {
    match control {
        Control::Pause => producer.pause_producing(),
        Control::Resume => producer.resume_producing(),
        Control::Stop => producer.stop_producing(),
    }
}

/// Producer registered with the layer
pub(crate) enum Registration {
    Streaming(Box<dyn PushProducer>),
    Pull(Box<PullToPush>),
    /// Pull task is out of the slot running a step
    Stepping,
}

impl Registration {
    /// Stop the producer when the connection goes away under it
    pub(crate) fn sever(self) {
        match self {
            Self::Streaming(mut p) => p.stop_producing(),
            Self::Pull(mut t) => t.stop_producing(),
            Self::Stepping => (),
        }
    }
}

/// Presents a single push-producer control surface to the transport
/// side, combining transport backpressure with the engine's
/// write-blocked-on-read condition.  The registered producer sees one
/// pause per transition into the paused state, and one resume per
/// transition out.
#[derive(Default)]
pub(crate) struct ProducerMembrane {
    slot: ProducerSlot<Registration>,
    transport_paused: bool,
    engine_blocked: bool,
    producer_paused: bool,
    // Controls that arrived while the pull task was stepping
    deferred: Vec<Control>,
}

impl ProducerMembrane {
    pub fn is_registered(&self) -> bool {
        self.slot.is_claimed()
    }

    pub fn is_paused(&self) -> bool {
        self.producer_paused
    }

    pub fn register(&mut self, registration: Registration) -> Result<(), AlreadyRegistered> {
        self.slot.claim(registration)?;
        self.producer_paused = false;
        self.update();
        Ok(())
    }

    pub fn unregister(&mut self) -> Option<Registration> {
        self.producer_paused = false;
        self.slot.release()
    }

    /// Like `unregister`, but also stops the producer
    pub fn sever(&mut self) -> bool {
        if let Some(Registration::Stepping) = self.slot.get_mut() {
            self.deferred.push(Control::Stop);
        }
        match self.unregister() {
            Some(registration) => {
                registration.sever();
                true
            }
            None => false,
        }
    }

    pub fn set_transport_paused(&mut self, paused: bool) {
        self.transport_paused = paused;
        self.update();
    }

    pub fn set_engine_blocked(&mut self, blocked: bool) {
        self.engine_blocked = blocked;
        self.update();
    }

    pub fn stop(&mut self) {
        self.control(Control::Stop);
    }

    fn update(&mut self) {
        let paused = self.transport_paused || self.engine_blocked;
        if !self.slot.is_claimed() || paused == self.producer_paused {
            return;
        }
        self.producer_paused = paused;
        self.control(if paused {
            Control::Pause
        } else {
            Control::Resume
        });
    }

    fn control(&mut self, control: Control) {
        match self.slot.get_mut() {
            Some(Registration::Streaming(p)) => apply(p.as_mut(), control),
            Some(Registration::Pull(t)) => apply(t.as_mut(), control),
            Some(Registration::Stepping) => self.deferred.push(control),
            None => (),
        }
    }

    /// Take out the pull task if it is ready to run a step.  It must be
    /// handed back with `restore`.
    pub fn take_runnable(&mut self) -> Option<Box<PullToPush>> {
        let registration = self.slot.get_mut()?;
        match &*registration {
            Registration::Pull(task) if task.state() == TaskState::Running => (),
            _ => return None,
        }
        match std::mem::replace(registration, Registration::Stepping) {
            Registration::Pull(task) => Some(task),
            other => {
                *registration = other;
                None
            }
        }
    }

    /// Return a pull task after its step, applying anything that
    /// happened meanwhile.  If it was unregistered during the step it
    /// is finished off and dropped.
    pub fn restore(&mut self, mut task: Box<PullToPush>) {
        let deferred = std::mem::take(&mut self.deferred);
        if let Some(registration) = self.slot.get_mut() {
            if matches!(*registration, Registration::Stepping) {
                for control in deferred {
                    apply(task.as_mut(), control);
                }
                *registration = Registration::Pull(task);
                return;
            }
        }
        if deferred.contains(&Control::Stop) {
            task.stop_producing();
        } else {
            task.stop_streaming();
        }
    }
}
