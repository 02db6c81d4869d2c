use crate::{Consumer, ErrorSink, PullProducer, PushProducer};
use std::rc::Rc;

/// State of a [`PullToPush`] task
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Not started yet
    Idle,
    /// Pulls on every step
    Running,
    /// Paused by the consumer; steps do nothing
    Paused,
    /// Done, stopped or failed.  Final.
    Finished,
}

/// Adapts a [`PullProducer`] into a [`PushProducer`]
///
/// Each call to [`PullToPush::step`] pulls one chunk from the wrapped
/// producer into the consumer, so the surrounding scheduler gets
/// control back between chunks and a pause takes effect before the
/// next pull.  The producer finishes by unregistering itself from the
/// consumer.  If it fails instead, the error goes to the
/// [`ErrorSink`], the producer is unregistered from the consumer, and
/// streaming stops.  Nothing is propagated to the consumer.
pub struct PullToPush {
    producer: Box<dyn PullProducer>,
    sink: Rc<dyn ErrorSink>,
    started: bool,
    finished: bool,
    pause_count: u32,
}

impl PullToPush {
    /// Wrap `producer`, reporting its faults to `sink`.  Idle until
    /// [`PullToPush::start_streaming`] is called.
    pub fn new(producer: Box<dyn PullProducer>, sink: Rc<dyn ErrorSink>) -> Self {
        Self {
            producer,
            sink,
            started: false,
            finished: false,
            pause_count: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        if self.finished {
            TaskState::Finished
        } else if !self.started {
            TaskState::Idle
        } else if self.pause_count > 0 {
            TaskState::Paused
        } else {
            TaskState::Running
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of outstanding pauses
    pub fn pause_count(&self) -> u32 {
        self.pause_count
    }

    /// Begin pulling on subsequent steps
    pub fn start_streaming(&mut self) {
        self.started = true;
    }

    /// Stop pulling for good.  Does not stop the wrapped producer.
    /// Calling this again has no effect.
    pub fn stop_streaming(&mut self) {
        self.finished = true;
    }

    /// Run one iteration: pull once if running.  Returns `true` if the
    /// producer was called.
    pub fn step(&mut self, consumer: &mut dyn Consumer) -> bool {
        if self.state() != TaskState::Running {
            return false;
        }
        match self.producer.resume_producing(consumer) {
            Ok(()) => {
                if !consumer.has_producer() {
                    // Producer unregistered itself: all done
                    self.finished = true;
                }
            }
            Err(e) => {
                self.sink
                    .report(&*e, "Pull producer failed, producing will be stopped");
                if let Err(e) = consumer.unregister_producer() {
                    self.sink
                        .report(&*e, "Consumer failed to unregister producer");
                }
                self.finished = true;
            }
        }
        true
    }
}

impl PushProducer for PullToPush {
    fn pause_producing(&mut self) {
        self.pause_count += 1;
    }

    fn resume_producing(&mut self) {
        self.pause_count = self.pause_count.saturating_sub(1);
    }

    fn stop_producing(&mut self) {
        if !self.finished {
            self.stop_streaming();
            self.producer.stop_producing();
        }
    }
}
