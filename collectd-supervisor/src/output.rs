//! Output sinks that receive a monitor's decoded data.

use collectd_types::{Datapoint, Event};
use tokio::sync::mpsc;

/// Destination for the datapoints and events of one monitor.
///
/// The supervisor only keeps a weak reference to an output. A monitor that
/// drops its output stops receiving data even if it never deregisters.
///
/// Implementations are called while the supervisor's routing lock is held and
/// must not block.
pub trait Output: Send + Sync {
    /// Deliver the datapoints decoded from one write-back request.
    fn send_datapoints(&self, datapoints: Vec<Datapoint>);

    /// Deliver the events decoded from one write-back request.
    fn send_events(&self, events: Vec<Event>);
}

/// A message emitted by a [`ChannelOutput`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMessage {
    Datapoints(Vec<Datapoint>),
    Events(Vec<Event>),
}

/// Forwards everything it receives into a bounded channel.
///
/// Sends are best effort: if the channel is full the batch is dropped rather
/// than blocking the write-back server.
///
/// # Example
///
/// ```rust
/// use collectd_supervisor::{ChannelOutput, Output};
/// use collectd_types::Datapoint;
///
/// let (output, mut rx) = ChannelOutput::new(16);
/// output.send_datapoints(vec![Datapoint::gauge("load.shortterm", 0.1)]);
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    tx: mpsc::Sender<OutputMessage>,
}

impl ChannelOutput {
    /// Create a channel output and return it together with its receiver.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<OutputMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    fn forward(&self, message: OutputMessage) {
        if let Err(e) = self.tx.try_send(message) {
            tracing::warn!(error = %e, "output channel rejected collectd data");
        }
    }
}

impl Output for ChannelOutput {
    fn send_datapoints(&self, datapoints: Vec<Datapoint>) {
        self.forward(OutputMessage::Datapoints(datapoints));
    }

    fn send_events(&self, events: Vec<Event>) {
        self.forward(OutputMessage::Events(events));
    }
}
