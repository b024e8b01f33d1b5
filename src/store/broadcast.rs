use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type EventStream<T> = UnboundedReceiverStream<T>;

/// Per-run push channel. Each subscriber gets its own unbounded queue, so a
/// slow reader never drops events and never blocks the publisher.
pub struct Topic<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    closed: bool,
}

impl<T: Clone> Topic<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            closed: false,
        }
    }

    /// Receive every event published from now on. A closed topic hands out a
    /// stream that ends immediately.
    pub fn subscribe(&mut self) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.closed {
            self.subscribers.push(tx);
        }
        UnboundedReceiverStream::new(rx)
    }

    pub fn publish(&mut self, event: T) {
        if self.closed {
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Drop every sender; streams end once their queued events are read.
    pub fn close(&mut self) {
        self.closed = true;
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Clone> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}
