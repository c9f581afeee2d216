//! Bounded event queue between the executor and the transport.
//!
//! `enqueue` fails fast on a full buffer so the producer decides whether to
//! drop or to block (use `send` to block). After `close` every enqueue is
//! rejected.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue is full")]
    Full,
    #[error("event queue is closed")]
    Closed,
}

/// Producer half of a bounded FIFO.
pub struct EventQueue<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
}

impl<T> EventQueue<T> {
    /// A queue with the given buffer size plus its consumer.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Non-blocking enqueue; fails fast when full or closed.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(QueueError::Closed);
        };
        tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Blocking enqueue; waits for buffer space, fails once closed.
    pub async fn send(&self, item: T) -> Result<(), QueueError> {
        let tx = {
            let guard = self.tx.lock();
            guard.as_ref().cloned()
        };
        let Some(tx) = tx else {
            return Err(QueueError::Closed);
        };
        tx.send(item).await.map_err(|_| QueueError::Closed)
    }

    /// Close the queue; the consumer sees end-of-stream after draining.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}
