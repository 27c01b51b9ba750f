// crates/permgate-core/src/stream.rs
//
// The result/error channel pair used by every streaming operation.
//
// Close semantics:
//   - the producer sends at most one error, and always sends it before the
//     result channel closes;
//   - the result channel is closed when production ends, whether it
//     finished, failed, or was cancelled.
// Consumers that go through `ResultStream::next` see a single ordered
// sequence of `Result<T, PermgateError>` terminated by `None`.

use tokio::sync::{mpsc, oneshot};

use crate::error::PermgateError;

/// Producer half of a streaming operation.
#[derive(Debug)]
pub struct ResultSink<T> {
    results: mpsc::Sender<T>,
    error: oneshot::Sender<PermgateError>,
}

impl<T> ResultSink<T> {
    /// Deliver one item. Returns `false` once the consumer has gone away,
    /// after which the producer should stop.
    pub async fn send(&self, item: T) -> bool {
        self.results.send(item).await.is_ok()
    }

    /// Whether the consumer has dropped its half.
    pub fn is_closed(&self) -> bool {
        self.results.is_closed()
    }

    /// Deliver the terminal error and close the result channel.
    pub fn fail(self, err: PermgateError) {
        let ResultSink { results, error } = self;
        // The consumer may already be gone; nothing to report then.
        let _ = error.send(err);
        drop(results);
    }

    /// Close the result channel without an error.
    pub fn finish(self) {
        drop(self);
    }
}

/// Consumer half of a streaming operation.
#[derive(Debug)]
pub struct ResultStream<T> {
    results: mpsc::Receiver<T>,
    error: oneshot::Receiver<PermgateError>,
    finished: bool,
}

impl<T> ResultStream<T> {
    /// Create a connected sink/stream pair whose result channel buffers
    /// up to `capacity` items.
    pub fn channel(capacity: usize) -> (ResultSink<T>, ResultStream<T>) {
        let (results_tx, results_rx) = mpsc::channel(capacity.max(1));
        let (error_tx, error_rx) = oneshot::channel();
        (
            ResultSink {
                results: results_tx,
                error: error_tx,
            },
            ResultStream {
                results: results_rx,
                error: error_rx,
                finished: false,
            },
        )
    }

    /// A stream that fails immediately with `err` and yields no items.
    pub fn failed(err: PermgateError) -> Self {
        let (sink, stream) = Self::channel(1);
        sink.fail(err);
        stream
    }

    /// Next item, or the terminal error once every item the producer sent
    /// before failing has been delivered.
    pub async fn next(&mut self) -> Option<Result<T, PermgateError>> {
        if self.finished {
            return None;
        }
        match self.results.recv().await {
            Some(item) => Some(Ok(item)),
            None => {
                // `fail` sets the error before it drops the result sender.
                self.finished = true;
                self.error.try_recv().ok().map(Err)
            }
        }
    }

    /// Drain the whole stream, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<T>, PermgateError> {
        let mut items = Vec::new();
        while let Some(next) = self.next().await {
            items.push(next?);
        }
        Ok(items)
    }
}
