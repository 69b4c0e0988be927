use crate::store::LogStore;
use gantry_core::log::RequestLog;
use prometheus::IntCounter;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Asynchronous request-log sink.
///
/// The pipeline hands records to a bounded channel and returns immediately;
/// a background task drains into the [`LogStore`]. When the buffer is full
/// the record is dropped and `logs_dropped` is incremented — logging must
/// never stall the data plane.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<RequestLog>,
    dropped: IntCounter,
    sampling_ratio: f64,
}

impl LogSink {
    /// Create the sink and start the drain task.
    pub fn spawn(
        store: Arc<LogStore>,
        buffer_size: usize,
        sampling_ratio: f64,
        dropped: IntCounter,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RequestLog>(buffer_size.max(1));

        let handle = tokio::spawn(async move {
            while let Some(log) = rx.recv().await {
                store.insert(log);
            }
        });

        (Self { tx, dropped, sampling_ratio }, handle)
    }

    /// Enqueue one record (non-blocking).
    pub fn record(&self, log: RequestLog) {
        if self.sampling_ratio < 1.0 && rand::thread_rng().gen::<f64>() >= self.sampling_ratio {
            return;
        }
        if self.tx.try_send(log).is_err() {
            self.dropped.inc();
            warn!(dropped = self.dropped.get(), "log buffer full, dropping record");
        }
    }

    /// Monotonic count of records lost to a full buffer.
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}
