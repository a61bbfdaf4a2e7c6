//! Trailing-edge debouncer.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Runs a callback once a burst of signals has gone quiet for `delay`.
///
/// Every [`signal`](Debouncer::signal) pushes the deadline out by `delay`, so
/// N signals within the window produce exactly one callback. The debouncer
/// stops when [`stop`](Debouncer::stop) is called or when it is dropped.
#[derive(Debug)]
pub struct Debouncer {
    signal_tx: mpsc::Sender<()>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Start the debouncer task. Must be called from within a tokio runtime.
    pub fn start<F>(delay: Duration, callback: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        // One slot is enough: a pending signal already guarantees a firing.
        let (signal_tx, mut signal_rx) = mpsc::channel::<()>(1);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => return,
                    signal = signal_rx.recv() => {
                        if signal.is_none() {
                            return;
                        }
                    }
                }

                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut stop_rx => return,
                        signal = signal_rx.recv() => match signal {
                            Some(()) => sleep.as_mut().reset(Instant::now() + delay),
                            None => return,
                        },
                        _ = &mut sleep => {
                            callback();
                            break;
                        }
                    }
                }
            }
        });

        Self {
            signal_tx,
            stop_tx: Some(stop_tx),
            task,
        }
    }

    /// Request a callback, coalescing with any pending request.
    pub fn signal(&self) {
        let _ = self.signal_tx.try_send(());
    }

    /// Stop the debouncer. Pending callbacks are discarded. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.stop();
    }
}
