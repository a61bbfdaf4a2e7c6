//! The per-activation state machine task.
//!
//! One machine owns one write server and at most one collectd child at a
//! time. All inputs arrive as [`Signal`]s on a single channel; the machine
//! exits after reaching [`ProcessState::Stopped`].

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::SupervisorError;
use crate::process;
use crate::render::{render_master, write_conf_file};
use crate::state::{ProcessState, Signal};
use crate::supervisor::{Inner, Observer};
use crate::write_server::WriteServer;

pub(crate) struct Machine {
    inner: Weak<Inner>,
    observer: Arc<Observer>,
    signals: mpsc::UnboundedReceiver<Signal>,
    signals_tx: mpsc::WeakUnboundedSender<Signal>,
    server: Option<WriteServer>,
    terminated: watch::Sender<bool>,
    instance: Arc<str>,
    state: ProcessState,
    generation: u64,
    kill: Option<oneshot::Sender<()>>,
}

impl Machine {
    pub(crate) fn new(
        inner: Weak<Inner>,
        observer: Arc<Observer>,
        signals: mpsc::UnboundedReceiver<Signal>,
        signals_tx: mpsc::WeakUnboundedSender<Signal>,
        server: WriteServer,
        terminated: watch::Sender<bool>,
        instance: Arc<str>,
    ) -> Self {
        observer.reset(ProcessState::Uninitialized);
        Self {
            inner,
            observer,
            signals,
            signals_tx,
            server: Some(server),
            terminated,
            instance,
            state: ProcessState::Uninitialized,
            generation: 0,
            kill: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            match self.state {
                ProcessState::Starting => self.start_collectd().await,
                ProcessState::Stopped | ProcessState::Errored => break,
                _ => match self.signals.recv().await {
                    Some(signal) => self.handle(signal).await,
                    None => {
                        tracing::debug!(instance = %self.instance, "supervisor dropped, stopping collectd");
                        self.kill_child();
                        self.transition(ProcessState::Stopped);
                    }
                },
            }
        }
        self.teardown().await;
    }

    async fn handle(&mut self, signal: Signal) {
        if let Signal::ProcessExited { generation } = signal {
            if generation != self.generation {
                tracing::debug!(
                    instance = %self.instance,
                    generation,
                    current = self.generation,
                    "ignoring exit of a previous collectd process"
                );
                return;
            }
            self.kill = None;
        }

        let Some(next) = self.state.on_signal(&signal) else {
            tracing::trace!(instance = %self.instance, state = %self.state, ?signal, "signal ignored");
            return;
        };

        match (self.state, next) {
            (ProcessState::Running, ProcessState::Restarting)
            | (ProcessState::Running, ProcessState::ShuttingDown) => self.kill_child(),
            (ProcessState::Running, ProcessState::Starting) => {
                tracing::error!(instance = %self.instance, "collectd exited unexpectedly, restarting");
                self.transition(next);
                if !self.wait_retry_delay().await {
                    self.transition(ProcessState::Stopped);
                }
                return;
            }
            _ => {}
        }
        self.transition(next);
    }

    async fn start_collectd(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            self.transition(ProcessState::Stopped);
            return;
        };

        let (conf, has_jmx) = {
            let shared = inner.shared.lock();
            (
                shared.conf.clone(),
                shared.monitors.has_shared_subsystem_user(),
            )
        };
        let Some(conf) = conf else {
            tracing::error!(instance = %self.instance, "cannot start collectd without a configuration");
            self.transition(ProcessState::Stopped);
            return;
        };
        let port = self
            .server
            .as_ref()
            .map(WriteServer::running_port)
            .unwrap_or(conf.write_server_port);

        let rendered = match render_master(&conf, port, has_jmx) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!(instance = %self.instance, error = %e, "failed to render collectd config");
                self.transition(ProcessState::Stopped);
                return;
            }
        };

        let launched = write_conf_file(&rendered, &conf.config_file_path())
            .and_then(|()| {
                process::spawn(inner.launcher.as_ref(), &conf)
                    .map_err(|e| SupervisorError::io(conf.collectd_binary(), e))
            });
        let retry_delay = inner.timings.retry_delay;
        drop(inner);

        let child = match launched {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    instance = %self.instance,
                    error = %e,
                    retry_in = ?retry_delay,
                    "failed to start collectd"
                );
                if !self.wait_retry_delay().await {
                    self.transition(ProcessState::Stopped);
                }
                return;
            }
        };

        self.generation += 1;
        tracing::info!(
            instance = %self.instance,
            pid = ?child.id(),
            generation = self.generation,
            config = %conf.config_file_path().display(),
            "collectd started"
        );
        self.kill = Some(process::watch(
            child,
            self.instance.clone(),
            self.generation,
            self.signals_tx.clone(),
        ));
        self.transition(ProcessState::Running);
    }

    /// Sleep for the retry delay while still honoring `Stop`.
    ///
    /// Returns `false` if the machine should stop instead of retrying.
    async fn wait_retry_delay(&mut self) -> bool {
        let delay = match self.inner.upgrade() {
            Some(inner) => inner.timings.retry_delay,
            None => return false,
        };
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                signal = self.signals.recv() => match signal {
                    Some(Signal::Stop) | None => return false,
                    Some(other) => {
                        tracing::trace!(instance = %self.instance, signal = ?other, "signal ignored during retry delay");
                    }
                },
            }
        }
    }

    fn kill_child(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    fn transition(&mut self, next: ProcessState) {
        let from = self.state;
        self.state = next;
        tracing::info!(instance = %self.instance, %from, to = %next, "collectd state changed");
        self.observer.publish(from, next);
    }

    async fn teardown(&mut self) {
        self.kill_child();
        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.clear_write_server_port();
        }
        let _ = self.terminated.send(true);
    }
}
