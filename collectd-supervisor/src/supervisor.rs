//! The process supervisor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use collectd_types::MonitorId;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::SupervisorConfig;
use crate::debounce::Debouncer;
use crate::decode::RoutedBatch;
use crate::error::{Result, SupervisorError};
use crate::machine::Machine;
use crate::output::Output;
use crate::process::{BundledCollectd, Launcher};
use crate::registry::{DispatchReport, RegistrationTable};
use crate::render::remove_instance_dir;
use crate::state::{ProcessState, Signal, Transition};
use crate::write_server::{BatchReceiver, WriteServer};

/// Quiet period after the last restart request before collectd is restarted.
pub const RESTART_DELAY: Duration = Duration::from_secs(3);

/// Wait before relaunching collectd after it failed to start or crashed.
pub const RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timings {
    pub(crate) restart_delay: Duration,
    pub(crate) retry_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            restart_delay: RESTART_DELAY,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// State shared between the supervisor handle, the machine and the write server.
pub(crate) struct Shared {
    pub(crate) conf: Option<Arc<SupervisorConfig>>,
    pub(crate) monitors: RegistrationTable,
}

/// Current state plus a feed of transitions.
pub(crate) struct Observer {
    state: watch::Sender<ProcessState>,
    transitions: broadcast::Sender<Transition>,
}

impl Observer {
    fn new() -> Self {
        let (state, _) = watch::channel(ProcessState::Uninitialized);
        let (transitions, _) = broadcast::channel(64);
        Self { state, transitions }
    }

    pub(crate) fn reset(&self, state: ProcessState) {
        self.state.send_replace(state);
    }

    pub(crate) fn publish(&self, from: ProcessState, to: ProcessState) {
        self.state.send_replace(to);
        let _ = self.transitions.send(Transition { from, to });
    }

    fn current(&self) -> ProcessState {
        *self.state.borrow()
    }
}

pub(crate) struct Inner {
    pub(crate) shared: Mutex<Shared>,
    lifecycle: tokio::sync::Mutex<Option<Activation>>,
    pub(crate) launcher: Arc<dyn Launcher>,
    pub(crate) timings: Timings,
    observer: Arc<Observer>,
    write_server_port: AtomicU16,
    dropped: AtomicU64,
}

impl Inner {
    /// Forget the bound port once the write server has closed.
    pub(crate) fn clear_write_server_port(&self) {
        self.write_server_port.store(0, Ordering::SeqCst);
    }
}

/// One run of the state machine, from first restart request to `Stopped`.
struct Activation {
    signals: mpsc::UnboundedSender<Signal>,
    debouncer: Debouncer,
    terminated: watch::Receiver<bool>,
}

impl Activation {
    fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Stop collectd and wait until the machine has torn everything down.
    async fn stop(mut self) {
        let _ = self.signals.send(Signal::Stop);
        let _ = self.terminated.wait_for(|terminated| *terminated).await;
        self.debouncer.stop();
    }
}

/// Routes write-back batches into the registration table.
struct Dispatcher {
    inner: Weak<Inner>,
}

impl BatchReceiver for Dispatcher {
    fn receive(&self, batch: RoutedBatch) -> DispatchReport {
        let Some(inner) = self.inner.upgrade() else {
            return DispatchReport {
                delivered: 0,
                dropped: batch.len(),
            };
        };
        let report = inner.shared.lock().monitors.dispatch(batch);
        if report.dropped > 0 {
            inner.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        report
    }
}

/// Owns one collectd child process and the monitors feeding it config.
///
/// Cloning yields another handle to the same supervisor. Create one per
/// collectd instance and pass it to every monitor that needs it.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use collectd_supervisor::{ChannelOutput, Output, ProcessSupervisor, SupervisorConfig};
/// use collectd_types::MonitorId;
///
/// # async fn run() -> collectd_supervisor::Result<()> {
/// let supervisor = ProcessSupervisor::new();
/// supervisor
///     .configure(SupervisorConfig::builder().bundle_dir("/opt/collectd").build())
///     .await?;
///
/// let (output, _rx) = ChannelOutput::new(64);
/// let output: Arc<dyn Output> = Arc::new(output);
/// let id = MonitorId::from("redis-1");
///
/// // Write the monitor's fragment into supervisor.managed_config_dir()?, then:
/// supervisor.configure_from_monitor(&id, &output, false).await?;
///
/// // ... later
/// supervisor.monitor_did_shutdown(&id).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("state", &self.state())
            .field("active_monitors", &self.active_monitors())
            .finish()
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Create an unconfigured supervisor running the bundled collectd.
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(BundledCollectd))
    }

    /// Create an unconfigured supervisor with a custom launcher.
    pub fn with_launcher(launcher: Arc<dyn Launcher>) -> Self {
        Self::with_timings(launcher, Timings::default())
    }

    pub(crate) fn with_timings(launcher: Arc<dyn Launcher>, timings: Timings) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    conf: None,
                    monitors: RegistrationTable::new(),
                }),
                lifecycle: tokio::sync::Mutex::new(None),
                launcher,
                timings,
                observer: Arc::new(Observer::new()),
                write_server_port: AtomicU16::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Apply the main collectd configuration.
    ///
    /// A restart is requested when this is the first configuration or when
    /// it differs from the current one; an identical config is a no-op. The
    /// first configuration also clears any stale files left in the
    /// instance's config directory.
    pub async fn configure(&self, conf: SupervisorConfig) -> Result<()> {
        conf.validate()?;
        let hash = conf.hash();
        let instance_dir = conf.instance_config_dir();
        let instance = conf.instance_name.clone();

        let first = {
            let mut shared = self.inner.shared.lock();
            let current = shared.conf.as_ref().map(|c| c.hash());
            if current == Some(hash) {
                tracing::debug!(%instance, "collectd configuration unchanged");
                return Ok(());
            }
            shared.conf = Some(Arc::new(conf));
            current.is_none()
        };

        if first {
            remove_instance_dir(&instance_dir)?;
        }
        tracing::info!(%instance, first, "collectd configuration applied");
        self.request_restart().await
    }

    /// Start an isolated collectd instance for a single monitor.
    ///
    /// The returned supervisor is configured from this one's config (see
    /// [`SupervisorConfig::isolated`]) and shares its launcher.
    pub async fn isolated(
        &self,
        monitor_id: &MonitorId,
        interval_seconds: u32,
    ) -> Result<ProcessSupervisor> {
        let main = self.config()?;
        let supervisor = Self::with_timings(self.inner.launcher.clone(), self.inner.timings);
        supervisor
            .configure(main.isolated(monitor_id, interval_seconds))
            .await?;
        Ok(supervisor)
    }

    /// Register a monitor whose config fragment has been written and request
    /// a restart so collectd picks it up.
    pub async fn configure_from_monitor(
        &self,
        monitor_id: &MonitorId,
        output: &Arc<dyn Output>,
        uses_shared_subsystem: bool,
    ) -> Result<()> {
        if monitor_id.is_empty() {
            return Err(SupervisorError::EmptyMonitorId);
        }
        self.config()?;

        let added = self.inner.shared.lock().monitors.insert(
            monitor_id.clone(),
            output,
            uses_shared_subsystem,
        );
        tracing::debug!(%monitor_id, added, uses_shared_subsystem, "monitor registered");

        self.request_restart().await
    }

    /// Deregister a monitor.
    ///
    /// When it was the last one, collectd is stopped, this call waits until
    /// the write server is closed, and the instance's config directory is
    /// removed. Otherwise collectd is restarted without it. Unknown ids are
    /// ignored, so calling this twice is harmless.
    pub async fn monitor_did_shutdown(&self, monitor_id: &MonitorId) {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let was_last = {
            let mut shared = self.inner.shared.lock();
            if !shared.monitors.contains(monitor_id) {
                tracing::debug!(%monitor_id, "shutdown of unregistered monitor ignored");
                return;
            }
            shared.monitors.release_shared_subsystem(monitor_id);
            let was_last = shared.monitors.len() == 1;
            if !was_last {
                shared.monitors.remove(monitor_id);
            }
            was_last
        };

        if !was_last {
            tracing::debug!(%monitor_id, "monitor deregistered, restarting collectd");
            if let Err(e) = self.restart_locked(&mut lifecycle).await {
                tracing::error!(%monitor_id, error = %e, "failed to restart collectd");
            }
            return;
        }

        tracing::info!(%monitor_id, "last monitor shut down, stopping collectd");
        if let Some(activation) = lifecycle.take() {
            activation.stop().await;
        }

        let conf = {
            let mut shared = self.inner.shared.lock();
            shared.monitors.remove(monitor_id);
            shared.conf.clone()
        };
        if let Some(conf) = conf {
            if let Err(e) = remove_instance_dir(&conf.instance_config_dir()) {
                tracing::error!(error = %e, "failed to remove collectd config directory");
            }
        }
    }

    /// Request a (debounced) restart of collectd.
    ///
    /// Starts the write server first if no machine is running; a bind
    /// failure is returned here and leaves the supervisor `Errored`.
    pub async fn request_restart(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.restart_locked(&mut lifecycle).await
    }

    /// Stop collectd and the write server regardless of registered monitors.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Some(activation) = lifecycle.take() {
            activation.stop().await;
        }
    }

    async fn restart_locked(&self, lifecycle: &mut Option<Activation>) -> Result<()> {
        let conf = self.config()?;
        if lifecycle.as_ref().map_or(true, Activation::is_terminated) {
            *lifecycle = Some(self.activate(&conf).await?);
        }
        if let Some(activation) = lifecycle.as_ref() {
            activation.debouncer.signal();
        }
        Ok(())
    }

    async fn activate(&self, conf: &SupervisorConfig) -> Result<Activation> {
        let dispatcher: Arc<dyn BatchReceiver> = Arc::new(Dispatcher {
            inner: Arc::downgrade(&self.inner),
        });
        let server = match WriteServer::start(
            &conf.write_server_ip_addr,
            conf.write_server_port,
            dispatcher,
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(instance = %conf.instance_name, error = %e, "could not start collectd write server");
                let observer = &self.inner.observer;
                observer.publish(observer.current(), ProcessState::Errored);
                return Err(e);
            }
        };
        self.inner
            .write_server_port
            .store(server.running_port(), Ordering::SeqCst);

        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (terminated_tx, terminated) = watch::channel(false);
        let machine = Machine::new(
            Arc::downgrade(&self.inner),
            self.inner.observer.clone(),
            signals_rx,
            signals.downgrade(),
            server,
            terminated_tx,
            Arc::from(conf.instance_name.as_str()),
        );
        tokio::spawn(machine.run());

        let restart_tx = signals.downgrade();
        let debouncer = Debouncer::start(self.inner.timings.restart_delay, move || {
            if let Some(tx) = restart_tx.upgrade() {
                let _ = tx.send(Signal::Restart);
            }
        });

        Ok(Activation {
            signals,
            debouncer,
            terminated,
        })
    }

    /// The current configuration.
    pub fn config(&self) -> Result<Arc<SupervisorConfig>> {
        self.inner
            .shared
            .lock()
            .conf
            .clone()
            .ok_or(SupervisorError::NotConfigured)
    }

    /// URL collectd posts to, using the bound port once the server runs.
    pub fn write_server_url(&self) -> Result<String> {
        let conf = self.config()?;
        let port = match self.inner.write_server_port.load(Ordering::SeqCst) {
            0 => conf.write_server_port,
            port => port,
        };
        Ok(conf.write_server_url_with_port(port))
    }

    /// Directory monitors write their config fragments into.
    pub fn managed_config_dir(&self) -> Result<PathBuf> {
        Ok(self.config()?.managed_config_dir())
    }

    pub fn bundle_dir(&self) -> Result<PathBuf> {
        Ok(self.config()?.bundle_dir.clone())
    }

    /// Current process state.
    pub fn state(&self) -> ProcessState {
        self.inner.observer.current()
    }

    /// A receiver that always holds the latest process state.
    pub fn watch_state(&self) -> watch::Receiver<ProcessState> {
        self.inner.observer.state.subscribe()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.inner.observer.transitions.subscribe()
    }

    /// Number of registered monitors.
    pub fn active_monitors(&self) -> usize {
        self.inner.shared.lock().monitors.len()
    }

    /// Write-back elements dropped because their monitor was unknown or gone.
    pub fn dropped_elements(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ChannelOutput, OutputMessage};
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tokio::process::Command;

    const WAIT: Duration = Duration::from_secs(10);

    /// Launches `program args...` and counts attempts.
    struct Counting {
        program: &'static str,
        args: &'static [&'static str],
        launches: AtomicUsize,
    }

    impl Counting {
        fn new(program: &'static str, args: &'static [&'static str]) -> Arc<Self> {
            Arc::new(Self {
                program,
                args,
                launches: AtomicUsize::new(0),
            })
        }

        fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    impl Launcher for Counting {
        fn command(&self, _conf: &SupervisorConfig) -> Command {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let mut cmd = Command::new(self.program);
            cmd.args(self.args);
            cmd
        }
    }

    fn timings() -> Timings {
        Timings {
            restart_delay: Duration::from_millis(150),
            retry_delay: Duration::from_millis(100),
        }
    }

    fn conf(dir: &Path) -> SupervisorConfig {
        SupervisorConfig::builder()
            .bundle_dir("/opt/collectd")
            .config_dir(dir)
            .write_server_ip_addr("127.0.0.1")
            .build()
    }

    async fn configured(launcher: Arc<Counting>) -> (ProcessSupervisor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::with_timings(launcher, timings());
        supervisor.configure(conf(dir.path())).await.unwrap();
        (supervisor, dir)
    }

    fn output() -> (Arc<dyn Output>, tokio::sync::mpsc::Receiver<OutputMessage>) {
        let (output, rx) = ChannelOutput::new(16);
        (Arc::new(output), rx)
    }

    async fn wait_for_state(supervisor: &ProcessSupervisor, state: ProcessState) {
        let mut rx = supervisor.watch_state();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("never reached {state}, stuck in {}", supervisor.state()))
            .unwrap();
    }

    async fn wait_for_launches(launcher: &Counting, n: usize) {
        tokio::time::timeout(WAIT, async {
            while launcher.launches() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("only {} launches", launcher.launches()));
    }

    #[tokio::test]
    async fn test_unconfigured_supervisor() {
        let supervisor = ProcessSupervisor::new();
        let (output, _rx) = output();

        assert!(matches!(supervisor.config(), Err(SupervisorError::NotConfigured)));
        assert!(matches!(supervisor.write_server_url(), Err(SupervisorError::NotConfigured)));
        assert!(matches!(supervisor.managed_config_dir(), Err(SupervisorError::NotConfigured)));
        assert!(matches!(
            supervisor.request_restart().await,
            Err(SupervisorError::NotConfigured)
        ));
        assert!(matches!(
            supervisor
                .configure_from_monitor(&MonitorId::from("m1"), &output, false)
                .await,
            Err(SupervisorError::NotConfigured)
        ));
        assert_eq!(supervisor.state(), ProcessState::Uninitialized);
        assert_eq!(supervisor.active_monitors(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let supervisor = ProcessSupervisor::new();
        let bad = SupervisorConfig::builder().log_level("chatty").build();
        assert!(matches!(
            supervisor.configure(bad).await,
            Err(SupervisorError::InvalidConfig(_))
        ));
        assert!(supervisor.config().is_err());
    }

    #[tokio::test]
    async fn test_empty_monitor_id_is_rejected() {
        let (supervisor, _dir) = configured(Counting::new("sleep", &["30"])).await;
        let (output, _rx) = output();
        assert!(matches!(
            supervisor
                .configure_from_monitor(&MonitorId::from(""), &output, false)
                .await,
            Err(SupervisorError::EmptyMonitorId)
        ));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_burst_of_registrations_launches_once() {
        let launcher = Counting::new("sleep", &["30"]);
        let (supervisor, _dir) = configured(launcher.clone()).await;
        let (output, _rx) = output();

        for i in 0..5 {
            supervisor
                .configure_from_monitor(&MonitorId::new(format!("m{i}")), &output, false)
                .await
                .unwrap();
        }
        wait_for_state(&supervisor, ProcessState::Running).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(launcher.launches(), 1);
        assert_eq!(supervisor.active_monitors(), 5);
        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_master_config_is_written_privately() {
        let (supervisor, _dir) = configured(Counting::new("sleep", &["30"])).await;
        let (output, _rx) = output();
        supervisor
            .configure_from_monitor(&MonitorId::from("jmx"), &output, true)
            .await
            .unwrap();
        wait_for_state(&supervisor, ProcessState::Running).await;

        let conf = supervisor.config().unwrap();
        let path = conf.config_file_path();
        let rendered = std::fs::read_to_string(&path).unwrap();
        assert!(rendered.contains(&supervisor.write_server_url().unwrap()));
        assert!(rendered.contains("GenericJMX"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_identical_config_does_not_restart() {
        let launcher = Counting::new("sleep", &["30"]);
        let (supervisor, dir) = configured(launcher.clone()).await;
        wait_for_state(&supervisor, ProcessState::Running).await;

        supervisor.configure(conf(dir.path())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(launcher.launches(), 1);

        let changed = SupervisorConfig {
            timeout: 10,
            ..conf(dir.path())
        };
        supervisor.configure(changed).await.unwrap();
        wait_for_launches(&launcher, 2).await;
        wait_for_state(&supervisor, ProcessState::Running).await;
        assert_eq!(supervisor.config().unwrap().timeout, 10);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_last_monitor_shutdown_tears_down() {
        let launcher = Counting::new("sleep", &["30"]);
        let (supervisor, _dir) = configured(launcher.clone()).await;
        let (output, _rx) = output();
        let m1 = MonitorId::from("m1");
        let m2 = MonitorId::from("m2");

        supervisor.configure_from_monitor(&m1, &output, false).await.unwrap();
        supervisor.configure_from_monitor(&m2, &output, false).await.unwrap();
        wait_for_state(&supervisor, ProcessState::Running).await;
        let port = supervisor.inner.write_server_port.load(Ordering::SeqCst);
        let instance_dir = supervisor.config().unwrap().instance_config_dir();
        assert!(instance_dir.exists());

        supervisor.monitor_did_shutdown(&m1).await;
        assert_eq!(supervisor.active_monitors(), 1);
        wait_for_launches(&launcher, 2).await;
        wait_for_state(&supervisor, ProcessState::Running).await;

        supervisor.monitor_did_shutdown(&m2).await;
        assert_eq!(supervisor.state(), ProcessState::Stopped);
        assert_eq!(supervisor.active_monitors(), 0);
        assert!(!instance_dir.exists());
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
        assert_eq!(supervisor.inner.write_server_port.load(Ordering::SeqCst), 0);
        assert!(supervisor.write_server_url().unwrap().contains(":0/"));

        // A second shutdown of the same monitor is a no-op.
        supervisor.monitor_did_shutdown(&m2).await;
        assert_eq!(supervisor.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_monitor_shutdown_is_ignored() {
        let launcher = Counting::new("sleep", &["30"]);
        let (supervisor, _dir) = configured(launcher.clone()).await;
        let (output, _rx) = output();
        supervisor
            .configure_from_monitor(&MonitorId::from("m1"), &output, false)
            .await
            .unwrap();
        wait_for_state(&supervisor, ProcessState::Running).await;

        supervisor.monitor_did_shutdown(&MonitorId::from("ghost")).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(supervisor.state(), ProcessState::Running);
        assert_eq!(supervisor.active_monitors(), 1);
        assert_eq!(launcher.launches(), 1);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_registration_after_stop_starts_again() {
        let launcher = Counting::new("sleep", &["30"]);
        let (supervisor, _dir) = configured(launcher.clone()).await;
        let (output, _rx) = output();
        let id = MonitorId::from("m1");

        supervisor.configure_from_monitor(&id, &output, false).await.unwrap();
        wait_for_state(&supervisor, ProcessState::Running).await;
        supervisor.monitor_did_shutdown(&id).await;
        assert_eq!(supervisor.state(), ProcessState::Stopped);

        supervisor.configure_from_monitor(&id, &output, false).await.unwrap();
        wait_for_state(&supervisor, ProcessState::Running).await;
        assert_eq!(launcher.launches(), 2);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_crashing_collectd_is_relaunched() {
        let launcher = Counting::new("true", &[]);
        let (supervisor, _dir) = configured(launcher.clone()).await;
        let mut transitions = supervisor.subscribe();

        wait_for_launches(&launcher, 3).await;

        let mut saw_unexpected_exit = false;
        while let Ok(t) = transitions.try_recv() {
            if t.from == ProcessState::Running && t.to == ProcessState::Starting {
                saw_unexpected_exit = true;
            }
        }
        assert!(saw_unexpected_exit);

        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_interrupts_launch_retry() {
        let launcher = Counting::new("/nonexistent/collectd", &[]);
        let (supervisor, _dir) = configured(launcher.clone()).await;
        let (output, _rx) = output();
        let id = MonitorId::from("m1");
        supervisor.configure_from_monitor(&id, &output, false).await.unwrap();

        wait_for_launches(&launcher, 2).await;
        assert_eq!(supervisor.state(), ProcessState::Starting);

        tokio::time::timeout(WAIT, supervisor.monitor_did_shutdown(&id))
            .await
            .unwrap();
        assert_eq!(supervisor.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_bind_failure_marks_errored() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::with_timings(Counting::new("sleep", &["30"]), timings());

        let conf = SupervisorConfig {
            write_server_port: port,
            ..conf(dir.path())
        };
        let err = supervisor.configure(conf).await.unwrap_err();
        assert!(matches!(err, SupervisorError::WriteServer { .. }));
        assert_eq!(supervisor.state(), ProcessState::Errored);
    }

    #[tokio::test]
    async fn test_write_back_reaches_monitor_outputs() {
        let (supervisor, _dir) = configured(Counting::new("sleep", &["30"])).await;
        let (first, mut first_rx) = output();
        let (second, mut second_rx) = output();
        supervisor
            .configure_from_monitor(&MonitorId::from("m1"), &first, false)
            .await
            .unwrap();
        supervisor
            .configure_from_monitor(&MonitorId::from("m2"), &second, false)
            .await
            .unwrap();

        let body = r#"[
            {"values":[1],"dstypes":["gauge"],"dsnames":["value"],"plugin":"load","type":"load","meta":{"monitorID":"m1"}},
            {"values":[2],"dstypes":["derive"],"dsnames":["value"],"plugin":"cpu","type":"cpu","meta":{"monitorID":"m2"}},
            {"values":[3],"dstypes":["gauge"],"dsnames":["value"],"plugin":"x","type":"x","meta":{"monitorID":"ghost"}}
        ]"#;
        let resp = reqwest::Client::new()
            .post(supervisor.write_server_url().unwrap())
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        match first_rx.try_recv().unwrap() {
            OutputMessage::Datapoints(dps) => assert_eq!(dps[0].metric, "load"),
            other => panic!("unexpected {other:?}"),
        }
        match second_rx.try_recv().unwrap() {
            OutputMessage::Datapoints(dps) => assert_eq!(dps[0].metric, "cpu"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(first_rx.try_recv().is_err());

        supervisor.shutdown().await;
    }

    async fn post(supervisor: &ProcessSupervisor, query: &str, body: &str) {
        let url = format!("{}{query}", supervisor.write_server_url().unwrap());
        let resp = reqwest::Client::new().post(url).body(body.to_string()).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_write_back_delivers_in_one_call_and_counts_drops() {
        let (supervisor, _dir) = configured(Counting::new("sleep", &["30"])).await;
        let (m1, mut m1_rx) = output();
        supervisor
            .configure_from_monitor(&MonitorId::from("m1"), &m1, false)
            .await
            .unwrap();

        let body = r#"[
            {"values":[1],"dstypes":["gauge"],"dsnames":["value"],"type":"a","meta":{"monitorID":"m1"}},
            {"values":[2],"dstypes":["gauge"],"dsnames":["value"],"type":"b","meta":{"monitorID":"m1"}},
            {"values":[3],"dstypes":["gauge"],"dsnames":["value"],"type":"c","meta":{"monitorID":"m1"}},
            {"values":[4],"dstypes":["gauge"],"dsnames":["value"],"type":"d","meta":{"monitorID":"unknown"}}
        ]"#;
        post(&supervisor, "", body).await;

        match m1_rx.try_recv().unwrap() {
            OutputMessage::Datapoints(dps) => {
                let metrics: Vec<_> = dps.iter().map(|dp| dp.metric.as_str()).collect();
                assert_eq!(metrics, ["a", "b", "c"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(m1_rx.try_recv().is_err());
        assert_eq!(supervisor.dropped_elements(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_monitor_id_dimension_routes_and_is_stripped() {
        let (supervisor, _dir) = configured(Counting::new("sleep", &["30"])).await;
        let (m1, mut m1_rx) = output();
        supervisor
            .configure_from_monitor(&MonitorId::from("m1"), &m1, false)
            .await
            .unwrap();

        let bracketed = r#"[{"values":[1],"dstypes":["gauge"],"dsnames":["value"],"host":"h",
            "plugin":"redis","plugin_instance":"main[monitorID=m1,role=cache]","type":"memory"}]"#;
        post(&supervisor, "", bracketed).await;
        match m1_rx.try_recv().unwrap() {
            OutputMessage::Datapoints(dps) => {
                let dims = &dps[0].dimensions;
                assert!(!dims.contains_key("monitorID"));
                assert_eq!(dims["plugin_instance"], "main");
                assert_eq!(dims["role"], "cache");
            }
            other => panic!("unexpected {other:?}"),
        }

        let plain = r#"[{"values":[1],"dstypes":["gauge"],"dsnames":["value"],"plugin":"load","type":"load"}]"#;
        post(&supervisor, "?sfxdim_monitorID=m1&sfxdim_env=prod", plain).await;
        match m1_rx.try_recv().unwrap() {
            OutputMessage::Datapoints(dps) => {
                let dims = &dps[0].dimensions;
                assert!(!dims.contains_key("monitorID"));
                assert_eq!(dims["env"], "prod");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(supervisor.dropped_elements(), 0);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_isolated_supervisor_gets_its_own_instance() {
        let (main, _dir) = configured(Counting::new("sleep", &["30"])).await;
        let id = MonitorId::from("heavy");

        let isolated = main.isolated(&id, 5).await.unwrap();
        let conf = isolated.config().unwrap();
        assert_eq!(conf.instance_name, "monitor-heavy");
        assert_eq!(conf.interval_seconds, 5);
        assert!(isolated.write_server_url().unwrap().ends_with("/?monitorID=heavy"));
        assert_ne!(isolated.write_server_url().unwrap(), main.write_server_url().unwrap());

        isolated.shutdown().await;
        main.shutdown().await;
    }
}
