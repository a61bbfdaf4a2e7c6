//! Launching and watching the collectd child process.

use std::io;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::config::SupervisorConfig;
use crate::state::Signal;

/// Builds the command that runs collectd for a given config.
///
/// The supervisor takes care of stdio and of killing the child; a launcher
/// only decides what to execute.
pub trait Launcher: Send + Sync + 'static {
    fn command(&self, conf: &SupervisorConfig) -> Command;
}

/// Runs `<bundle_dir>/bin/collectd -f -C <config file>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledCollectd;

impl Launcher for BundledCollectd {
    fn command(&self, conf: &SupervisorConfig) -> Command {
        let mut cmd = Command::new(conf.collectd_binary());
        cmd.arg("-f").arg("-C").arg(conf.config_file_path());
        cmd
    }
}

/// Spawn the child with piped output. The child is killed if its handle is
/// dropped.
pub(crate) fn spawn(launcher: &dyn Launcher, conf: &SupervisorConfig) -> io::Result<Child> {
    let mut cmd = launcher.command(conf);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn()
}

/// Start the log forwarders and the exit watcher for `child`.
///
/// Returns the kill switch: sending on it, or dropping it, kills the child.
/// When the child exits for any reason the watcher reports
/// [`Signal::ProcessExited`] with `generation`.
pub(crate) fn watch(
    mut child: Child,
    instance: Arc<str>,
    generation: u64,
    on_exit: mpsc::WeakUnboundedSender<Signal>,
) -> oneshot::Sender<()> {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, instance.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, instance.clone()));
    }

    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let pid = child.id();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                tracing::debug!(instance = %instance, ?pid, "killing collectd");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(instance = %instance, error = %e, "failed to kill collectd");
                }
                child.wait().await
            }
        };

        match status {
            Ok(status) => tracing::info!(instance = %instance, ?pid, %status, "collectd exited"),
            Err(e) => tracing::error!(instance = %instance, error = %e, "failed waiting for collectd"),
        }

        if let Some(tx) = on_exit.upgrade() {
            let _ = tx.send(Signal::ProcessExited { generation });
        }
    });

    kill_tx
}

async fn forward_lines<R>(reader: R, instance: Arc<str>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log_line(&instance, &line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(instance = %instance, error = %e, "stopped reading collectd output");
                break;
            }
        }
    }
}

/// Severity parsed from a collectd `logfile` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectdLogLevel {
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

/// Split a collectd log line into its severity and message.
///
/// collectd prints `[<timestamp>] [<severity>] <message>` when
/// `PrintSeverity` is on. Only the bracket at the start of the line, or the
/// one right after the timestamp, is read as the severity. Lines without a
/// recognizable severity are info.
pub fn parse_log_line(line: &str) -> (CollectdLogLevel, &str) {
    let line = line.trim();
    if let Some(parsed) = leading_severity(line) {
        return parsed;
    }
    if let Some(after_timestamp) = line
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(_, rest)| rest.trim_start())
    {
        if let Some(parsed) = leading_severity(after_timestamp) {
            return parsed;
        }
    }
    (CollectdLogLevel::Info, line)
}

fn leading_severity(text: &str) -> Option<(CollectdLogLevel, &str)> {
    const TAGS: &[(&str, CollectdLogLevel)] = &[
        ("[error]", CollectdLogLevel::Error),
        ("[warning]", CollectdLogLevel::Warning),
        ("[notice]", CollectdLogLevel::Notice),
        ("[info]", CollectdLogLevel::Info),
        ("[debug]", CollectdLogLevel::Debug),
    ];

    TAGS.iter().find_map(|(tag, level)| {
        text.strip_prefix(tag)
            .map(|message| (*level, message.trim()))
    })
}

fn log_line(instance: &str, line: &str) {
    let (level, message) = parse_log_line(line);
    if message.is_empty() {
        return;
    }
    match level {
        CollectdLogLevel::Error => tracing::error!(target: "collectd", instance, "{}", message),
        CollectdLogLevel::Warning => tracing::warn!(target: "collectd", instance, "{}", message),
        CollectdLogLevel::Notice | CollectdLogLevel::Info => {
            tracing::info!(target: "collectd", instance, "{}", message)
        }
        CollectdLogLevel::Debug => tracing::debug!(target: "collectd", instance, "{}", message),
    }
}
