//! Rendering and writing collectd configuration files.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use collectd_types::MonitorId;
use serde::Serialize;

use crate::config::SupervisorConfig;
use crate::error::{RenderError, Result, SupervisorError};
use crate::template::Template;

/// The master `collectd.conf` template shipped with the crate.
pub const MASTER_TEMPLATE: &str = include_str!("../templates/collectd.conf.tmpl");

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MasterContext<'a> {
    instance_name: &'a str,
    instance_dir: PathBuf,
    managed_config_dir: PathBuf,
    bundle_dir: &'a Path,
    plugin_root: PathBuf,
    types_db: PathBuf,
    interval_seconds: u32,
    timeout: u32,
    read_threads: u32,
    write_threads: u32,
    write_queue_limit_high: u64,
    write_queue_limit_low: u64,
    log_level: &'a str,
    write_server_url: String,
    has_generic_jmx_monitor: bool,
}

/// Render the master `collectd.conf` for `conf`.
///
/// `write_server_port` is the port the write-back server is actually bound
/// to, which differs from the configured one when that is zero.
/// `has_generic_jmx_monitor` enables the embedded JVM block.
pub fn render_master(
    conf: &SupervisorConfig,
    write_server_port: u16,
    has_generic_jmx_monitor: bool,
) -> std::result::Result<String, RenderError> {
    let context = MasterContext {
        instance_name: &conf.instance_name,
        instance_dir: conf.instance_config_dir(),
        managed_config_dir: conf.managed_config_dir(),
        bundle_dir: &conf.bundle_dir,
        plugin_root: conf.plugin_root(),
        types_db: conf.bundle_dir.join("share").join("collectd").join("types.db"),
        interval_seconds: conf.effective_interval_seconds(),
        timeout: conf.timeout,
        read_threads: conf.read_threads,
        write_threads: conf.write_threads,
        write_queue_limit_high: conf.write_queue_limit_high,
        write_queue_limit_low: conf.write_queue_limit_low,
        log_level: &conf.log_level,
        write_server_url: conf.write_server_url_with_port(write_server_port),
        has_generic_jmx_monitor,
    };
    let context = serde_json::to_value(context)?;
    Template::parse("collectd.conf", MASTER_TEMPLATE)?.render(&context)
}

/// File name of a monitor's fragment inside the managed config directory.
pub fn fragment_file_name(template_name: &str, monitor_id: &MonitorId) -> String {
    format!("20-{}.{}.conf", template_name, monitor_id)
}

/// Write `content` to `path`, readable only by the owner.
///
/// Missing parent directories are created with mode 0700. The file is
/// truncated and its mode forced to 0600 even when it already existed.
pub fn write_conf_file(content: &str, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_private_dir(dir).map_err(|e| SupervisorError::io(dir, e))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|e| SupervisorError::io(path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| SupervisorError::io(path, e))?;
    }
    file.write_all(content.as_bytes())
        .map_err(|e| SupervisorError::io(path, e))?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "wrote collectd config");
    Ok(())
}

/// Remove a config file, treating an already-missing file as success.
pub fn remove_conf_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SupervisorError::io(path, e)),
    }
}

/// Recursively delete an instance's config directory, if present.
pub fn remove_instance_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SupervisorError::io(dir, e)),
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
