//! File-backed collaborators: the Kea configuration file, the memfile lease
//! log and the systemd unit running the server.

use nix::unistd::{chown, Group, User};
use serde_derive::Serialize;
use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::leases::LeaseSource;
use crate::transaction::{ConfigReader, ConfigWriter};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run `cmd`, returning combined stdout and stderr when it exits with 0.
///
/// A child still running after `timeout` is killed and reported as a
/// failed command.
fn run(cmd: &[String], timeout: Duration) -> Result<String> {
    let (program, args) = cmd.split_first().ok_or_else(|| Error::Command {
        command: String::new(),
        output: "empty command".to_string(),
    })?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    // pipes are read while waiting, a full pipe would stall the child
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match wait_with_timeout(&mut child, timeout)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Command {
                command: cmd.join(" "),
                output: "Command timed out".to_string(),
            });
        }
    };
    let mut output = collect(stdout);
    output.push_str(&collect(stderr));
    if status.success() {
        Ok(output)
    } else {
        Err(Error::Command {
            command: cmd.join(" "),
            output: output.trim().to_string(),
        })
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

pub struct KeaConfigFile {
    path: PathBuf,
    owner: Option<String>,
    group: Option<String>,
    mode: u32,
    validate_command: Vec<String>,
    reload_command: Vec<String>,
    timeout: Duration,
    logger: slog::Logger,
}

impl KeaConfigFile {
    pub fn create(config: &Config, logger: slog::Logger) -> KeaConfigFile {
        KeaConfigFile {
            path: config.config_path.clone(),
            owner: config.config_owner.clone(),
            group: config.config_group.clone(),
            mode: config.config_mode,
            validate_command: config.validate_command.clone(),
            reload_command: config.reload_command.clone(),
            timeout: config.command_timeout,
            logger: logger.new(o!("module" => "config_file")),
        }
    }

    // Needs privileges; when unprivileged the file keeps our ownership.
    fn set_owner(&self, path: &Path) {
        let uid = match self.owner.as_deref().map(User::from_name) {
            Some(Ok(Some(user))) => Some(user.uid),
            Some(_) => {
                warn!(self.logger, "Unknown config owner"; "owner" => self.owner.as_deref());
                None
            }
            None => None,
        };
        let gid = match self.group.as_deref().map(Group::from_name) {
            Some(Ok(Some(group))) => Some(group.gid),
            Some(_) => {
                warn!(self.logger, "Unknown config group"; "group" => self.group.as_deref());
                None
            }
            None => None,
        };
        if uid.is_none() && gid.is_none() {
            return;
        }
        if let Err(err) = chown(path, uid, gid) {
            warn!(self.logger, "Could not change config ownership: {}", err);
        }
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

impl ConfigReader for KeaConfigFile {
    fn read(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }
}

impl ConfigWriter for KeaConfigFile {
    /// Write a uniquely named file next to the target and rename it over.
    ///
    /// The temporary file is removed on any failure before the rename.
    fn write(&self, text: &str) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(self.directory())?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(self.mode))?;
        self.set_owner(tmp.path());
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn validate_written(&self) -> bool {
        let mut cmd = self.validate_command.clone();
        cmd.push(self.path.to_string_lossy().into_owned());
        match run(&cmd, self.timeout) {
            Ok(_) => true,
            Err(err) => {
                warn!(self.logger, "Configuration check failed: {}", err);
                false
            }
        }
    }

    fn reload_service(&self) -> Result<()> {
        run(&self.reload_command, self.timeout)?;
        debug!(self.logger, "Service reloaded");
        Ok(())
    }
}

pub struct CsvLeaseFile {
    path: PathBuf,
}

impl CsvLeaseFile {
    pub fn create(config: &Config) -> CsvLeaseFile {
        CsvLeaseFile {
            path: config.lease_path.clone(),
        }
    }
}

impl LeaseSource for CsvLeaseFile {
    fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub active: bool,
    pub status: String,
    pub details: String,
}

pub trait ServiceMonitor: Send + Sync {
    fn status(&self) -> ServiceStatus;
}

pub struct ServiceControl {
    status_command: Vec<String>,
    details_command: Vec<String>,
    timeout: Duration,
}

impl ServiceControl {
    pub fn create(config: &Config) -> ServiceControl {
        ServiceControl {
            status_command: config.status_command.clone(),
            details_command: config.details_command.clone(),
            timeout: config.command_timeout,
        }
    }
}

impl ServiceMonitor for ServiceControl {
    fn status(&self) -> ServiceStatus {
        let active = matches!(
            run(&self.status_command, self.timeout),
            Ok(output) if output.trim() == "active"
        );
        // `systemctl status` exits non-zero for stopped units but still reports
        let details = match run(&self.details_command, self.timeout) {
            Ok(output) => output,
            Err(Error::Command { output, .. }) => output,
            Err(err) => err.to_string(),
        };
        ServiceStatus {
            active,
            status: if active { "active" } else { "inactive" }.to_string(),
            details: details.trim().to_string(),
        }
    }
}
