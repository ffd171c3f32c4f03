//! Remote file store over SSH.
//!
//! Abstracts the device connection for testability. Provides:
//! - RemoteStore trait: the file operations the sync ops need
//! - SshStore: real `ssh` subprocess connection for production
//! - MockStore: in-memory store for unit and flow tests
//!
//! Every SshStore operation is a single `ssh` invocation in BatchMode; the
//! write path stages the content next to the destination and renames it
//! into place so the device never sees a partially written uEnv.txt.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::debug;
use uuid::Uuid;

/// Transport errors. Connection-level failures are separated from remote
/// commands that ran and failed, so callers can tell "host unreachable"
/// from "no such file".
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("remote command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// File operations against the device, all synchronous.
///
/// `write` must replace the file atomically: after a failed write the old
/// content is still fully in place.
pub trait RemoteStore: Send + Sync {
    /// Does `path` exist on the device?
    fn exists(&self, path: &str) -> Result<bool, TransportError>;

    /// Read the full content of `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>, TransportError>;

    /// Atomically replace `path` with `content`.
    fn write(&self, path: &str, content: &[u8]) -> Result<(), TransportError>;

    /// Copy `from` to `to`, preserving mode and timestamps.
    fn copy(&self, from: &str, to: &str) -> Result<(), TransportError>;

    /// Names of the entries directly inside `dir`.
    fn list_dir(&self, dir: &str) -> Result<Vec<String>, TransportError>;
}

/// SSH connection settings for one device.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote host.
    pub host: String,
    /// SSH user.
    pub user: String,
    /// SSH port (default 22).
    pub port: u16,
    /// Path to SSH private key.
    pub key_path: Option<String>,
    /// Connection timeout in seconds.
    pub connect_timeout_seconds: u32,
    /// Server alive interval for detecting dead connections.
    pub server_alive_interval: u32,
    /// Server alive count max.
    pub server_alive_count_max: u32,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "debian".to_string(),
            port: 22,
            key_path: None,
            connect_timeout_seconds: 30,
            server_alive_interval: 15,
            server_alive_count_max: 2,
        }
    }
}

/// Production store: one `ssh` subprocess per operation.
pub struct SshStore {
    config: SshConfig,
}

/// OpenSSH reserves 255 for its own failures; anything else is the remote
/// command's exit status.
const SSH_EXIT_STATUS: i32 = 255;

impl SshStore {
    /// Create a new store for the given connection settings.
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Build SSH command arguments up to and including `user@host`.
    fn build_ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.config.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.config.server_alive_count_max),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
        ];

        if let Some(ref key_path) = self.config.key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }

        args.push(format!("{}@{}", self.config.user, self.config.host));

        args
    }

    /// Run `command` on the device, optionally feeding `stdin`.
    ///
    /// Returns the process output for the caller to interpret; exit 255 is
    /// already mapped to a transport-level SSH error.
    fn run(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<std::process::Output, TransportError> {
        use std::process::{Command, Stdio};

        let args = self.build_ssh_args();
        debug!("ssh {} {}", args.join(" "), command);

        let mut child = Command::new("ssh")
            .args(&args)
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Ssh(format!("failed to spawn ssh: {}", e)))?;

        if let Some(content) = stdin {
            feed_stdin(&mut child, content)?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TransportError::Ssh(format!("ssh process error: {}", e)))?;

        if output.status.code() == Some(SSH_EXIT_STATUS) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Ssh(format!(
                "ssh to {}@{} failed: {}",
                self.config.user,
                self.config.host,
                stderr.trim()
            )));
        }

        Ok(output)
    }

    /// Map a non-zero remote status into a CommandFailed error.
    fn command_failed(command: &str, output: &std::process::Output) -> TransportError {
        TransportError::CommandFailed {
            command: command.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

impl RemoteStore for SshStore {
    fn exists(&self, path: &str) -> Result<bool, TransportError> {
        let command = format!("test -e {}", shell_quote(path));
        let output = self.run(&command, None)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Self::command_failed(&command, &output)),
        }
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let command = format!("cat {}", shell_quote(path));
        let output = self.run(&command, None)?;
        if !output.status.success() {
            return Err(Self::command_failed(&command, &output));
        }
        Ok(output.stdout)
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<(), TransportError> {
        // Stage next to the destination so the rename stays on one
        // filesystem, then replace in a single mv.
        let staged = format!("{}.tmp.{}", path, Uuid::new_v4().simple());
        let staged_q = shell_quote(&staged);
        let command = format!(
            "cat > {staged} && mv -f {staged} {dest} || {{ rm -f {staged}; exit 1; }}",
            staged = staged_q,
            dest = shell_quote(path),
        );
        let output = self.run(&command, Some(content))?;
        if !output.status.success() {
            return Err(Self::command_failed(&command, &output));
        }
        Ok(())
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let command = format!("cp -p {} {}", shell_quote(from), shell_quote(to));
        let output = self.run(&command, None)?;
        if !output.status.success() {
            return Err(Self::command_failed(&command, &output));
        }
        Ok(())
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>, TransportError> {
        let command = format!("ls -1A {}", shell_quote(dir));
        let output = self.run(&command, None)?;
        if !output.status.success() {
            return Err(Self::command_failed(&command, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }
}

/// Feed `content` to the child's stdin, then close it so the remote side
/// sees EOF. If the pipe breaks mid-write the child is reaped before the
/// error surfaces, so a dying ssh is not left as a zombie.
fn feed_stdin(child: &mut std::process::Child, content: &[u8]) -> io::Result<()> {
    use std::io::Write;

    if let Some(mut pipe) = child.stdin.take() {
        if let Err(e) = pipe.write_all(content) {
            drop(pipe);
            let _ = child.wait();
            return Err(e);
        }
    }
    Ok(())
}

/// Quote a path for the remote shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// In-memory store for tests. Paths are plain strings; `set_offline`
/// makes every operation fail with a connection error so transport
/// failure paths can be exercised.
#[derive(Default)]
pub struct MockStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl MockStore {
    /// Create an empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, builder style.
    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.insert_file(path, content);
        self
    }

    /// Seed or replace a file.
    pub fn insert_file(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    /// Current content of a file, if present.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Toggle simulated connectivity loss.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "mock store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn missing(path: &str) -> TransportError {
        TransportError::CommandFailed {
            command: format!("cat '{}'", path),
            status: 1,
            stderr: format!("cat: {}: No such file or directory", path),
        }
    }
}

impl RemoteStore for MockStore {
    fn exists(&self, path: &str) -> Result<bool, TransportError> {
        self.check_online()?;
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        self.check_online()?;
        self.file(path).ok_or_else(|| Self::missing(path))
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<(), TransportError> {
        self.check_online()?;
        self.insert_file(path, content);
        Ok(())
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), TransportError> {
        self.check_online()?;
        let content = self.file(from).ok_or_else(|| Self::missing(from))?;
        self.insert_file(to, &content);
        Ok(())
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>, TransportError> {
        self.check_online()?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let mut entries: Vec<String> = files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(|rest| rest.to_string())
            .collect();
        entries.sort();
        Ok(entries)
    }
}
