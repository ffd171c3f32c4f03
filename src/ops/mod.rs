//! The remote sync operations: update, preview, backup, restore, show.
//!
//! Everything here runs against a `RemoteStore`, so the flow tests drive
//! the in-memory mock and the CLI drives ssh. The merge itself is pure;
//! these functions own the read/backup/confirm/write sequencing around it
//! plus the user-facing error taxonomy and exit-code mapping.

use std::path::Path;

use chrono::Local;
use log::info;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::backup::{backup_path, find_backups, latest_backup, BackupInfo};
use crate::merge::{merge, ChangeLog};
use crate::signal::{InterruptState, EXIT_CODE_INTERRUPTED};
use crate::transport::{RemoteStore, TransportError};
use crate::uenv::ConfigFile;

/// Exit code for transport failures (same code ssh-driven tooling uses).
pub const EXIT_TRANSPORT: i32 = 20;
/// Exit code for a missing local or remote file.
pub const EXIT_MISSING_FILE: i32 = 21;
/// Exit code for a post-write verification mismatch.
pub const EXIT_VERIFY_FAILED: i32 = 22;

/// Operation errors, the user-facing taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no backups of {0} found on the device")]
    NoBackups(String),

    #[error("operation declined")]
    Declined,

    #[error("operation interrupted")]
    Interrupted,

    #[error("verification failed for {path}: wrote sha256 {expected}, device has {actual}")]
    VerifyFailed {
        path: String,
        expected: String,
        actual: String,
    },
}

impl OpError {
    /// Map the error to a process exit code. Distinct codes let scripts
    /// tell connectivity problems from missing files.
    pub fn exit_code(&self) -> i32 {
        match self {
            OpError::Transport(_) => EXIT_TRANSPORT,
            OpError::NotFound(_) | OpError::Io { .. } => EXIT_MISSING_FILE,
            OpError::VerifyFailed { .. } => EXIT_VERIFY_FAILED,
            OpError::Interrupted => EXIT_CODE_INTERRUPTED,
            OpError::NoBackups(_) | OpError::Declined => 1,
        }
    }
}

/// Result of a dry run: the change log only, nothing written.
#[derive(Debug, Serialize)]
pub struct PreviewReport {
    pub local_path: String,
    pub remote_path: String,
    pub changes: ChangeLog,
}

/// Result of an update.
#[derive(Debug, Serialize)]
pub struct UpdateReport {
    pub local_path: String,
    pub remote_path: String,
    pub changes: ChangeLog,
    /// False when the merge was a no-op and nothing was written.
    pub applied: bool,
    /// Backup taken before writing; None on a no-op run.
    pub backup_path: Option<String>,
    /// SHA-256 of the written content, verified against a read-back.
    pub sha256: Option<String>,
}

/// Result of a standalone backup.
#[derive(Debug, Serialize)]
pub struct BackupReport {
    pub remote_path: String,
    pub backup_path: String,
}

/// Result of a restore.
#[derive(Debug, Serialize)]
pub struct RestoreReport {
    pub remote_path: String,
    pub restored_from: BackupInfo,
}

/// Current device state: content, digest, and available backups.
#[derive(Debug, Serialize)]
pub struct ShowReport {
    pub remote_path: String,
    pub sha256: String,
    pub content: String,
    pub backups: Vec<BackupInfo>,
}

/// Compute the merge and report it without touching the device.
///
/// This is the same computation `update` applies, so the preview can never
/// disagree with what an apply would do.
pub fn preview(
    store: &dyn RemoteStore,
    local_path: &Path,
    remote_path: &str,
) -> Result<PreviewReport, OpError> {
    let local = read_local(local_path)?;
    let remote = read_remote(store, remote_path)?;
    let result = merge(&local, &remote);

    Ok(PreviewReport {
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        changes: result.log,
    })
}

/// Merge the local file into the device copy.
///
/// Sequence: read both sides, merge; stop early when nothing would change
/// (no backup is taken for a no-op run). Otherwise back up the device
/// file, ask `confirm` (the CLI shows the change log and prompts; `--yes`
/// passes a constant), write the merged content atomically, and verify it
/// by digest against a read-back. The interrupt flag is polled before the
/// backup and before the write; once the write is issued it completes.
pub fn update(
    store: &dyn RemoteStore,
    local_path: &Path,
    remote_path: &str,
    interrupt: &InterruptState,
    confirm: &mut dyn FnMut(&ChangeLog) -> bool,
) -> Result<UpdateReport, OpError> {
    let local = read_local(local_path)?;
    let remote = read_remote(store, remote_path)?;
    let result = merge(&local, &remote);

    if result.log.is_noop() {
        info!("{} already matches {}", remote_path, local_path.display());
        return Ok(UpdateReport {
            local_path: local_path.display().to_string(),
            remote_path: remote_path.to_string(),
            changes: result.log,
            applied: false,
            backup_path: None,
            sha256: None,
        });
    }

    check_interrupt(interrupt)?;
    let backup = backup_path(remote_path, Local::now());
    store.copy(remote_path, &backup)?;
    info!("backed up {} to {}", remote_path, backup);

    if !confirm(&result.log) {
        return Err(OpError::Declined);
    }
    check_interrupt(interrupt)?;

    let content = result.merged.to_bytes();
    store.write(remote_path, &content)?;

    let expected = sha256_hex(&content);
    let actual = sha256_hex(&store.read(remote_path)?);
    if expected != actual {
        return Err(OpError::VerifyFailed {
            path: remote_path.to_string(),
            expected,
            actual,
        });
    }
    info!("wrote {} bytes to {}", content.len(), remote_path);

    Ok(UpdateReport {
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        changes: result.log,
        applied: true,
        backup_path: Some(backup),
        sha256: Some(expected),
    })
}

/// Copy the device file to a fresh timestamped sibling.
pub fn backup(store: &dyn RemoteStore, remote_path: &str) -> Result<BackupReport, OpError> {
    if !store.exists(remote_path)? {
        return Err(OpError::NotFound(remote_path.to_string()));
    }

    let backup = backup_path(remote_path, Local::now());
    store.copy(remote_path, &backup)?;
    info!("backed up {} to {}", remote_path, backup);

    Ok(BackupReport {
        remote_path: remote_path.to_string(),
        backup_path: backup,
    })
}

/// Copy the most recent backup over the current device file.
///
/// The current file is deliberately not backed up first: that would make
/// the file being discarded the newest backup, and a second restore would
/// bring it straight back. The live file need not exist either; restore
/// is the recovery path when it has been lost.
pub fn restore(
    store: &dyn RemoteStore,
    remote_path: &str,
    interrupt: &InterruptState,
    confirm: &mut dyn FnMut(&BackupInfo) -> bool,
) -> Result<RestoreReport, OpError> {
    let (dir, name) = split_remote_path(remote_path);
    let entries = store.list_dir(&dir)?;
    let latest = latest_backup(&entries, &name)
        .ok_or_else(|| OpError::NoBackups(remote_path.to_string()))?;

    if !confirm(&latest) {
        return Err(OpError::Declined);
    }
    check_interrupt(interrupt)?;

    store.copy(&join_remote(&dir, &latest.name), remote_path)?;
    info!("restored {} from {}", remote_path, latest.name);

    Ok(RestoreReport {
        remote_path: remote_path.to_string(),
        restored_from: latest,
    })
}

/// Fetch the current device file and the backups sitting next to it.
pub fn show(store: &dyn RemoteStore, remote_path: &str) -> Result<ShowReport, OpError> {
    if !store.exists(remote_path)? {
        return Err(OpError::NotFound(remote_path.to_string()));
    }

    let bytes = store.read(remote_path)?;
    let (dir, name) = split_remote_path(remote_path);
    let entries = store.list_dir(&dir)?;

    Ok(ShowReport {
        remote_path: remote_path.to_string(),
        sha256: sha256_hex(&bytes),
        content: String::from_utf8_lossy(&bytes).into_owned(),
        backups: find_backups(&entries, &name),
    })
}

fn read_local(path: &Path) -> Result<ConfigFile, OpError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(ConfigFile::from_bytes(&bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(OpError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(OpError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

fn read_remote(store: &dyn RemoteStore, path: &str) -> Result<ConfigFile, OpError> {
    if !store.exists(path)? {
        return Err(OpError::NotFound(path.to_string()));
    }
    Ok(ConfigFile::from_bytes(&store.read(path)?))
}

fn check_interrupt(interrupt: &InterruptState) -> Result<(), OpError> {
    if interrupt.is_interrupted() {
        return Err(OpError::Interrupted);
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Split a POSIX remote path into (directory, file name).
fn split_remote_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (".".to_string(), path.to_string()),
    }
}

fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_remote_path() {
        assert_eq!(
            split_remote_path("/boot/uEnv.txt"),
            ("/boot".to_string(), "uEnv.txt".to_string())
        );
        assert_eq!(
            split_remote_path("/uEnv.txt"),
            ("/".to_string(), "uEnv.txt".to_string())
        );
        assert_eq!(
            split_remote_path("uEnv.txt"),
            (".".to_string(), "uEnv.txt".to_string())
        );
    }

    #[test]
    fn test_join_remote_root() {
        assert_eq!(join_remote("/", "uEnv.txt"), "/uEnv.txt");
        assert_eq!(join_remote("/boot", "uEnv.txt"), "/boot/uEnv.txt");
    }

    #[test]
    fn test_sha256_hex_known_value() {
        // sha256 of the empty string.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_exit_codes_distinct() {
        let transport = OpError::Transport(TransportError::ConnectionFailed("x".into()));
        let missing = OpError::NotFound("x".into());
        assert_eq!(transport.exit_code(), EXIT_TRANSPORT);
        assert_eq!(missing.exit_code(), EXIT_MISSING_FILE);
        assert_eq!(OpError::Interrupted.exit_code(), EXIT_CODE_INTERRUPTED);
        assert_eq!(OpError::Declined.exit_code(), 1);
    }
}
