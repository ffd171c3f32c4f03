//! uEnv Sync - Boot configuration sync for BeagleBone devices
//!
//! This crate implements uEnv Sync, a small operator tool that merges a
//! locally edited `uEnv.txt` into the copy on a remote BeagleBone over
//! ssh, taking a timestamped backup first and refusing to touch the
//! `uname_r` kernel selection line.

pub mod backup;
pub mod inventory;
pub mod merge;
pub mod ops;
pub mod signal;
pub mod transport;
pub mod uenv;

pub use inventory::{TargetEntry, TargetInventory};
pub use merge::{merge, Change, ChangeLog, MergeResult, PROTECTED_KEY};
pub use ops::OpError;
pub use transport::{MockStore, RemoteStore, SshConfig, SshStore, TransportError};
pub use uenv::{ConfigFile, ConfigLine, LineKind};
