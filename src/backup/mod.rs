//! Timestamped backups of the remote boot configuration.
//!
//! A backup is a sibling of the target file named
//! `<file>.<%Y%m%d-%H%M%S>.bak`. The stamp sorts lexicographically, so the
//! newest backup is found by name alone; the parsed stamp is carried only
//! for display.

use chrono::{DateTime, Local, NaiveDateTime};
use regex_lite::Regex;
use serde::Serialize;

/// Stamp layout inside a backup name.
pub const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

const STAMP_PATTERN: &str = r"^\d{8}-\d{6}$";

/// Full path for a new backup of `path` taken at `when`.
pub fn backup_path(path: &str, when: DateTime<Local>) -> String {
    format!("{}.{}.bak", path, when.format(STAMP_FORMAT))
}

/// One discovered backup of a target file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// Entry name within the target's directory.
    pub name: String,
    /// Stamp parsed out of the name.
    pub stamp: NaiveDateTime,
}

/// Filter directory entries down to backups of `file_name`, newest first.
///
/// Entries that merely start with the file name (the live file itself,
/// stray `.tmp.` staging leftovers, foreign suffixes) are ignored.
pub fn find_backups(entries: &[String], file_name: &str) -> Vec<BackupInfo> {
    let stamp_re = Regex::new(STAMP_PATTERN).unwrap();

    let mut backups: Vec<BackupInfo> = entries
        .iter()
        .filter_map(|entry| {
            let rest = entry.strip_prefix(file_name)?.strip_prefix('.')?;
            let stamp_str = rest.strip_suffix(".bak")?;
            if !stamp_re.is_match(stamp_str) {
                return None;
            }
            let stamp = NaiveDateTime::parse_from_str(stamp_str, STAMP_FORMAT).ok()?;
            Some(BackupInfo {
                name: entry.clone(),
                stamp,
            })
        })
        .collect();

    backups.sort_by(|a, b| b.name.cmp(&a.name));
    backups
}

/// The most recent backup of `file_name` among `entries`, if any.
pub fn latest_backup(entries: &[String], file_name: &str) -> Option<BackupInfo> {
    find_backups(entries, file_name).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entries(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_backup_path_layout() {
        let when = Local.with_ymd_and_hms(2020, 1, 31, 13, 45, 9).unwrap();
        assert_eq!(
            backup_path("/boot/uEnv.txt", when),
            "/boot/uEnv.txt.20200131-134509.bak"
        );
    }

    #[test]
    fn test_find_backups_newest_first() {
        let names = entries(&[
            "uEnv.txt",
            "uEnv.txt.20200101-000000.bak",
            "uEnv.txt.20210615-120000.bak",
            "uEnv.txt.20200615-120000.bak",
        ]);
        let found = find_backups(&names, "uEnv.txt");

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].name, "uEnv.txt.20210615-120000.bak");
        assert_eq!(found[2].name, "uEnv.txt.20200101-000000.bak");
    }

    #[test]
    fn test_find_backups_ignores_foreign_names() {
        let names = entries(&[
            "uEnv.txt",
            "uEnv.txt.orig",
            "uEnv.txt.tmp.3f2c9a",
            "uEnv.txt.2020-01-01.bak",
            "uEnv.txt.20200101-000000.bak.gz",
            "other.txt.20200101-000000.bak",
        ]);
        assert!(find_backups(&names, "uEnv.txt").is_empty());
    }

    #[test]
    fn test_find_backups_rejects_impossible_stamp() {
        // Shape matches but the date does not parse.
        let names = entries(&["uEnv.txt.20201399-990000.bak"]);
        assert!(find_backups(&names, "uEnv.txt").is_empty());
    }

    #[test]
    fn test_latest_backup() {
        let names = entries(&[
            "uEnv.txt.20200101-000000.bak",
            "uEnv.txt.20200101-000001.bak",
        ]);
        let latest = latest_backup(&names, "uEnv.txt").unwrap();
        assert_eq!(latest.name, "uEnv.txt.20200101-000001.bak");
        assert!(latest_backup(&[], "uEnv.txt").is_none());
    }

    #[test]
    fn test_stamp_parsed_for_display() {
        let names = entries(&["uEnv.txt.20200131-134509.bak"]);
        let found = find_backups(&names, "uEnv.txt");
        assert_eq!(
            found[0].stamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2020-01-31 13:45:09"
        );
    }
}
