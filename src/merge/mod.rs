//! Idempotent line merge for uEnv.txt files.
//!
//! `merge` folds a local desired-state file into the remote copy without
//! dropping anything that exists only on the device, and without ever
//! touching the protected `uname_r` key (the booted-kernel selector).
//! The merge is pure; preview and apply both run this one computation, so
//! what the operator is shown is exactly what gets written.

use std::collections::HashMap;

use serde::Serialize;

use crate::uenv::{ConfigFile, ConfigLine, LineKind};

/// Key selecting the booted kernel version. Owned by the device: never
/// written, added, or altered, whether or not the local file carries it.
pub const PROTECTED_KEY: &str = "uname_r";

/// One decision taken while merging, in local-file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Change {
    /// Protected key present locally; the device copy is left untouched.
    Skip { key: String },
    /// Same key on both sides with different text; replaced in place.
    Update { key: String, old: String, new: String },
    /// Present only locally; appended after the existing remote lines.
    Add { line: String },
    /// Already identical on the device.
    Same { line: String },
}

/// Ordered record of every merge decision, for preview and audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeLog {
    pub entries: Vec<Change>,
}

impl ChangeLog {
    /// True when applying the merge would not modify the remote file.
    pub fn is_noop(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|c| matches!(c, Change::Update { .. } | Change::Add { .. }))
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, Change::Update { .. }))
    }

    pub fn adds(&self) -> usize {
        self.count(|c| matches!(c, Change::Add { .. }))
    }

    pub fn skips(&self) -> usize {
        self.count(|c| matches!(c, Change::Skip { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|c| matches!(c, Change::Same { .. }))
    }

    fn count(&self, pred: impl Fn(&Change) -> bool) -> usize {
        self.entries.iter().filter(|c| pred(c)).count()
    }
}

/// Outcome of a merge: the file to write plus the decisions behind it.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub merged: ConfigFile,
    pub log: ChangeLog,
}

/// Merge `local` (desired state) into `remote` (current device state).
///
/// Remote lines keep their positions; matched lines are replaced in place,
/// new lines are appended in local encounter order, and remote-only lines
/// are always preserved. Duplicate local assignments collapse to their
/// last occurrence, and every comparison runs against the original
/// `remote`, so re-merging the output is a fixed point.
pub fn merge(local: &ConfigFile, remote: &ConfigFile) -> MergeResult {
    let mut replacements: Vec<Option<ConfigLine>> = vec![None; remote.lines.len()];
    let mut appended: Vec<ConfigLine> = Vec::new();
    let mut log = ChangeLog::default();

    // Last local assignment per key, active or commented. Earlier
    // duplicates are shadowed: dropped from both the output and the log.
    let mut last_for_key: HashMap<&str, usize> = HashMap::new();
    for (pos, line) in local.lines.iter().enumerate() {
        if let Some(key) = line.key.as_deref() {
            last_for_key.insert(key, pos);
        }
    }

    for (pos, line) in local.lines.iter().enumerate() {
        if line.kind == LineKind::Blank {
            continue;
        }

        if let Some(key) = line.key.as_deref() {
            if last_for_key.get(key) != Some(&pos) {
                continue;
            }

            if key == PROTECTED_KEY {
                log.entries.push(Change::Skip {
                    key: key.to_string(),
                });
                continue;
            }

            // First remote line with this key wins the scan, commented or
            // not on either side.
            match remote.lines.iter().position(|r| r.has_key(key)) {
                Some(idx) => {
                    let old = &remote.lines[idx].raw;
                    if *old == line.raw {
                        log.entries.push(Change::Same {
                            line: line.raw.clone(),
                        });
                    } else {
                        replacements[idx] = Some(line.clone());
                        log.entries.push(Change::Update {
                            key: key.to_string(),
                            old: old.clone(),
                            new: line.raw.clone(),
                        });
                    }
                }
                None => {
                    appended.push(line.clone());
                    log.entries.push(Change::Add {
                        line: line.raw.clone(),
                    });
                }
            }
        } else {
            // Comment or free text: carried over only if the exact line is
            // not already somewhere on the device.
            if remote.lines.iter().any(|r| r.raw == line.raw) {
                log.entries.push(Change::Same {
                    line: line.raw.clone(),
                });
            } else {
                appended.push(line.clone());
                log.entries.push(Change::Add {
                    line: line.raw.clone(),
                });
            }
        }
    }

    let mut lines = Vec::with_capacity(remote.lines.len() + appended.len());
    for (idx, remote_line) in remote.lines.iter().enumerate() {
        match replacements[idx].take() {
            Some(replacement) => lines.push(replacement),
            None => lines.push(remote_line.clone()),
        }
    }
    lines.extend(appended);

    MergeResult {
        merged: ConfigFile { lines },
        log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(text: &str) -> ConfigFile {
        ConfigFile::parse(text)
    }

    #[test]
    fn test_update_replaces_in_place() {
        let remote = file("a=1\noptargs=quiet\nz=9\n");
        let local = file("optargs=verbose\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "a=1\noptargs=verbose\nz=9\n");
        assert_eq!(result.log.updates(), 1);
        assert_eq!(
            result.log.entries[0],
            Change::Update {
                key: "optargs".to_string(),
                old: "optargs=quiet".to_string(),
                new: "optargs=verbose".to_string(),
            }
        );
    }

    #[test]
    fn test_new_key_appended_at_end() {
        let remote = file("a=1\n");
        let local = file("newvar=1\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "a=1\nnewvar=1\n");
        assert_eq!(result.log.adds(), 1);
    }

    #[test]
    fn test_identical_line_is_same() {
        let remote = file("a=1\n");
        let local = file("a=1\n");
        let result = merge(&local, &remote);

        assert!(result.log.is_noop());
        assert_eq!(result.log.unchanged(), 1);
        assert_eq!(result.merged, remote);
    }

    #[test]
    fn test_protected_key_never_written() {
        let remote = file("uname_r=4.19.94-ti-r42\n");
        let local = file("uname_r=5.10.1\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "uname_r=4.19.94-ti-r42\n");
        assert_eq!(
            result.log.entries,
            vec![Change::Skip {
                key: "uname_r".to_string()
            }]
        );
        assert!(result.log.is_noop());
    }

    #[test]
    fn test_protected_key_not_added_when_remote_lacks_it() {
        let remote = file("a=1\n");
        let local = file("uname_r=5.10.1\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "a=1\n");
        assert_eq!(result.log.skips(), 1);
    }

    #[test]
    fn test_commented_protected_key_still_skipped() {
        let remote = file("uname_r=4.19.94-ti-r42\n");
        let local = file("#uname_r=5.10.1\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "uname_r=4.19.94-ti-r42\n");
        assert_eq!(result.log.skips(), 1);
    }

    #[test]
    fn test_local_line_uncomments_remote_match() {
        // Matching ignores the `#`, so an active local line replaces the
        // commented-out device line in place.
        let remote = file("#dtb=am335x-boneblack.dtb\noptargs=quiet\n");
        let local = file("dtb=am335x-bonegreen.dtb\n");
        let result = merge(&local, &remote);

        assert_eq!(
            result.merged.render(),
            "dtb=am335x-bonegreen.dtb\noptargs=quiet\n"
        );
        assert_eq!(result.log.updates(), 1);
    }

    #[test]
    fn test_commented_local_line_disables_remote_key() {
        let remote = file("enable_uboot_overlays=1\n");
        let local = file("#enable_uboot_overlays=1\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "#enable_uboot_overlays=1\n");
        assert_eq!(result.log.updates(), 1);
    }

    #[test]
    fn test_blank_local_lines_ignored() {
        let remote = file("a=1\n");
        let local = file("\n\na=1\n\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "a=1\n");
        assert_eq!(result.log.entries.len(), 1);
        assert_eq!(result.log.unchanged(), 1);
    }

    #[test]
    fn test_new_comment_appended_once() {
        let remote = file("a=1\n");
        let local = file("# managed by uenv-sync\na=1\n");
        let first = merge(&local, &remote);

        assert_eq!(first.merged.render(), "a=1\n# managed by uenv-sync\n");

        let second = merge(&local, &first.merged);
        assert!(second.log.is_noop());
        assert_eq!(second.merged, first.merged);
    }

    #[test]
    fn test_existing_comment_not_duplicated() {
        let remote = file("# managed by uenv-sync\na=1\n");
        let local = file("# managed by uenv-sync\n");
        let result = merge(&local, &remote);

        assert!(result.log.is_noop());
        assert_eq!(result.merged, remote);
    }

    #[test]
    fn test_remote_only_lines_survive() {
        let remote = file("only_on_device=1\n# device note\n");
        let local = file("newvar=2\n");
        let result = merge(&local, &remote);

        assert_eq!(
            result.merged.render(),
            "only_on_device=1\n# device note\nnewvar=2\n"
        );
    }

    #[test]
    fn test_appends_keep_local_order() {
        let remote = file("a=1\n");
        let local = file("x=1\n# note\ny=2\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "a=1\nx=1\n# note\ny=2\n");
    }

    #[test]
    fn test_first_remote_match_wins() {
        let remote = file("#optargs=old\noptargs=quiet\n");
        let local = file("optargs=verbose\n");
        let result = merge(&local, &remote);

        // The commented line comes first in the scan and takes the update;
        // the active duplicate is left alone.
        assert_eq!(result.merged.render(), "optargs=verbose\noptargs=quiet\n");
    }

    #[test]
    fn test_duplicate_local_keys_last_wins() {
        let remote = file("optargs=quiet\n");
        let local = file("optargs=one\noptargs=two\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "optargs=two\n");
        // The shadowed first assignment leaves no trace in the log.
        assert_eq!(
            result.log.entries,
            vec![Change::Update {
                key: "optargs".to_string(),
                old: "optargs=quiet".to_string(),
                new: "optargs=two".to_string(),
            }]
        );
    }

    #[test]
    fn test_duplicate_new_keys_append_last_only() {
        let remote = file("a=1\n");
        let local = file("newvar=1\nnewvar=2\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "a=1\nnewvar=2\n");
        assert_eq!(result.log.adds(), 1);
    }

    #[test]
    fn test_empty_local_changes_nothing() {
        let remote = file("a=1\n# note\n");
        let result = merge(&file(""), &remote);

        assert!(result.log.entries.is_empty());
        assert_eq!(result.merged, remote);
    }

    #[test]
    fn test_merge_into_empty_remote_appends_everything() {
        let remote = file("");
        let local = file("a=1\n# note\n");
        let result = merge(&local, &remote);

        assert_eq!(result.merged.render(), "a=1\n# note\n");
        assert_eq!(result.log.adds(), 2);
    }

    #[test]
    fn test_changelog_serializes_tagged() {
        let remote = file("optargs=quiet\n");
        let local = file("optargs=verbose\nnewvar=1\n");
        let result = merge(&local, &remote);

        let json = serde_json::to_value(&result.log).unwrap();
        assert_eq!(json[0]["action"], "update");
        assert_eq!(json[0]["key"], "optargs");
        assert_eq!(json[1]["action"], "add");
        assert_eq!(json[1]["line"], "newvar=1");
    }
}
