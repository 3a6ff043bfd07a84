//! Snapshot data structures.
//!
//! A [`Snapshot`] identifies one backup artifact in a store. Its name encodes
//! the kind, the revision range it covers and the creation time:
//!
//! ```text
//! Full-00000000-00001000-1700000000.gz
//! Incr-00001001-00001050-1700000300
//! Full-00000000-00001000-1700000000/0000000003   (chunk segment)
//! ```
//!
//! # Example
//!
//! ```
//! use snapstore::{Snapshot, SnapshotKind};
//!
//! let snap = Snapshot::parse("Backup-1700000000/Incr-00000011-00000020-1700000100").unwrap();
//! assert_eq!(snap.kind, SnapshotKind::Incremental);
//! assert_eq!(snap.snap_dir, "Backup-1700000000");
//! assert_eq!(snap.last_revision, 20);
//! assert!(!snap.is_chunk);
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const FINAL_SUFFIX: &str = ".final";

/// Prefix segment of the legacy backup layout.
pub const BACKUP_VERSION_V1: &str = "v1";
/// Prefix segment of the current backup layout.
pub const BACKUP_VERSION_V2: &str = "v2";

/// Kind of snapshot: a full database dump or a range of watched events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotKind {
    #[serde(rename = "Full")]
    Full,
    #[serde(rename = "Incr")]
    Incremental,
}

impl SnapshotKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Incremental => "Incr",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotParseError {
    #[error("empty snapshot path")]
    Empty,
    #[error("invalid snapshot name '{0}': expected <Kind>-<start>-<last>-<created>")]
    Malformed(String),
    #[error("unknown snapshot kind '{0}'")]
    UnknownKind(String),
    #[error("invalid {field} '{value}' in snapshot name")]
    InvalidNumber { field: &'static str, value: String },
    #[error("last revision {last} is lower than start revision {start}")]
    RevisionOrder { start: u64, last: u64 },
}

/// One backup artifact.
///
/// Identity for de-duplication across stores is the pair
/// ([`snap_dir`](Self::snap_dir), [`snap_name`](Self::snap_name)); see [`Snapshot::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub kind: SnapshotKind,
    pub start_revision: u64,
    pub last_revision: u64,
    /// Creation time (unix seconds)
    pub created_on: i64,
    /// Logical directory below the store prefix (empty for the flat v2 layout)
    #[serde(default)]
    pub snap_dir: String,
    /// Object name, `<name>/<chunk>` for chunk segments
    pub snap_name: String,
    /// Store prefix the snapshot was listed under (set by stores, empty on new snapshots)
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub is_chunk: bool,
    /// Compression extension carried in the name, e.g. `.gz`
    #[serde(default)]
    pub compression_suffix: String,
    /// Marks the last snapshot taken before a member shut down
    #[serde(default)]
    pub is_final: bool,
}

impl Snapshot {
    /// Create a new snapshot stamped with the current time.
    pub fn new(kind: SnapshotKind, start_revision: u64, last_revision: u64) -> Self {
        let created_on = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Self::with_created_on(kind, start_revision, last_revision, created_on)
    }

    /// Create a snapshot with an explicit creation timestamp.
    pub fn with_created_on(
        kind: SnapshotKind,
        start_revision: u64,
        last_revision: u64,
        created_on: i64,
    ) -> Self {
        let mut snap = Self {
            kind,
            start_revision,
            last_revision,
            created_on,
            snap_dir: String::new(),
            snap_name: String::new(),
            prefix: String::new(),
            is_chunk: false,
            compression_suffix: String::new(),
            is_final: false,
        };
        snap.snap_name = snap.generate_name();
        snap
    }

    /// Set the compression suffix and regenerate the name.
    #[must_use]
    pub fn with_compression_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.compression_suffix = suffix.into();
        self.snap_name = self.generate_name();
        self
    }

    /// Mark as final snapshot and regenerate the name.
    #[must_use]
    pub fn into_final(mut self) -> Self {
        self.is_final = true;
        self.snap_name = self.generate_name();
        self
    }

    /// Record the store prefix the snapshot was listed under.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Place the snapshot under a logical directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.snap_dir = dir.into();
        self
    }

    fn generate_name(&self) -> String {
        format!(
            "{}-{:08}-{:08}-{}{}{}",
            self.kind,
            self.start_revision,
            self.last_revision,
            self.created_on,
            self.compression_suffix,
            if self.is_final { FINAL_SUFFIX } else { "" },
        )
    }

    /// Parse a store-relative path (`[dir/...]name[/chunk]`) into a snapshot.
    pub fn parse(path: &str) -> Result<Self, SnapshotParseError> {
        let parts: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        let Some(last) = parts.last() else {
            return Err(SnapshotParseError::Empty);
        };

        // A trailing all-digit segment below a snapshot name is a chunk.
        let chunk = parts.len() >= 2
            && last.bytes().all(|b| b.is_ascii_digit())
            && parse_name(parts[parts.len() - 2]).is_ok();
        let name_idx = if chunk { parts.len() - 2 } else { parts.len() - 1 };

        let mut snap = parse_name(parts[name_idx])?;
        snap.snap_dir = parts[..name_idx].join("/");
        if chunk {
            snap.is_chunk = true;
            snap.snap_name = format!("{}/{}", parts[name_idx], last);
        }
        Ok(snap)
    }

    /// De-duplication identity: `(snap_dir, snap_name)`.
    #[must_use]
    pub fn key(&self) -> (&str, &str) {
        (&self.snap_dir, &self.snap_name)
    }

    /// Store-relative path of the snapshot object.
    #[must_use]
    pub fn relative_path(&self) -> String {
        if self.snap_dir.is_empty() {
            self.snap_name.clone()
        } else {
            format!("{}/{}", self.snap_dir, self.snap_name)
        }
    }

    /// Key prefix a store configured with `store_prefix` addresses this
    /// snapshot under.
    ///
    /// A snapshot from the legacy layout (a `v1` segment in its own prefix)
    /// stays under `v1` in a store configured for `v2`: the first `v2`
    /// segment of `store_prefix` is swapped for `v1`. Anything else uses
    /// `store_prefix` unchanged.
    #[must_use]
    pub fn storage_prefix(&self, store_prefix: &str) -> String {
        let legacy = self.prefix.split('/').any(|seg| seg == BACKUP_VERSION_V1);
        let mut segments: Vec<&str> = store_prefix.split('/').collect();
        match segments.iter().position(|seg| *seg == BACKUP_VERSION_V2) {
            Some(idx) if legacy => {
                segments[idx] = BACKUP_VERSION_V1;
                segments.join("/")
            }
            _ => store_prefix.to_string(),
        }
    }

    /// Domain order used by every [`SnapList`]: revision first, full objects
    /// before their chunks, then creation time, then path as a tie-breaker.
    #[must_use]
    pub fn chronological_cmp(&self, other: &Self) -> Ordering {
        self.last_revision
            .cmp(&other.last_revision)
            .then_with(|| self.is_chunk.cmp(&other.is_chunk))
            .then_with(|| self.created_on.cmp(&other.created_on))
            .then_with(|| self.snap_dir.cmp(&other.snap_dir))
            .then_with(|| self.snap_name.cmp(&other.snap_name))
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path())
    }
}

fn parse_name(name: &str) -> Result<Snapshot, SnapshotParseError> {
    let (body, is_final) = match name.strip_suffix(FINAL_SUFFIX) {
        Some(body) => (body, true),
        None => (name, false),
    };

    let tokens: Vec<&str> = body.splitn(4, '-').collect();
    if tokens.len() != 4 {
        return Err(SnapshotParseError::Malformed(name.to_string()));
    }

    let kind = match tokens[0] {
        "Full" => SnapshotKind::Full,
        "Incr" => SnapshotKind::Incremental,
        other => return Err(SnapshotParseError::UnknownKind(other.to_string())),
    };
    let start_revision = parse_number("start revision", tokens[1])?;
    let last_revision = parse_number("last revision", tokens[2])?;
    if last_revision < start_revision {
        return Err(SnapshotParseError::RevisionOrder {
            start: start_revision,
            last: last_revision,
        });
    }

    let (created, suffix) = match tokens[3].find('.') {
        Some(idx) => tokens[3].split_at(idx),
        None => (tokens[3], ""),
    };
    let created_on = i64::try_from(parse_number("creation time", created)?).map_err(|_| {
        SnapshotParseError::InvalidNumber {
            field: "creation time",
            value: created.to_string(),
        }
    })?;

    Ok(Snapshot {
        kind,
        start_revision,
        last_revision,
        created_on,
        snap_dir: String::new(),
        snap_name: name.to_string(),
        prefix: String::new(),
        is_chunk: false,
        compression_suffix: suffix.to_string(),
        is_final,
    })
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, SnapshotParseError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SnapshotParseError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    value
        .parse::<u64>()
        .map_err(|_| SnapshotParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Ordered sequence of snapshots.
///
/// Producers keep entries in [`Snapshot::chronological_cmp`] order; use
/// [`SnapList::sorted`] when building a list from unordered input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapList(Vec<Snapshot>);

impl SnapList {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a list from arbitrary input, sorting it into domain order.
    #[must_use]
    pub fn sorted(mut snapshots: Vec<Snapshot>) -> Self {
        snapshots.sort_by(Snapshot::chronological_cmp);
        Self(snapshots)
    }

    /// Merge two listings with `preferred` winning on `(dir, name)` collisions.
    ///
    /// The result is independent of input order and sorted in domain order.
    #[must_use]
    pub fn merge_preferring(preferred: Self, other: Self) -> Self {
        let mut by_key: HashMap<(String, String), Snapshot> =
            HashMap::with_capacity(preferred.len() + other.len());

        for snap in preferred.0 {
            by_key.insert((snap.snap_dir.clone(), snap.snap_name.clone()), snap);
        }
        for snap in other.0 {
            by_key
                .entry((snap.snap_dir.clone(), snap.snap_name.clone()))
                .or_insert(snap);
        }

        Self::sorted(by_key.into_values().collect())
    }

    /// Drop chunk segments, keeping only whole snapshots.
    #[must_use]
    pub fn without_chunks(self) -> Self {
        Self(self.0.into_iter().filter(|s| !s.is_chunk).collect())
    }

    /// Most recent full snapshot, if any.
    #[must_use]
    pub fn latest_full(&self) -> Option<&Snapshot> {
        self.0
            .iter()
            .rev()
            .find(|s| s.kind == SnapshotKind::Full && !s.is_chunk)
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Snapshot> {
        self.0
    }
}

impl Deref for SnapList {
    type Target = [Snapshot];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for SnapList {
    type Item = Snapshot;
    type IntoIter = std::vec::IntoIter<Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a SnapList {
    type Item = &'a Snapshot;
    type IntoIter = std::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Snapshot> for SnapList {
    fn from_iter<I: IntoIterator<Item = Snapshot>>(iter: I) -> Self {
        Self::sorted(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_name_layout() {
        let snap = Snapshot::with_created_on(SnapshotKind::Full, 0, 1000, 1_700_000_000);
        assert_eq!(snap.snap_name, "Full-00000000-00001000-1700000000");
        assert!(snap.snap_dir.is_empty());
        assert!(!snap.is_chunk);
    }

    #[test]
    fn test_name_with_suffix_and_final() {
        let snap = Snapshot::with_created_on(SnapshotKind::Incremental, 5, 9, 42)
            .with_compression_suffix(".gz")
            .into_final();
        assert_eq!(snap.snap_name, "Incr-00000005-00000009-42.gz.final");

        let parsed = Snapshot::parse(&snap.snap_name).unwrap();
        assert_eq!(parsed, snap);
    }

    #[test]
    fn test_parse_flat_layout() {
        let snap = Snapshot::parse("Full-00000000-00000100-1700000000").unwrap();
        assert_eq!(snap.kind, SnapshotKind::Full);
        assert_eq!(snap.start_revision, 0);
        assert_eq!(snap.last_revision, 100);
        assert_eq!(snap.created_on, 1_700_000_000);
        assert!(snap.compression_suffix.is_empty());
        assert!(!snap.is_final);
    }

    #[test]
    fn test_parse_chunk_segment() {
        let snap = Snapshot::parse("Backup-1/Full-00000000-00000100-1700000000/0000000003").unwrap();
        assert!(snap.is_chunk);
        assert_eq!(snap.snap_dir, "Backup-1");
        assert_eq!(snap.snap_name, "Full-00000000-00000100-1700000000/0000000003");
        assert_eq!(
            snap.relative_path(),
            "Backup-1/Full-00000000-00000100-1700000000/0000000003"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Snapshot::parse(""), Err(SnapshotParseError::Empty));
        assert!(matches!(
            Snapshot::parse("notes.txt"),
            Err(SnapshotParseError::Malformed(_))
        ));
        assert!(matches!(
            Snapshot::parse("Diff-00000000-00000001-1"),
            Err(SnapshotParseError::UnknownKind(_))
        ));
        assert!(matches!(
            Snapshot::parse("Full-0000000a-00000001-1"),
            Err(SnapshotParseError::InvalidNumber { .. })
        ));
        assert_eq!(
            Snapshot::parse("Full-00000009-00000001-1"),
            Err(SnapshotParseError::RevisionOrder { start: 9, last: 1 })
        );
    }

    #[test]
    fn test_parse_rejects_creation_time_beyond_i64() {
        assert_eq!(
            Snapshot::parse("Full-00000000-00000001-18446744073709551615"),
            Err(SnapshotParseError::InvalidNumber {
                field: "creation time",
                value: "18446744073709551615".into(),
            })
        );
        let max = Snapshot::parse("Full-00000000-00000001-9223372036854775807").unwrap();
        assert_eq!(max.created_on, i64::MAX);
    }

    #[test]
    fn test_storage_prefix_keeps_legacy_snapshots_under_v1() {
        let legacy = Snapshot::with_created_on(SnapshotKind::Full, 0, 10, 1).with_prefix("etcd-main/v1");
        assert_eq!(legacy.storage_prefix("etcd-main/v2"), "etcd-main/v1");
        assert_eq!(legacy.storage_prefix("v2"), "v1");
        // Only the first v2 segment is rewritten
        assert_eq!(legacy.storage_prefix("v2/cluster/v2"), "v1/cluster/v2");
        // Stores without a v2 segment are left alone
        assert_eq!(legacy.storage_prefix("etcd-main/v3"), "etcd-main/v3");

        let current = Snapshot::with_created_on(SnapshotKind::Full, 0, 10, 1).with_prefix("etcd-main/v2");
        assert_eq!(current.storage_prefix("etcd-main/v2"), "etcd-main/v2");
        let fresh = Snapshot::with_created_on(SnapshotKind::Full, 0, 10, 1);
        assert_eq!(fresh.storage_prefix("v2"), "v2");
        // "v10" is not the v1 layout
        let other = Snapshot::with_created_on(SnapshotKind::Full, 0, 10, 1).with_prefix("backups/v10");
        assert_eq!(other.storage_prefix("v2"), "v2");
    }

    #[test]
    fn test_chronological_order() {
        let older = Snapshot::with_created_on(SnapshotKind::Full, 0, 10, 100);
        let newer = Snapshot::with_created_on(SnapshotKind::Incremental, 11, 20, 50);
        let mut chunk = older.clone();
        chunk.is_chunk = true;
        chunk.snap_name = format!("{}/0000000001", older.snap_name);

        let list = SnapList::sorted(vec![newer.clone(), chunk.clone(), older.clone()]);
        let names: Vec<&str> = list.iter().map(|s| s.snap_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                older.snap_name.as_str(),
                chunk.snap_name.as_str(),
                newer.snap_name.as_str()
            ]
        );
    }

    #[test]
    fn test_merge_prefers_first_list() {
        let mut primary_x = Snapshot::with_created_on(SnapshotKind::Full, 0, 1, 10).in_dir("A");
        primary_x.snap_name = "X".into();
        let mut secondary_x = Snapshot::with_created_on(SnapshotKind::Full, 0, 2, 10).in_dir("A");
        secondary_x.snap_name = "X".into();
        let mut secondary_y = Snapshot::with_created_on(SnapshotKind::Full, 0, 3, 10).in_dir("B");
        secondary_y.snap_name = "Y".into();

        let merged = SnapList::merge_preferring(
            SnapList::sorted(vec![primary_x.clone()]),
            SnapList::sorted(vec![secondary_x, secondary_y.clone()]),
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], primary_x);
        assert_eq!(merged[1], secondary_y);
    }

    #[test]
    fn test_without_chunks_and_latest_full() {
        let full = Snapshot::with_created_on(SnapshotKind::Full, 0, 10, 1);
        let incr = Snapshot::with_created_on(SnapshotKind::Incremental, 11, 12, 2);
        let chunk = Snapshot::parse(&format!("{}/0000000001", full.snap_name)).unwrap();

        let list = SnapList::sorted(vec![incr.clone(), chunk, full.clone()]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.latest_full(), Some(&full));

        let list = list.without_chunks();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|s| !s.is_chunk));
    }

    #[test]
    fn test_serde_roundtrip_keeps_identity() {
        let snap = Snapshot::with_created_on(SnapshotKind::Full, 1, 2, 3).in_dir("Backup-3");
        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key(), snap.key());
    }
}
