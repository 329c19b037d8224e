//! Follow-up tracking for absentees.
//!
//! Entries are keyed by `"<sessionId>_<memberRef>"` and live on the device
//! only: they are stored as one JSON object in a local file named after
//! [`FOLLOW_UP_STORE_KEY`] and never synced to the backend.

use crate::error::Result;
use crate::models::{AttendanceRecord, FollowUp, FollowUpPatch, MemberRef, SessionId};
use crate::persist::{read_json, write_json_atomic};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fixed key of the local follow-up store.
pub const FOLLOW_UP_STORE_KEY: &str = "flockroll_follow_ups";

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

/// Build the follow-up key for one member of one session.
pub fn follow_up_key(session_id: SessionId, member: &MemberRef) -> String {
    format!("{}_{}", session_id, member)
}

#[derive(Debug, Default)]
pub struct FollowUpTracker {
    entries: BTreeMap<String, FollowUp>,
    path: Option<PathBuf>,
}

impl FollowUpTracker {
    /// A tracker that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Default store location inside `dir`.
    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", FOLLOW_UP_STORE_KEY))
    }

    /// Open the store at `path`. A missing or unreadable file starts empty.
    ///
    /// An unreadable file is moved to `<path>.corrupt` before anything is
    /// saved over it. If it cannot be moved, the tracker stays in memory.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries: BTreeMap<String, FollowUp> = match read_json(&path) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                let backup = corrupt_path(&path);
                if let Err(move_err) = std::fs::rename(&path, &backup) {
                    warn!(
                        "Unreadable follow-up store {} ({}) could not be moved aside: {}; changes will not be saved",
                        path.display(),
                        e,
                        move_err
                    );
                    return Self::in_memory();
                }
                warn!(
                    "Unreadable follow-up store {} moved to {}: {}",
                    path.display(),
                    backup.display(),
                    e
                );
                BTreeMap::new()
            }
        };
        debug!("Loaded {} follow-up entries", entries.len());

        Self {
            entries,
            path: Some(path),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FollowUp> {
        self.entries.get(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `patch` into the entry at `key`, creating it with defaults when
    /// absent. The entry is replaced whole; if persisting fails the previous
    /// entry is restored and the error returned.
    pub fn update(&mut self, key: &str, patch: &FollowUpPatch) -> Result<FollowUp> {
        let base = self.entries.get(key).cloned().unwrap_or_default();
        let next = patch.apply(&base);
        let previous = self.entries.insert(key.to_string(), next.clone());

        if let Err(e) = self.save() {
            match previous {
                Some(entry) => self.entries.insert(key.to_string(), entry),
                None => self.entries.remove(key),
            };
            return Err(e);
        }

        Ok(next)
    }

    /// Number of `absentees` of `session_id` whose follow-up is marked reached.
    pub fn reached_count<'a>(
        &self,
        absentees: impl IntoIterator<Item = &'a AttendanceRecord>,
        session_id: SessionId,
    ) -> usize {
        absentees
            .into_iter()
            .filter(|r| {
                self.get(&follow_up_key(session_id, &r.member_ref()))
                    .map(|f| f.reached)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Drop every entry belonging to `session_id`. Returns how many were removed.
    pub fn prune_session(&mut self, session_id: SessionId) -> Result<usize> {
        let prefix = format!("{}_", session_id);
        let before = self.entries.len();
        let removed: BTreeMap<String, FollowUp> = self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }
        self.entries.retain(|k, _| !k.starts_with(&prefix));

        if let Err(e) = self.save() {
            self.entries.extend(removed);
            return Err(e);
        }

        Ok(before - self.entries.len())
    }

    /// Write the store, replacing the previous file atomically.
    pub fn save(&self) -> Result<()> {
        match self.path {
            Some(ref path) => write_json_atomic(path, &self.entries),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Presence;
    use tempfile::TempDir;

    #[test]
    fn test_update_creates_with_defaults() {
        let mut tracker = FollowUpTracker::in_memory();
        assert!(tracker.get("S1_M1").is_none());

        let entry = tracker.update("S1_M1", &FollowUpPatch::note("left voicemail")).unwrap();
        assert!(!entry.reached);
        assert_eq!(entry.note, "left voicemail");
    }

    #[test]
    fn test_keys_are_independent_and_merged() {
        let mut tracker = FollowUpTracker::in_memory();
        tracker.update("S1_M2", &FollowUpPatch::note("travelling")).unwrap();
        tracker.update("S1_M1", &FollowUpPatch::reached(true)).unwrap();

        assert_eq!(tracker.get("S1_M2").unwrap().note, "travelling");
        assert!(!tracker.get("S1_M2").unwrap().reached);

        tracker.update("S1_M1", &FollowUpPatch::note("will come next week")).unwrap();
        let entry = tracker.get("S1_M1").unwrap();
        assert!(entry.reached);
        assert_eq!(entry.note, "will come next week");
    }

    #[test]
    fn test_reached_count() {
        let mut tracker = FollowUpTracker::in_memory();
        let absentees = vec![
            AttendanceRecord::new(4, "Kofi", Presence::Absent),
            AttendanceRecord::new(9, "Esi", Presence::Absent),
            AttendanceRecord {
                member_id: None,
                name: "Visitor".to_string(),
                present: Presence::Absent,
            },
        ];

        tracker.update("12_4", &FollowUpPatch::reached(true)).unwrap();
        tracker.update("12_9", &FollowUpPatch::note("no answer")).unwrap();
        tracker.update("12_Visitor", &FollowUpPatch::reached(true)).unwrap();
        tracker.update("13_9", &FollowUpPatch::reached(true)).unwrap();

        assert_eq!(tracker.reached_count(&absentees, 12), 2);
        assert_eq!(tracker.reached_count(&absentees, 13), 1);
    }

    #[test]
    fn test_prune_session_leaves_other_sessions() {
        let mut tracker = FollowUpTracker::in_memory();
        tracker.update("1_4", &FollowUpPatch::reached(true)).unwrap();
        tracker.update("1_5", &FollowUpPatch::reached(true)).unwrap();
        tracker.update("11_4", &FollowUpPatch::reached(true)).unwrap();

        assert_eq!(tracker.prune_session(1).unwrap(), 2);
        assert!(tracker.get("1_4").is_none());
        assert!(tracker.get("11_4").is_some());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = FollowUpTracker::default_path(dir.path());

        let mut tracker = FollowUpTracker::open(&path);
        tracker.update("3_7", &FollowUpPatch::reached(true)).unwrap();
        tracker.update("3_7", &FollowUpPatch::note("prayed together")).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"3_7\""));

        let reopened = FollowUpTracker::open(&path);
        let entry = reopened.get("3_7").unwrap();
        assert!(entry.reached);
        assert_eq!(entry.note, "prayed together");
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = FollowUpTracker::default_path(dir.path());
        std::fs::write(&path, "not json").unwrap();

        let tracker = FollowUpTracker::open(&path);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_corrupt_store_is_kept_aside_before_saving() {
        let dir = TempDir::new().unwrap();
        let path = FollowUpTracker::default_path(dir.path());
        let truncated = r#"{"1_4":{"reached":true,"note":"called"},"#;
        std::fs::write(&path, truncated).unwrap();

        let mut tracker = FollowUpTracker::open(&path);
        tracker.update("2_5", &FollowUpPatch::note("new")).unwrap();

        let backup = corrupt_path(&path);
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), truncated);
        let reopened = FollowUpTracker::open(&path);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("2_5").unwrap().note, "new");
    }
}
