//! In-process backend, optionally persisted to a JSON file.
//!
//! Every write runs against a copy of the tables which replaces the live
//! tables only after the file (if any) has been written, so a failed write
//! changes nothing.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::models::{
    AttendanceRecord, AttendanceSession, Church, ChurchId, FirstTimer, FirstTimerId, FtAttendance,
    Group, GroupId, Member, MemberId, NewFirstTimer, NewGroup, NewMember, SavedSession,
    SessionDraft, SessionId,
};
use crate::persist::{read_json, write_json_atomic};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};

/// A row tagged with the church that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Owned<T> {
    church_id: ChurchId,
    #[serde(flatten)]
    row: T,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    last_id: i64,
    #[serde(default)]
    churches: Vec<Church>,
    #[serde(default)]
    groups: Vec<Owned<Group>>,
    #[serde(default)]
    members: Vec<Owned<Member>>,
    #[serde(default)]
    sessions: Vec<Owned<AttendanceSession>>,
    #[serde(default)]
    first_timers: Vec<Owned<FirstTimer>>,
    #[serde(default)]
    ft_attendance: BTreeMap<ChurchId, FtAttendance>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn group_owner(&self, group_id: GroupId) -> Option<ChurchId> {
        self.groups
            .iter()
            .find(|g| g.row.id == group_id)
            .map(|g| g.church_id)
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut Owned<AttendanceSession>> {
        self.sessions
            .iter_mut()
            .find(|s| s.row.id == session_id)
            .ok_or_else(|| Error::NotFound(format!("attendance session {}", session_id)))
    }
}

pub struct LocalBackend {
    tables: Mutex<Tables>,
    path: Option<PathBuf>,
    #[cfg(test)]
    record_faults: AtomicU32,
    #[cfg(test)]
    member_faults: AtomicU32,
}

impl LocalBackend {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::with_tables(Tables::default(), None)
    }

    /// Open the store at `path`, starting empty when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables: Tables = read_json(&path)?.unwrap_or_default();
        info!("Opened local store at {}", path.display());
        Ok(Self::with_tables(tables, Some(path)))
    }

    fn with_tables(tables: Tables, path: Option<PathBuf>) -> Self {
        Self {
            tables: Mutex::new(tables),
            path,
            #[cfg(test)]
            record_faults: AtomicU32::new(0),
            #[cfg(test)]
            member_faults: AtomicU32::new(0),
        }
    }

    /// Register a new church.
    pub async fn create_church(&self, name: &str) -> Result<Church> {
        if name.trim().is_empty() {
            return Err(Error::validation("name", "is required"));
        }
        self.write(|t| {
            let church = Church {
                id: t.next_id(),
                name: name.to_string(),
                visitor_group_id: None,
            };
            t.churches.push(church.clone());
            Ok(church)
        })
        .await
    }

    /// Make the next `count` attendance record writes fail transiently.
    #[cfg(test)]
    pub fn fail_record_writes(&self, count: u32) {
        self.record_faults.store(count, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_record_fault(&self) -> bool {
        self.record_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_record_fault(&self) -> bool {
        false
    }

    /// Make the next `count` member inserts be rejected.
    #[cfg(test)]
    pub fn fail_member_writes(&self, count: u32) {
        self.member_faults.store(count, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_member_fault(&self) -> bool {
        self.member_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_member_fault(&self) -> bool {
        false
    }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> Result<T>) -> Result<T> {
        let tables = self.tables.lock().await;
        f(&tables)
    }

    async fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.lock().await;
        let mut next = tables.clone();
        let value = f(&mut next)?;
        if let Some(ref path) = self.path {
            write_json_atomic(path, &next)?;
        }
        *tables = next;
        Ok(value)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn fetch_church(&self, church_id: ChurchId) -> Result<Church> {
        self.read(|t| {
            t.churches
                .iter()
                .find(|c| c.id == church_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("church {}", church_id)))
        })
        .await
    }

    async fn update_church(&self, church: &Church) -> Result<Church> {
        self.write(|t| {
            let slot = t
                .churches
                .iter_mut()
                .find(|c| c.id == church.id)
                .ok_or_else(|| Error::NotFound(format!("church {}", church.id)))?;
            *slot = church.clone();
            Ok(church.clone())
        })
        .await
    }

    async fn fetch_groups(&self, church_id: ChurchId) -> Result<Vec<Group>> {
        self.read(|t| Ok(owned_by(&t.groups, church_id)))
            .await
    }

    async fn create_group(&self, church_id: ChurchId, group: &NewGroup) -> Result<Group> {
        group.validate()?;
        self.write(|t| {
            let row = Group {
                id: t.next_id(),
                name: group.name.clone(),
                leader: group.leader.clone(),
            };
            t.groups.push(Owned {
                church_id,
                row: row.clone(),
            });
            Ok(row)
        })
        .await
    }

    async fn update_group(&self, group: &Group) -> Result<Group> {
        self.write(|t| {
            let slot = t
                .groups
                .iter_mut()
                .find(|g| g.row.id == group.id)
                .ok_or_else(|| Error::NotFound(format!("group {}", group.id)))?;
            slot.row = group.clone();
            Ok(group.clone())
        })
        .await
    }

    async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        self.write(|t| {
            let before = t.groups.len();
            t.groups.retain(|g| g.row.id != group_id);
            if t.groups.len() == before {
                return Err(Error::NotFound(format!("group {}", group_id)));
            }
            for member in t.members.iter_mut() {
                member.row.group_ids.remove(&group_id);
            }
            Ok(())
        })
        .await
    }

    async fn fetch_members(&self, church_id: ChurchId) -> Result<Vec<Member>> {
        self.read(|t| Ok(owned_by(&t.members, church_id)))
            .await
    }

    async fn create_member(&self, church_id: ChurchId, member: &NewMember) -> Result<Member> {
        let mut created = self
            .create_members(church_id, std::slice::from_ref(member))
            .await?;
        created
            .pop()
            .ok_or_else(|| Error::Server {
                status: 500,
                message: "member insert returned no row".to_string(),
            })
    }

    async fn create_members(&self, church_id: ChurchId, members: &[NewMember]) -> Result<Vec<Member>> {
        for member in members {
            member.validate()?;
        }
        if self.take_member_fault() {
            return Err(Error::Rejected {
                status: 400,
                message: "member insert refused".to_string(),
            });
        }
        self.write(|t| {
            let mut created = Vec::with_capacity(members.len());
            for member in members {
                if let Some(unknown) = member
                    .group_ids
                    .iter()
                    .find(|&&g| t.group_owner(g) != Some(church_id))
                {
                    return Err(Error::NotFound(format!("group {}", unknown)));
                }
                let row = member.clone().into_member(t.next_id());
                t.members.push(Owned {
                    church_id,
                    row: row.clone(),
                });
                created.push(row);
            }
            Ok(created)
        })
        .await
    }

    async fn update_member(&self, member: &Member) -> Result<Member> {
        self.write(|t| {
            let church_id = t
                .members
                .iter()
                .find(|m| m.row.id == member.id)
                .map(|m| m.church_id)
                .ok_or_else(|| Error::NotFound(format!("member {}", member.id)))?;
            if let Some(unknown) = member
                .group_ids
                .iter()
                .find(|&&g| t.group_owner(g) != Some(church_id))
            {
                return Err(Error::NotFound(format!("group {}", unknown)));
            }
            if let Some(slot) = t.members.iter_mut().find(|m| m.row.id == member.id) {
                slot.row = member.clone();
            }
            Ok(member.clone())
        })
        .await
    }

    async fn delete_member(&self, member_id: MemberId) -> Result<()> {
        self.write(|t| {
            let before = t.members.len();
            t.members.retain(|m| m.row.id != member_id);
            if t.members.len() == before {
                return Err(Error::NotFound(format!("member {}", member_id)));
            }
            Ok(())
        })
        .await
    }

    async fn fetch_attendance(&self, church_id: ChurchId) -> Result<Vec<AttendanceSession>> {
        self.read(|t| Ok(owned_by(&t.sessions, church_id)))
            .await
    }

    async fn save_attendance_session(
        &self,
        church_id: ChurchId,
        draft: &SessionDraft,
    ) -> Result<SavedSession> {
        // Step one: find or create the session row and clear its records.
        let session_id = self
            .write(|t| {
                if t.group_owner(draft.group_id) != Some(church_id) {
                    return Err(Error::NotFound(format!("group {}", draft.group_id)));
                }
                let existing = t
                    .sessions
                    .iter()
                    .find(|s| {
                        s.church_id == church_id
                            && s.row.group_id == draft.group_id
                            && s.row.date == draft.date
                    })
                    .map(|s| s.row.id);

                let id = match (draft.id, existing) {
                    (Some(id), Some(other)) if other != id => {
                        return Err(Error::Conflict(format!(
                            "group {} already has session {} on {}",
                            draft.group_id, other, draft.date
                        )));
                    }
                    (Some(id), _) => {
                        let session = t.session_mut(id)?;
                        if session.church_id != church_id {
                            return Err(Error::NotFound(format!("attendance session {}", id)));
                        }
                        session.row.group_id = draft.group_id;
                        session.row.date = draft.date;
                        id
                    }
                    (None, Some(id)) => {
                        debug!("Reusing session {} for group {} on {}", id, draft.group_id, draft.date);
                        id
                    }
                    (None, None) => {
                        let id = t.next_id();
                        t.sessions.push(Owned {
                            church_id,
                            row: AttendanceSession {
                                id,
                                group_id: draft.group_id,
                                date: draft.date,
                                records: Vec::new(),
                            },
                        });
                        id
                    }
                };
                t.session_mut(id)?.row.records.clear();
                Ok(id)
            })
            .await?;

        // Step two: write the new records.
        if self.take_record_fault() {
            return Err(Error::PartialWrite(Box::new(Error::Network(
                "record insert interrupted".to_string(),
            ))));
        }
        let records: Vec<AttendanceRecord> = draft.records.clone();
        self.write(|t| {
            t.session_mut(session_id)?.row.records = records;
            Ok(())
        })
        .await
        .map_err(|e| Error::PartialWrite(Box::new(e)))?;

        Ok(SavedSession {
            id: session_id,
            group_id: draft.group_id,
            date: draft.date,
        })
    }

    async fn delete_attendance_session(&self, session_id: SessionId) -> Result<()> {
        self.write(|t| {
            let before = t.sessions.len();
            t.sessions.retain(|s| s.row.id != session_id);
            if t.sessions.len() == before {
                return Err(Error::NotFound(format!("attendance session {}", session_id)));
            }
            Ok(())
        })
        .await
    }

    async fn fetch_first_timers(&self, church_id: ChurchId) -> Result<Vec<FirstTimer>> {
        self.read(|t| Ok(owned_by(&t.first_timers, church_id)))
            .await
    }

    async fn create_first_timer(&self, church_id: ChurchId, visitor: &NewFirstTimer) -> Result<FirstTimer> {
        visitor.validate()?;
        self.write(|t| {
            let row = FirstTimer::new(t.next_id(), visitor.clone());
            t.first_timers.push(Owned {
                church_id,
                row: row.clone(),
            });
            Ok(row)
        })
        .await
    }

    async fn update_first_timer(&self, visitor: &FirstTimer) -> Result<FirstTimer> {
        let visitor = visitor.clone().normalized();
        self.write(|t| {
            let slot = t
                .first_timers
                .iter_mut()
                .find(|f| f.row.id == visitor.id)
                .ok_or_else(|| Error::NotFound(format!("first timer {}", visitor.id)))?;
            slot.row = visitor.clone();
            Ok(visitor)
        })
        .await
    }

    async fn delete_first_timer(&self, first_timer_id: FirstTimerId) -> Result<()> {
        self.write(|t| {
            let church_id = t
                .first_timers
                .iter()
                .find(|f| f.row.id == first_timer_id)
                .map(|f| f.church_id)
                .ok_or_else(|| Error::NotFound(format!("first timer {}", first_timer_id)))?;

            t.first_timers.retain(|f| f.row.id != first_timer_id);
            t.members
                .retain(|m| m.row.first_timer_id != Some(first_timer_id));
            if let Some(map) = t.ft_attendance.get_mut(&church_id) {
                for present in map.values_mut() {
                    present.remove(&first_timer_id);
                }
                map.retain(|_, present| !present.is_empty());
            }
            Ok(())
        })
        .await
    }

    async fn fetch_ft_attendance(&self, church_id: ChurchId) -> Result<FtAttendance> {
        self.read(|t| Ok(t.ft_attendance.get(&church_id).cloned().unwrap_or_default()))
            .await
    }

    async fn save_ft_attendance(&self, church_id: ChurchId, attendance: &FtAttendance) -> Result<()> {
        self.write(|t| {
            t.ft_attendance.insert(church_id, attendance.clone());
            Ok(())
        })
        .await
    }
}

fn owned_by<T: Clone>(rows: &[Owned<T>], church_id: ChurchId) -> Vec<T> {
    rows.iter()
        .filter(|r| r.church_id == church_id)
        .map(|r| r.row.clone())
        .collect()
}
