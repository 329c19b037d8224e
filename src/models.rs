//! Data models for churches, groups, members, attendance and visitors.
//!
//! Dates are calendar dates without a time component and serialize as
//! `YYYY-MM-DD`.
//!
//! Unconfirmed data has its own types (`NewMember`, `SessionDraft`, ...);
//! only the backend hands out the confirmed, id-carrying ones.

use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type ChurchId = i64;
pub type GroupId = i64;
pub type MemberId = i64;
pub type SessionId = i64;
pub type FirstTimerId = i64;

/// A church owns every other record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Church {
    pub id: ChurchId,
    pub name: String,
    /// The group used to take attendance for first-time visitors.
    #[serde(default)]
    pub visitor_group_id: Option<GroupId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub leader: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub leader: Option<String>,
}

impl NewGroup {
    pub fn validate(&self) -> Result<()> {
        require("name", &self.name)
    }
}

/// Membership status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberStatus::Active => write!(f, "active"),
            MemberStatus::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(default)]
    pub group_ids: BTreeSet<GroupId>,
    #[serde(default)]
    pub status: MemberStatus,
    /// Set when the member mirrors a first-time visitor. Deleting that
    /// visitor deletes this member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timer_id: Option<FirstTimerId>,
}

impl Member {
    pub fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("phone", &self.phone)
    }

    pub fn in_group(&self, group_id: GroupId) -> bool {
        self.group_ids.contains(&group_id)
    }

    /// Whether the member's birthday (month and day) falls on `date`.
    pub fn has_birthday_on(&self, date: NaiveDate) -> bool {
        self.birthday
            .map(|b| b.month() == date.month() && b.day() == date.day())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(default)]
    pub group_ids: BTreeSet<GroupId>,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timer_id: Option<FirstTimerId>,
}

impl NewMember {
    pub fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("phone", &self.phone)
    }

    pub fn into_member(self, id: MemberId) -> Member {
        Member {
            id,
            name: self.name,
            phone: self.phone,
            address: self.address,
            birthday: self.birthday,
            group_ids: self.group_ids,
            status: self.status,
            first_timer_id: self.first_timer_id,
        }
    }
}

/// Presence mark on an attendance record. On the wire this is
/// `true`, `false` or `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Presence {
    Present,
    Absent,
    #[default]
    Unmarked,
}

impl From<Option<bool>> for Presence {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Presence::Present,
            Some(false) => Presence::Absent,
            None => Presence::Unmarked,
        }
    }
}

impl From<Presence> for Option<bool> {
    fn from(value: Presence) -> Self {
        match value {
            Presence::Present => Some(true),
            Presence::Absent => Some(false),
            Presence::Unmarked => None,
        }
    }
}

/// Identifies the person behind a record: the member id, or the
/// denormalized name when the id is missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemberRef {
    Id(MemberId),
    Name(String),
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRef::Id(id) => write!(f, "{}", id),
            MemberRef::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(default)]
    pub member_id: Option<MemberId>,
    /// Copied from the member so the record survives member deletion.
    pub name: String,
    #[serde(default)]
    pub present: Presence,
}

impl AttendanceRecord {
    pub fn new(member_id: MemberId, name: impl Into<String>, present: Presence) -> Self {
        Self {
            member_id: Some(member_id),
            name: name.into(),
            present,
        }
    }

    pub fn member_ref(&self) -> MemberRef {
        match self.member_id {
            Some(id) => MemberRef::Id(id),
            None => MemberRef::Name(self.name.clone()),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.present == Presence::Absent
    }
}

/// One attendance-taking event for a group on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: SessionId,
    pub group_id: GroupId,
    pub date: NaiveDate,
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
}

impl AttendanceSession {
    /// Records explicitly marked absent, in record order.
    pub fn absentees(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.iter().filter(|r| r.is_absent())
    }

    pub fn present_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.present == Presence::Present)
            .count()
    }
}

/// Attendance as submitted for saving. `id` is set when editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDraft {
    #[serde(default)]
    pub id: Option<SessionId>,
    pub group_id: GroupId,
    pub date: NaiveDate,
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub id: SessionId,
    pub group_id: GroupId,
    pub date: NaiveDate,
}

/// A person recorded on their first visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstTimer {
    pub id: FirstTimerId,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// First-visit date; always contained in `visits`.
    pub date: NaiveDate,
    #[serde(default)]
    pub visits: BTreeSet<NaiveDate>,
}

impl FirstTimer {
    pub fn new(id: FirstTimerId, visitor: NewFirstTimer) -> Self {
        let mut visits = BTreeSet::new();
        visits.insert(visitor.date);
        Self {
            id,
            name: visitor.name,
            phone: visitor.phone,
            address: visitor.address,
            date: visitor.date,
            visits,
        }
    }

    /// Returns `false` when the visit was already recorded.
    pub fn record_visit(&mut self, date: NaiveDate) -> bool {
        self.visits.insert(date)
    }

    /// Restores the first-visit invariant after deserializing foreign data.
    pub fn normalized(mut self) -> Self {
        self.visits.insert(self.date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFirstTimer {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub date: NaiveDate,
}

impl NewFirstTimer {
    pub fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("phone", &self.phone)
    }
}

/// Visitors present per date, saved as a whole map per church.
pub type FtAttendance = BTreeMap<NaiveDate, BTreeSet<FirstTimerId>>;

/// Follow-up state for one absentee of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    #[serde(default)]
    pub reached: bool,
    #[serde(default)]
    pub note: String,
}

/// Partial update merged into a [`FollowUp`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowUpPatch {
    pub reached: Option<bool>,
    pub note: Option<String>,
}

#[cfg(test)]
impl FollowUpPatch {
    pub fn reached(reached: bool) -> Self {
        Self {
            reached: Some(reached),
            note: None,
        }
    }

    pub fn note(note: impl Into<String>) -> Self {
        Self {
            reached: None,
            note: Some(note.into()),
        }
    }
}

impl FollowUpPatch {
    pub fn apply(&self, base: &FollowUp) -> FollowUp {
        FollowUp {
            reached: self.reached.unwrap_or(base.reached),
            note: self.note.clone().unwrap_or_else(|| base.note.clone()),
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::validation(field, "is required"))
    } else {
        Ok(())
    }
}
