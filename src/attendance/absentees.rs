//! Absentee aggregation.
//!
//! For each group, picks the relevant session (the latest one or the one on
//! an explicit date) and extracts the records explicitly marked absent.

use crate::models::{AttendanceRecord, AttendanceSession, Group, GroupId};
use chrono::NaiveDate;
use serde::Serialize;

/// Which groups to include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupFilter {
    #[default]
    All,
    Only(GroupId),
}

impl GroupFilter {
    pub fn matches(&self, group_id: GroupId) -> bool {
        match self {
            GroupFilter::All => true,
            GroupFilter::Only(id) => *id == group_id,
        }
    }
}

impl From<Option<GroupId>> for GroupFilter {
    fn from(value: Option<GroupId>) -> Self {
        value.map(GroupFilter::Only).unwrap_or(GroupFilter::All)
    }
}

/// Which session of a group to look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateSelection {
    #[default]
    LatestPerGroup,
    On(NaiveDate),
}

/// Absentees of one group's selected session.
#[derive(Debug, Clone, Serialize)]
pub struct GroupAbsentees<'a> {
    pub group: &'a Group,
    pub session: &'a AttendanceSession,
    pub absentees: Vec<&'a AttendanceRecord>,
}

/// Compute the absentee list per group.
///
/// Groups keep their order in `groups`; absentees keep record order. Groups
/// without a matching session are left out.
pub fn absentees_by_group<'a>(
    groups: &'a [Group],
    sessions: &'a [AttendanceSession],
    filter: GroupFilter,
    selection: DateSelection,
) -> Vec<GroupAbsentees<'a>> {
    groups
        .iter()
        .filter(|g| filter.matches(g.id))
        .filter_map(|group| {
            let session = select_session(group.id, sessions, selection)?;
            Some(GroupAbsentees {
                group,
                session,
                absentees: session.absentees().collect(),
            })
        })
        .collect()
}

fn select_session(
    group_id: GroupId,
    sessions: &[AttendanceSession],
    selection: DateSelection,
) -> Option<&AttendanceSession> {
    let mut of_group = sessions.iter().filter(|s| s.group_id == group_id);
    match selection {
        DateSelection::LatestPerGroup => of_group.max_by_key(|s| s.date),
        DateSelection::On(date) => of_group.find(|s| s.date == date),
    }
}

/// Distinct session dates for the filtered groups, newest first.
pub fn session_dates(sessions: &[AttendanceSession], filter: GroupFilter) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = sessions
        .iter()
        .filter(|s| filter.matches(s.group_id))
        .map(|s| s.date)
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();
    dates
}
