//! Monthly and yearly attendance rollups.

use crate::attendance::GroupFilter;
use crate::error::{Error, Result};
use crate::models::{AttendanceSession, Group, GroupId, MemberRef, Presence};
use chrono::Datelike;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How many repeat absentees a period lists.
pub const CHRONIC_ABSENTEE_LIMIT: usize = 8;

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::validation("month", format!("{} is not a month", month)));
        }
        Ok(Self { year, month })
    }

    pub fn contains(&self, session: &AttendanceSession) -> bool {
        session.date.year() == self.year && session.date.month() == self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::validation("month", format!("expected YYYY-MM, got '{}'", s));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

/// Record counts over a set of sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub sessions: usize,
    /// Present, absent and unmarked records.
    pub total_records: usize,
    pub total_present: usize,
}

impl Tally {
    pub fn of<'a>(sessions: impl IntoIterator<Item = &'a AttendanceSession>) -> Self {
        sessions.into_iter().fold(Tally::default(), |mut t, s| {
            t.sessions += 1;
            t.total_records += s.records.len();
            t.total_present += s.present_count();
            t
        })
    }

    /// Percentage present, rounded. Zero when there are no records.
    pub fn rate(&self) -> u32 {
        if self.total_records == 0 {
            return 0;
        }
        (self.total_present as f64 * 100.0 / self.total_records as f64).round() as u32
    }
}

/// Rounded percentage of records marked present.
pub fn attendance_rate<'a>(sessions: impl IntoIterator<Item = &'a AttendanceSession>) -> u32 {
    Tally::of(sessions).rate()
}

/// Sessions matching the group filter, optionally limited to one month.
pub fn filter_sessions(
    sessions: &[AttendanceSession],
    filter: GroupFilter,
    month: Option<YearMonth>,
) -> Vec<&AttendanceSession> {
    sessions
        .iter()
        .filter(|s| filter.matches(s.group_id))
        .filter(|s| month.map(|m| m.contains(s)).unwrap_or(true))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupBreakdown {
    pub group_id: GroupId,
    pub group_name: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub rate: u32,
}

/// Per-group tallies for groups with at least one session, best rate first.
pub fn group_breakdown(groups: &[Group], sessions: &[&AttendanceSession]) -> Vec<GroupBreakdown> {
    let mut rows: Vec<GroupBreakdown> = groups
        .iter()
        .filter_map(|g| {
            let tally = Tally::of(sessions.iter().copied().filter(|s| s.group_id == g.id));
            (tally.sessions > 0).then(|| GroupBreakdown {
                group_id: g.id,
                group_name: g.name.clone(),
                rate: tally.rate(),
                tally,
            })
        })
        .collect();

    rows.sort_by(|a, b| b.rate.cmp(&a.rate));
    rows
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChronicAbsentee {
    pub member: MemberRef,
    pub name: String,
    pub absences: usize,
}

/// Members with the most absences across `sessions`, at most `limit` of them.
///
/// Ties keep the order in which members were first seen absent.
pub fn chronic_absentees(sessions: &[&AttendanceSession], limit: usize) -> Vec<ChronicAbsentee> {
    let mut index: HashMap<MemberRef, usize> = HashMap::new();
    let mut counts: Vec<ChronicAbsentee> = Vec::new();

    for record in sessions.iter().flat_map(|s| s.records.iter()) {
        if record.present != Presence::Absent {
            continue;
        }
        let key = record.member_ref();
        match index.get(&key) {
            Some(&i) => counts[i].absences += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push(ChronicAbsentee {
                    member: key,
                    name: record.name.clone(),
                    absences: 1,
                });
            }
        }
    }

    counts.sort_by(|a, b| b.absences.cmp(&a.absences));
    counts.truncate(limit);
    counts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthSummary {
    pub month: YearMonth,
    #[serde(flatten)]
    pub tally: Tally,
    pub rate: u32,
}

impl MonthSummary {
    /// A month without sessions, as opposed to a month with 0% attendance.
    pub fn is_empty(&self) -> bool {
        self.tally.sessions == 0
    }
}

/// Twelve independent monthly summaries for `year`.
pub fn year_overview(sessions: &[AttendanceSession], filter: GroupFilter, year: i32) -> Vec<MonthSummary> {
    (1..=12)
        .map(|month| {
            let month = YearMonth { year, month };
            let tally = Tally::of(filter_sessions(sessions, filter, Some(month)));
            MonthSummary {
                month,
                rate: tally.rate(),
                tally,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyReport {
    pub month: YearMonth,
    #[serde(flatten)]
    pub tally: Tally,
    pub rate: u32,
    pub groups: Vec<GroupBreakdown>,
    pub chronic_absentees: Vec<ChronicAbsentee>,
}

pub fn monthly_report(
    groups: &[Group],
    sessions: &[AttendanceSession],
    filter: GroupFilter,
    month: YearMonth,
) -> MonthlyReport {
    let in_month = filter_sessions(sessions, filter, Some(month));
    let tally = Tally::of(in_month.iter().copied());

    MonthlyReport {
        month,
        rate: tally.rate(),
        tally,
        groups: group_breakdown(groups, &in_month),
        chronic_absentees: chronic_absentees(&in_month, CHRONIC_ABSENTEE_LIMIT),
    }
}
