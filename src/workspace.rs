//! The application shell.
//!
//! A [`Workspace`] owns the in-memory mirrors of one church's data and is
//! their only writer. Every mutation is a round trip to the backend; the
//! mirror changes only once the backend has confirmed it, so a failed call
//! leaves local state exactly as it was.

use crate::attendance::{
    self, absentees_by_group, DateSelection, GroupAbsentees, GroupFilter, MonthSummary,
    MonthlyReport, YearMonth,
};
use crate::auth::AuthStore;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::followup::{follow_up_key, FollowUpTracker};
use crate::models::{
    AttendanceRecord, AttendanceSession, Church, ChurchId, FirstTimer, FirstTimerId, FollowUp,
    FollowUpPatch, FtAttendance, Group, GroupId, Member, MemberId, MemberRef, NewFirstTimer,
    NewGroup, NewMember, Presence, SessionDraft, SessionId,
};
use crate::retry::{with_retry, RetryPolicy};
use crate::sms::{Recipient, SmsClient, SmsRequest, SmsResponse};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Name given to the group created for visitor attendance.
pub const VISITOR_GROUP_NAME: &str = "First Timers";

/// Absent and followed-up counts over an absentee list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AbsenteeSummary {
    pub absent: usize,
    pub reached: usize,
}

pub struct Workspace<B: Backend> {
    backend: B,
    retry: RetryPolicy,
    church: Church,
    groups: Vec<Group>,
    members: Vec<Member>,
    sessions: Vec<AttendanceSession>,
    first_timers: Vec<FirstTimer>,
    ft_attendance: FtAttendance,
    follow_ups: FollowUpTracker,
}

impl<B: Backend> Workspace<B> {
    /// Load everything for `church_id` and make sure the visitor group exists.
    pub async fn load(
        backend: B,
        church_id: ChurchId,
        retry: RetryPolicy,
        follow_ups: FollowUpTracker,
    ) -> Result<Self> {
        let (church, groups, members, sessions, first_timers, ft_attendance) = futures::try_join!(
            with_retry(&retry, "fetch_church", || backend.fetch_church(church_id)),
            with_retry(&retry, "fetch_groups", || backend.fetch_groups(church_id)),
            with_retry(&retry, "fetch_members", || backend.fetch_members(church_id)),
            with_retry(&retry, "fetch_attendance", || backend.fetch_attendance(church_id)),
            with_retry(&retry, "fetch_first_timers", || backend.fetch_first_timers(church_id)),
            with_retry(&retry, "fetch_ft_attendance", || backend.fetch_ft_attendance(church_id)),
        )?;

        info!(
            church = %church.name,
            groups = groups.len(),
            members = members.len(),
            sessions = sessions.len(),
            "Loaded church data"
        );

        let mut workspace = Self {
            backend,
            retry,
            church,
            groups,
            members,
            sessions,
            first_timers,
            ft_attendance,
            follow_ups,
        };
        workspace.ensure_visitor_group().await?;
        Ok(workspace)
    }

    pub fn church(&self) -> &Church {
        &self.church
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn sessions(&self) -> &[AttendanceSession] {
        &self.sessions
    }

    pub fn first_timers(&self) -> &[FirstTimer] {
        &self.first_timers
    }

    pub fn ft_attendance(&self) -> &FtAttendance {
        &self.ft_attendance
    }

    pub fn follow_ups(&self) -> &FollowUpTracker {
        &self.follow_ups
    }

    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    pub fn visitor_group_id(&self) -> Option<GroupId> {
        self.church.visitor_group_id
    }

    /// Members of `group_id`, in mirror order.
    pub fn group_members(&self, group_id: GroupId) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(move |m| m.in_group(group_id))
    }

    async fn ensure_visitor_group(&mut self) -> Result<()> {
        if let Some(id) = self.church.visitor_group_id {
            if self.group(id).is_some() {
                return Ok(());
            }
            warn!("Visitor group {} no longer exists, creating a new one", id);
        }

        let group_id = match self.groups.iter().find(|g| g.name == VISITOR_GROUP_NAME) {
            Some(existing) => {
                debug!("Adopting existing visitor group {}", existing.id);
                existing.id
            }
            None => {
                let new = NewGroup {
                    name: VISITOR_GROUP_NAME.to_string(),
                    leader: None,
                };
                let church_id = self.church.id;
                let created = with_retry(&self.retry, "create_group", || {
                    self.backend.create_group(church_id, &new)
                })
                .await?;
                info!("Created visitor group {}", created.id);
                let id = created.id;
                self.groups.push(created);
                id
            }
        };

        let mut church = self.church.clone();
        church.visitor_group_id = Some(group_id);
        self.church = with_retry(&self.retry, "update_church", || {
            self.backend.update_church(&church)
        })
        .await?;
        Ok(())
    }

    // ========== Groups ==========

    pub async fn add_group(&mut self, group: NewGroup) -> Result<&Group> {
        group.validate()?;
        let church_id = self.church.id;
        let created = with_retry(&self.retry, "create_group", || {
            self.backend.create_group(church_id, &group)
        })
        .await?;
        self.groups.push(created);
        Ok(&self.groups[self.groups.len() - 1])
    }

    pub async fn update_group(&mut self, group: Group) -> Result<()> {
        if group.name.trim().is_empty() {
            return Err(Error::validation("name", "is required"));
        }
        self.require_group(group.id)?;

        let updated = with_retry(&self.retry, "update_group", || {
            self.backend.update_group(&group)
        })
        .await?;
        if let Some(slot) = self.groups.iter_mut().find(|g| g.id == updated.id) {
            *slot = updated;
        }
        Ok(())
    }

    /// Delete a group. Its members stay; only their membership is removed.
    pub async fn remove_group(&mut self, group_id: GroupId) -> Result<()> {
        if self.visitor_group_id() == Some(group_id) {
            return Err(Error::validation("group", "the visitor group cannot be removed"));
        }
        self.require_group(group_id)?;

        with_retry(&self.retry, "delete_group", || {
            self.backend.delete_group(group_id)
        })
        .await?;

        self.groups.retain(|g| g.id != group_id);
        for member in self.members.iter_mut() {
            member.group_ids.remove(&group_id);
        }
        Ok(())
    }

    // ========== Members ==========

    pub async fn add_member(&mut self, member: NewMember) -> Result<&Member> {
        member.validate()?;
        self.require_groups(member.group_ids.iter().copied())?;
        let church_id = self.church.id;

        let created = with_retry(&self.retry, "create_member", || {
            self.backend.create_member(church_id, &member)
        })
        .await?;
        self.members.push(created);
        Ok(&self.members[self.members.len() - 1])
    }

    /// Create many members in one call. Nothing is sent if any is invalid.
    pub async fn import_members(&mut self, members: Vec<NewMember>) -> Result<usize> {
        for member in &members {
            member.validate()?;
            self.require_groups(member.group_ids.iter().copied())?;
        }
        if members.is_empty() {
            return Ok(0);
        }
        let church_id = self.church.id;

        let created = with_retry(&self.retry, "create_members", || {
            self.backend.create_members(church_id, &members)
        })
        .await?;
        let count = created.len();
        self.members.extend(created);
        info!("Imported {} members", count);
        Ok(count)
    }

    pub async fn update_member(&mut self, member: Member) -> Result<()> {
        member.validate()?;
        self.require_groups(member.group_ids.iter().copied())?;
        if !self.members.iter().any(|m| m.id == member.id) {
            return Err(Error::NotFound(format!("member {}", member.id)));
        }

        let updated = with_retry(&self.retry, "update_member", || {
            self.backend.update_member(&member)
        })
        .await?;
        if let Some(slot) = self.members.iter_mut().find(|m| m.id == updated.id) {
            *slot = updated;
        }
        Ok(())
    }

    pub async fn remove_member(&mut self, member_id: MemberId) -> Result<()> {
        with_retry(&self.retry, "delete_member", || {
            self.backend.delete_member(member_id)
        })
        .await?;
        self.members.retain(|m| m.id != member_id);
        Ok(())
    }

    // ========== Attendance ==========

    /// A draft for `group_id` on `date` listing every current member of the
    /// group. Members missing from `marks` are left unmarked. When the group
    /// already has a session on that date the draft edits it.
    pub fn attendance_draft(
        &self,
        group_id: GroupId,
        date: NaiveDate,
        marks: &BTreeMap<MemberId, Presence>,
    ) -> Result<SessionDraft> {
        self.require_group(group_id)?;

        let records = self
            .group_members(group_id)
            .map(|m| {
                let present = marks.get(&m.id).copied().unwrap_or_default();
                AttendanceRecord::new(m.id, m.name.clone(), present)
            })
            .collect();
        let id = self
            .sessions
            .iter()
            .find(|s| s.group_id == group_id && s.date == date)
            .map(|s| s.id);

        Ok(SessionDraft {
            id,
            group_id,
            date,
            records,
        })
    }

    /// Save a draft. Saving twice for the same group and date updates the
    /// one session rather than creating a second.
    pub async fn save_attendance(&mut self, draft: SessionDraft) -> Result<SessionId> {
        self.require_group(draft.group_id)?;
        let church_id = self.church.id;

        let saved = with_retry(&self.retry, "save_attendance_session", || {
            self.backend.save_attendance_session(church_id, &draft)
        })
        .await?;

        let session = AttendanceSession {
            id: saved.id,
            group_id: saved.group_id,
            date: saved.date,
            records: draft.records,
        };
        match self.sessions.iter_mut().find(|s| s.id == saved.id) {
            Some(slot) => *slot = session,
            None => self.sessions.push(session),
        }
        info!(session = saved.id, date = %saved.date, "Attendance saved");
        Ok(saved.id)
    }

    /// Delete a session together with its follow-up entries.
    pub async fn delete_session(&mut self, session_id: SessionId) -> Result<()> {
        with_retry(&self.retry, "delete_attendance_session", || {
            self.backend.delete_attendance_session(session_id)
        })
        .await?;
        self.sessions.retain(|s| s.id != session_id);

        match self.follow_ups.prune_session(session_id) {
            Ok(0) => {}
            Ok(n) => debug!("Pruned {} follow-ups of session {}", n, session_id),
            Err(e) => warn!("Failed to prune follow-ups of session {}: {}", session_id, e),
        }
        Ok(())
    }

    pub fn absentees(&self, filter: GroupFilter, selection: DateSelection) -> Vec<GroupAbsentees<'_>> {
        absentees_by_group(&self.groups, &self.sessions, filter, selection)
    }

    pub fn absentee_summary(&self, filter: GroupFilter, selection: DateSelection) -> AbsenteeSummary {
        self.absentees(filter, selection)
            .iter()
            .fold(AbsenteeSummary::default(), |mut acc, g| {
                acc.absent += g.absentees.len();
                acc.reached += self
                    .follow_ups
                    .reached_count(g.absentees.iter().copied(), g.session.id);
                acc
            })
    }

    /// Phone recipients for the absentees that are still members.
    pub fn absentee_recipients(&self, filter: GroupFilter, selection: DateSelection) -> Vec<Recipient> {
        let mut recipients: Vec<Recipient> = Vec::new();
        for record in self
            .absentees(filter, selection)
            .iter()
            .flat_map(|g| g.absentees.iter())
        {
            let member = record
                .member_id
                .and_then(|id| self.members.iter().find(|m| m.id == id));
            match member {
                Some(m) if !recipients.iter().any(|r| r.phone == m.phone) => {
                    recipients.push(Recipient::from(m))
                }
                Some(_) => {}
                None => debug!("Skipping absentee {} with no member record", record.name),
            }
        }
        recipients
    }

    // ========== Follow-ups ==========

    #[cfg(test)]
    pub fn follow_up(&self, session_id: SessionId, member: &MemberRef) -> Option<&FollowUp> {
        self.follow_ups.get(&follow_up_key(session_id, member))
    }

    pub fn update_follow_up(
        &mut self,
        session_id: SessionId,
        member: &MemberRef,
        patch: &FollowUpPatch,
    ) -> Result<FollowUp> {
        if !self.sessions.iter().any(|s| s.id == session_id) {
            return Err(Error::NotFound(format!("attendance session {}", session_id)));
        }
        self.follow_ups
            .update(&follow_up_key(session_id, member), patch)
    }

    // ========== First timers ==========

    /// Record a visitor, mirror them into the visitor group, and mark their
    /// first visit.
    ///
    /// These are three separate writes. When a previous call stopped after
    /// the visitor row, the same visitor (name, phone and first-visit date)
    /// without a mirrored member is picked up again instead of duplicated.
    pub async fn add_first_timer(&mut self, visitor: NewFirstTimer) -> Result<FirstTimer> {
        visitor.validate()?;
        let church_id = self.church.id;
        let visitor_group = self
            .visitor_group_id()
            .ok_or_else(|| Error::NotFound("visitor group".to_string()))?;

        let created = match self.unfinished_first_timer(&visitor) {
            Some(existing) => {
                info!("Resuming visitor {} left without a member record", existing.id);
                existing
            }
            None => {
                let created = with_retry(&self.retry, "create_first_timer", || {
                    self.backend.create_first_timer(church_id, &visitor)
                })
                .await?;
                self.first_timers.push(created.clone());
                created
            }
        };

        let mirrored = NewMember {
            name: created.name.clone(),
            phone: created.phone.clone(),
            address: created.address.clone(),
            group_ids: [visitor_group].into_iter().collect(),
            first_timer_id: Some(created.id),
            ..Default::default()
        };
        let member = with_retry(&self.retry, "create_member", || {
            self.backend.create_member(church_id, &mirrored)
        })
        .await?;
        self.members.push(member);

        self.mark_visitor_present(created.id, created.date).await?;
        Ok(created)
    }

    fn unfinished_first_timer(&self, visitor: &NewFirstTimer) -> Option<FirstTimer> {
        self.first_timers
            .iter()
            .find(|f| {
                f.name == visitor.name
                    && f.phone == visitor.phone
                    && f.date == visitor.date
                    && !self.members.iter().any(|m| m.first_timer_id == Some(f.id))
            })
            .cloned()
    }

    /// Record a later visit of a known visitor.
    pub async fn record_visit(&mut self, first_timer_id: FirstTimerId, date: NaiveDate) -> Result<()> {
        let mut visitor = self
            .first_timers
            .iter()
            .find(|f| f.id == first_timer_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("first timer {}", first_timer_id)))?;

        if visitor.record_visit(date) {
            let updated = with_retry(&self.retry, "update_first_timer", || {
                self.backend.update_first_timer(&visitor)
            })
            .await?;
            if let Some(slot) = self.first_timers.iter_mut().find(|f| f.id == updated.id) {
                *slot = updated;
            }
        }
        self.mark_visitor_present(first_timer_id, date).await
    }

    async fn mark_visitor_present(&mut self, first_timer_id: FirstTimerId, date: NaiveDate) -> Result<()> {
        let mut attendance = self.ft_attendance.clone();
        if !attendance.entry(date).or_default().insert(first_timer_id) {
            return Ok(());
        }
        let church_id = self.church.id;
        with_retry(&self.retry, "save_ft_attendance", || {
            self.backend.save_ft_attendance(church_id, &attendance)
        })
        .await?;
        self.ft_attendance = attendance;
        Ok(())
    }

    /// Delete a visitor and the member mirroring them.
    pub async fn remove_first_timer(&mut self, first_timer_id: FirstTimerId) -> Result<()> {
        with_retry(&self.retry, "delete_first_timer", || {
            self.backend.delete_first_timer(first_timer_id)
        })
        .await?;

        self.first_timers.retain(|f| f.id != first_timer_id);
        self.members
            .retain(|m| m.first_timer_id != Some(first_timer_id));
        for present in self.ft_attendance.values_mut() {
            present.remove(&first_timer_id);
        }
        self.ft_attendance.retain(|_, present| !present.is_empty());
        Ok(())
    }

    // ========== Reports ==========

    pub fn monthly_report(&self, filter: GroupFilter, month: YearMonth) -> MonthlyReport {
        attendance::monthly_report(&self.groups, &self.sessions, filter, month)
    }

    pub fn year_overview(&self, filter: GroupFilter, year: i32) -> Vec<MonthSummary> {
        attendance::year_overview(&self.sessions, filter, year)
    }

    /// Attendance rate over every session of `year`.
    pub fn year_rate(&self, filter: GroupFilter, year: i32) -> u32 {
        attendance::attendance_rate(
            self.sessions
                .iter()
                .filter(|s| filter.matches(s.group_id) && s.date.year() == year),
        )
    }

    // ========== Messaging ==========

    /// Send an SMS as the signed-in user.
    pub async fn send_sms(
        &self,
        auth: &AuthStore,
        client: &SmsClient,
        request: &SmsRequest,
    ) -> Result<SmsResponse> {
        request.validate()?;
        let token = auth.access_token()?;
        client.send(token, request).await
    }

    fn require_group(&self, group_id: GroupId) -> Result<()> {
        self.group(group_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("group {}", group_id)))
    }

    fn require_groups(&self, ids: impl IntoIterator<Item = GroupId>) -> Result<()> {
        for id in ids {
            if self.group(id).is_none() {
                return Err(Error::validation("groups", format!("unknown group {}", id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSession;
    use crate::backend::LocalBackend;
    use crate::sms::SmsKind;
    use std::time::Duration;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn person(name: &str, groups: &[GroupId]) -> NewMember {
        NewMember {
            name: name.to_string(),
            phone: format!("024-{}", name.to_lowercase()),
            group_ids: groups.iter().copied().collect(),
            ..Default::default()
        }
    }

    async fn workspace() -> Workspace<LocalBackend> {
        let backend = LocalBackend::in_memory();
        let church = backend.create_church("Grace Chapel").await.unwrap();
        Workspace::load(backend, church.id, instant(), FollowUpTracker::in_memory())
            .await
            .unwrap()
    }

    async fn youth_with_members(ws: &mut Workspace<LocalBackend>) -> (GroupId, Vec<MemberId>) {
        let youth = ws
            .add_group(NewGroup {
                name: "Youth".to_string(),
                leader: Some("Ama".to_string()),
            })
            .await
            .unwrap()
            .id;
        let mut ids = Vec::new();
        for name in ["Kwesi", "Kofi", "Efua"] {
            ids.push(ws.add_member(person(name, &[youth])).await.unwrap().id);
        }
        (youth, ids)
    }

    fn marks(pairs: &[(MemberId, Presence)]) -> BTreeMap<MemberId, Presence> {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_visitor_group_created_once() {
        let backend = LocalBackend::in_memory();
        let church = backend.create_church("Grace Chapel").await.unwrap();

        let ws = Workspace::load(backend, church.id, instant(), FollowUpTracker::in_memory())
            .await
            .unwrap();
        let visitor_group = ws.visitor_group_id().unwrap();
        assert_eq!(ws.group(visitor_group).unwrap().name, VISITOR_GROUP_NAME);

        let backend = ws.backend;
        let reloaded = Workspace::load(backend, church.id, instant(), FollowUpTracker::in_memory())
            .await
            .unwrap();
        assert_eq!(reloaded.visitor_group_id(), Some(visitor_group));
        assert_eq!(reloaded.groups().len(), 1);
    }

    #[tokio::test]
    async fn test_saving_same_group_and_date_updates_one_session() {
        let mut ws = workspace().await;
        let (youth, ids) = youth_with_members(&mut ws).await;
        let sunday = date("2025-02-16");

        let first = ws
            .attendance_draft(youth, sunday, &marks(&[(ids[0], Presence::Present)]))
            .unwrap();
        let first_id = ws.save_attendance(first).await.unwrap();

        // A fresh draft without the id still lands on the same session.
        let mut second = ws
            .attendance_draft(youth, sunday, &marks(&[(ids[1], Presence::Absent)]))
            .unwrap();
        second.id = None;
        let second_id = ws.save_attendance(second).await.unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(ws.sessions().len(), 1);
        let stored = ws.backend.fetch_attendance(ws.church().id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].absentees().count(), 1);
    }

    #[tokio::test]
    async fn test_draft_snapshots_group_members() {
        let mut ws = workspace().await;
        let (youth, ids) = youth_with_members(&mut ws).await;

        let draft = ws
            .attendance_draft(
                youth,
                date("2025-02-16"),
                &marks(&[(ids[0], Presence::Present), (ids[1], Presence::Absent)]),
            )
            .unwrap();

        assert_eq!(draft.id, None);
        assert_eq!(draft.records.len(), 3);
        assert_eq!(draft.records[1].name, "Kofi");
        assert_eq!(draft.records[2].present, Presence::Unmarked);
    }

    #[tokio::test]
    async fn test_partial_write_heals_on_retry() {
        let mut ws = workspace().await;
        let (youth, ids) = youth_with_members(&mut ws).await;
        ws.backend.fail_record_writes(1);

        let draft = ws
            .attendance_draft(youth, date("2025-02-16"), &marks(&[(ids[2], Presence::Absent)]))
            .unwrap();
        ws.save_attendance(draft).await.unwrap();

        let stored = ws.backend.fetch_attendance(ws.church().id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].records.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_mirror_unchanged() {
        let backend = LocalBackend::in_memory();
        let church = backend.create_church("Grace Chapel").await.unwrap();
        let mut ws = Workspace::load(backend, church.id, RetryPolicy::none(), FollowUpTracker::in_memory())
            .await
            .unwrap();
        let (youth, _) = youth_with_members(&mut ws).await;
        ws.backend.fail_record_writes(1);

        let draft = ws
            .attendance_draft(youth, date("2025-02-16"), &BTreeMap::new())
            .unwrap();
        let result = ws.save_attendance(draft).await;

        assert!(matches!(result, Err(Error::PartialWrite(_))));
        assert!(ws.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_validation_happens_before_backend() {
        let mut ws = workspace().await;
        let result = ws.add_member(person("", &[])).await;
        assert!(matches!(result, Err(Error::Validation { field: "name", .. })));

        let result = ws.add_member(person("Kojo", &[4242])).await;
        assert!(matches!(result, Err(Error::Validation { field: "groups", .. })));

        assert!(ws.members().is_empty());
        assert!(ws.backend.fetch_members(ws.church().id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_group_keeps_members() {
        let mut ws = workspace().await;
        let (youth, ids) = youth_with_members(&mut ws).await;

        ws.remove_group(youth).await.unwrap();

        assert!(ws.group(youth).is_none());
        assert_eq!(ws.members().len(), ids.len());
        assert!(ws.members().iter().all(|m| m.group_ids.is_empty()));

        let visitor_group = ws.visitor_group_id().unwrap();
        assert!(matches!(
            ws.remove_group(visitor_group).await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_group_replaces_mirror_entry() {
        let mut ws = workspace().await;
        let (youth, _) = youth_with_members(&mut ws).await;

        let mut renamed = ws.group(youth).cloned().unwrap();
        renamed.name = "Young Adults".to_string();
        ws.update_group(renamed).await.unwrap();
        assert_eq!(ws.group(youth).unwrap().name, "Young Adults");

        let mut blank = ws.group(youth).cloned().unwrap();
        blank.name = " ".to_string();
        assert!(ws.update_group(blank).await.is_err());
        assert_eq!(ws.group(youth).unwrap().name, "Young Adults");
    }

    #[tokio::test]
    async fn test_absentee_summary_counts_reached() {
        let mut ws = workspace().await;
        let (youth, ids) = youth_with_members(&mut ws).await;
        let draft = ws
            .attendance_draft(
                youth,
                date("2025-02-16"),
                &marks(&[
                    (ids[0], Presence::Present),
                    (ids[1], Presence::Absent),
                    (ids[2], Presence::Absent),
                ]),
            )
            .unwrap();
        let session = ws.save_attendance(draft).await.unwrap();

        ws.update_follow_up(session, &MemberRef::Id(ids[1]), &FollowUpPatch::reached(true))
            .unwrap();
        ws.update_follow_up(session, &MemberRef::Id(ids[1]), &FollowUpPatch::note("sick"))
            .unwrap();

        let summary = ws.absentee_summary(GroupFilter::All, DateSelection::LatestPerGroup);
        assert_eq!(summary, AbsenteeSummary { absent: 2, reached: 1 });
        let entry = ws.follow_up(session, &MemberRef::Id(ids[1])).unwrap();
        assert!(entry.reached);
        assert_eq!(entry.note, "sick");

        assert_eq!(
            ws.absentee_recipients(GroupFilter::All, DateSelection::LatestPerGroup)
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_delete_session_prunes_follow_ups() {
        let mut ws = workspace().await;
        let (youth, ids) = youth_with_members(&mut ws).await;
        let draft = ws
            .attendance_draft(youth, date("2025-02-16"), &marks(&[(ids[0], Presence::Absent)]))
            .unwrap();
        let session = ws.save_attendance(draft).await.unwrap();
        ws.update_follow_up(session, &MemberRef::Id(ids[0]), &FollowUpPatch::reached(true))
            .unwrap();

        ws.delete_session(session).await.unwrap();

        assert!(ws.sessions().is_empty());
        assert!(ws.follow_ups().is_empty());
        assert!(ws
            .update_follow_up(session, &MemberRef::Id(ids[0]), &FollowUpPatch::reached(true))
            .is_err());
    }

    #[tokio::test]
    async fn test_first_timer_lifecycle() {
        let mut ws = workspace().await;
        let visitor_group = ws.visitor_group_id().unwrap();

        let visitor = ws
            .add_first_timer(NewFirstTimer {
                name: "Yaw".to_string(),
                phone: "0241111111".to_string(),
                address: None,
                date: date("2025-03-02"),
            })
            .await
            .unwrap();

        let mirrored: Vec<_> = ws.group_members(visitor_group).collect();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].first_timer_id, Some(visitor.id));
        assert!(ws.ft_attendance()[&date("2025-03-02")].contains(&visitor.id));

        ws.record_visit(visitor.id, date("2025-03-09")).await.unwrap();
        assert_eq!(ws.first_timers()[0].visits.len(), 2);
        assert_eq!(ws.ft_attendance().len(), 2);

        ws.remove_first_timer(visitor.id).await.unwrap();
        assert!(ws.first_timers().is_empty());
        assert_eq!(ws.group_members(visitor_group).count(), 0);
        assert!(ws.ft_attendance().is_empty());
        assert!(ws.backend.fetch_members(ws.church().id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_first_timer_is_resumed() {
        let mut ws = workspace().await;
        let visitor = NewFirstTimer {
            name: "Yaw".to_string(),
            phone: "0241111111".to_string(),
            address: None,
            date: date("2025-03-02"),
        };

        ws.backend.fail_member_writes(1);
        assert!(matches!(
            ws.add_first_timer(visitor.clone()).await,
            Err(Error::Rejected { .. })
        ));
        assert_eq!(ws.first_timers().len(), 1);
        assert!(ws.members().is_empty());

        let resumed = ws.add_first_timer(visitor).await.unwrap();
        assert_eq!(resumed.id, ws.first_timers()[0].id);
        assert_eq!(ws.first_timers().len(), 1);
        assert_eq!(
            ws.backend.fetch_first_timers(ws.church().id).await.unwrap().len(),
            1
        );
        assert_eq!(ws.members()[0].first_timer_id, Some(resumed.id));
        assert!(ws.ft_attendance()[&date("2025-03-02")].contains(&resumed.id));
    }

    #[tokio::test]
    async fn test_monthly_report_from_workspace() {
        let mut ws = workspace().await;
        let (youth, ids) = youth_with_members(&mut ws).await;
        let draft = ws
            .attendance_draft(
                youth,
                date("2025-02-16"),
                &marks(&[
                    (ids[0], Presence::Present),
                    (ids[1], Presence::Absent),
                    (ids[2], Presence::Present),
                ]),
            )
            .unwrap();
        ws.save_attendance(draft).await.unwrap();

        let report = ws.monthly_report(GroupFilter::All, "2025-02".parse().unwrap());
        assert_eq!(report.rate, 67);
        assert_eq!(report.groups[0].group_name, "Youth");

        let year = ws.year_overview(GroupFilter::Only(youth), 2025);
        assert_eq!(year[1].rate, 67);
        assert!(year[0].is_empty());
        assert_eq!(ws.year_rate(GroupFilter::Only(youth), 2025), 67);
        assert_eq!(ws.year_rate(GroupFilter::Only(youth), 2024), 0);
    }

    #[tokio::test]
    async fn test_send_sms_requires_sign_in() {
        let ws = workspace().await;
        let client = SmsClient::new("http://127.0.0.1:9/functions/v1/send-sms", 1).unwrap();
        let mut auth = AuthStore::new();
        auth.initialize(None).unwrap();

        let request = SmsRequest {
            recipients: vec![Recipient {
                name: "Ama".to_string(),
                phone: "0240000000".to_string(),
            }],
            message: "Hello {name}".to_string(),
            kind: SmsKind::General,
        };
        let result = ws.send_sms(&auth, &client, &request).await;
        assert!(matches!(result, Err(Error::Unauthorized)));

        auth.sign_in(AuthSession {
            user_id: "u".to_string(),
            email: None,
            access_token: "t".to_string(),
            church_id: None,
        })
        .unwrap();
        let empty = SmsRequest {
            recipients: vec![],
            ..request
        };
        let result = ws.send_sms(&auth, &client, &empty).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }
}
