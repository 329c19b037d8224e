//! Persistence boundary.
//!
//! [`Backend`] is the contract the workspace talks to. [`LocalBackend`] keeps
//! the data in process (optionally in a JSON file), [`RestBackend`] talks to
//! the hosted relational backend.

pub mod local;
pub mod rest;

pub use local::LocalBackend;
pub use rest::RestBackend;

use crate::error::Result;
use crate::models::{
    AttendanceSession, Church, ChurchId, FirstTimer, FirstTimerId, FtAttendance, Group, GroupId,
    Member, MemberId, NewFirstTimer, NewGroup, NewMember, SavedSession, SessionDraft, SessionId,
};
use async_trait::async_trait;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_church(&self, church_id: ChurchId) -> Result<Church>;
    async fn update_church(&self, church: &Church) -> Result<Church>;

    async fn fetch_groups(&self, church_id: ChurchId) -> Result<Vec<Group>>;
    async fn create_group(&self, church_id: ChurchId, group: &NewGroup) -> Result<Group>;
    async fn update_group(&self, group: &Group) -> Result<Group>;
    /// Delete a group and detach it from every member. Members are kept.
    async fn delete_group(&self, group_id: GroupId) -> Result<()>;

    async fn fetch_members(&self, church_id: ChurchId) -> Result<Vec<Member>>;
    async fn create_member(&self, church_id: ChurchId, member: &NewMember) -> Result<Member>;
    async fn create_members(&self, church_id: ChurchId, members: &[NewMember]) -> Result<Vec<Member>>;
    async fn update_member(&self, member: &Member) -> Result<Member>;
    async fn delete_member(&self, member_id: MemberId) -> Result<()>;

    async fn fetch_attendance(&self, church_id: ChurchId) -> Result<Vec<AttendanceSession>>;
    /// Upsert by id, else by (group, date); records are replaced wholesale.
    async fn save_attendance_session(
        &self,
        church_id: ChurchId,
        draft: &SessionDraft,
    ) -> Result<SavedSession>;
    async fn delete_attendance_session(&self, session_id: SessionId) -> Result<()>;

    async fn fetch_first_timers(&self, church_id: ChurchId) -> Result<Vec<FirstTimer>>;
    async fn create_first_timer(&self, church_id: ChurchId, visitor: &NewFirstTimer) -> Result<FirstTimer>;
    async fn update_first_timer(&self, visitor: &FirstTimer) -> Result<FirstTimer>;
    /// Delete a visitor together with the member that mirrors it.
    async fn delete_first_timer(&self, first_timer_id: FirstTimerId) -> Result<()>;

    async fn fetch_ft_attendance(&self, church_id: ChurchId) -> Result<FtAttendance>;
    async fn save_ft_attendance(&self, church_id: ChurchId, attendance: &FtAttendance) -> Result<()>;
}
