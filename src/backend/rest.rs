//! Hosted relational backend reached over its REST interface.
//!
//! Tables live under `/rest/v1/<table>`; filters use the `column=eq.value`
//! query syntax. Every request carries the project key in `apikey` and the
//! signed-in user's token as a bearer credential.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::models::{
    AttendanceRecord, AttendanceSession, Church, ChurchId, FirstTimer, FirstTimerId, FtAttendance,
    Group, GroupId, Member, MemberId, NewFirstTimer, NewGroup, NewMember, Presence, SavedSession,
    SessionDraft, SessionId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Error body returned by the backend.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Turn an unsuccessful response body into a classified error.
fn parse_error(status: u16, body: &str) -> Error {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.to_string());
    Error::from_status(status, parsed.code.as_deref(), message)
}

/// A row payload tagged with its church.
#[derive(Debug, Serialize)]
struct WithChurch<'a, T> {
    church_id: ChurchId,
    #[serde(flatten)]
    row: &'a T,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ChurchRef {
    church_id: ChurchId,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRow {
    id: SessionId,
    group_id: GroupId,
    date: NaiveDate,
    #[serde(default)]
    attendance_records: Vec<RecordRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordRow {
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default)]
    member_id: Option<MemberId>,
    name: String,
    #[serde(default)]
    present: Presence,
    #[serde(default)]
    position: usize,
}

impl From<SessionRow> for AttendanceSession {
    fn from(mut row: SessionRow) -> Self {
        row.attendance_records.sort_by_key(|r| r.position);
        AttendanceSession {
            id: row.id,
            group_id: row.group_id,
            date: row.date,
            records: row
                .attendance_records
                .into_iter()
                .map(|r| AttendanceRecord {
                    member_id: r.member_id,
                    name: r.name,
                    present: r.present,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FtAttendanceRow {
    church_id: ChurchId,
    attendance: FtAttendance,
}

pub struct RestBackend {
    http: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str, timeout_seconds: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        })
    }

    /// Act on behalf of a signed-in user.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.request_with_prefer(method, table, "return=representation")
    }

    /// `prefer` is the only `Prefer` header the request carries.
    fn request_with_prefer(&self, method: Method, table: &str, prefer: &str) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.http
            .request(method, self.table_url(table))
            .header("apikey", &self.anon_key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", bearer))
            .header("Prefer", prefer)
    }

    fn ft_attendance_upsert(&self, church_id: ChurchId, attendance: &FtAttendance) -> RequestBuilder {
        self.request_with_prefer(
            Method::POST,
            "ft_attendance",
            "resolution=merge-duplicates,return=representation",
        )
        .query(&[("on_conflict", "church_id")])
        .json(&FtAttendanceRow {
            church_id,
            attendance: attendance.clone(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &body));
        }

        Ok(response.json().await?)
    }

    /// Send a request whose response lists the affected rows and require at
    /// least one of them.
    async fn send_one<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let mut rows: Vec<T> = self.send(request).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(what.to_string()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete_where(&self, table: &str, column: &str, value: i64, what: &str) -> Result<()> {
        let request = self
            .request(Method::DELETE, table)
            .query(&[(column, eq(value))]);
        let _: serde_json::Value = self.send_one(request, what).await?;
        Ok(())
    }

    async fn replace_records(&self, session_id: SessionId, records: &[AttendanceRecord]) -> Result<()> {
        let clear = self
            .request(Method::DELETE, "attendance_records")
            .query(&[("session_id", eq(session_id))]);
        let _: Vec<serde_json::Value> = self.send(clear).await?;

        if records.is_empty() {
            return Ok(());
        }
        let rows: Vec<RecordRow> = records
            .iter()
            .enumerate()
            .map(|(position, r)| RecordRow {
                session_id: Some(session_id),
                member_id: r.member_id,
                name: r.name.clone(),
                present: r.present,
                position,
            })
            .collect();
        let insert = self.request(Method::POST, "attendance_records").json(&rows);
        let _: Vec<serde_json::Value> = self.send(insert).await?;
        Ok(())
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl Backend for RestBackend {
    async fn fetch_church(&self, church_id: ChurchId) -> Result<Church> {
        let request = self
            .request(Method::GET, "churches")
            .query(&[("id", eq(church_id))]);
        self.send_one(request, &format!("church {}", church_id)).await
    }

    async fn update_church(&self, church: &Church) -> Result<Church> {
        let request = self
            .request(Method::PATCH, "churches")
            .query(&[("id", eq(church.id))])
            .json(church);
        self.send_one(request, &format!("church {}", church.id)).await
    }

    async fn fetch_groups(&self, church_id: ChurchId) -> Result<Vec<Group>> {
        let request = self
            .request(Method::GET, "groups")
            .query(&[("church_id", eq(church_id)), ("order", "id.asc".to_string())]);
        self.send(request).await
    }

    async fn create_group(&self, church_id: ChurchId, group: &NewGroup) -> Result<Group> {
        group.validate()?;
        let request = self
            .request(Method::POST, "groups")
            .json(&WithChurch { church_id, row: group });
        self.send_one(request, "created group").await
    }

    async fn update_group(&self, group: &Group) -> Result<Group> {
        let request = self
            .request(Method::PATCH, "groups")
            .query(&[("id", eq(group.id))])
            .json(group);
        self.send_one(request, &format!("group {}", group.id)).await
    }

    async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        let request = self
            .request(Method::GET, "members")
            .query(&[("group_ids", format!("cs.{{{}}}", group_id))]);
        let members: Vec<Member> = self.send(request).await?;

        for mut member in members {
            member.group_ids.remove(&group_id);
            self.update_member(&member).await?;
        }
        debug!("Detached group {} from its members", group_id);

        self.delete_where("groups", "id", group_id, &format!("group {}", group_id))
            .await
    }

    async fn fetch_members(&self, church_id: ChurchId) -> Result<Vec<Member>> {
        let request = self
            .request(Method::GET, "members")
            .query(&[("church_id", eq(church_id)), ("order", "name.asc".to_string())]);
        self.send(request).await
    }

    async fn create_member(&self, church_id: ChurchId, member: &NewMember) -> Result<Member> {
        member.validate()?;
        let request = self
            .request(Method::POST, "members")
            .json(&WithChurch { church_id, row: member });
        self.send_one(request, "created member").await
    }

    async fn create_members(&self, church_id: ChurchId, members: &[NewMember]) -> Result<Vec<Member>> {
        for member in members {
            member.validate()?;
        }
        let rows: Vec<WithChurch<'_, NewMember>> = members
            .iter()
            .map(|row| WithChurch { church_id, row })
            .collect();
        let request = self.request(Method::POST, "members").json(&rows);
        self.send(request).await
    }

    async fn update_member(&self, member: &Member) -> Result<Member> {
        let request = self
            .request(Method::PATCH, "members")
            .query(&[("id", eq(member.id))])
            .json(member);
        self.send_one(request, &format!("member {}", member.id)).await
    }

    async fn delete_member(&self, member_id: MemberId) -> Result<()> {
        self.delete_where("members", "id", member_id, &format!("member {}", member_id))
            .await
    }

    async fn fetch_attendance(&self, church_id: ChurchId) -> Result<Vec<AttendanceSession>> {
        let request = self.request(Method::GET, "attendance_sessions").query(&[
            ("church_id", eq(church_id)),
            (
                "select",
                "id,group_id,date,attendance_records(member_id,name,present,position)".to_string(),
            ),
            ("order", "date.desc".to_string()),
        ]);
        let rows: Vec<SessionRow> = self.send(request).await?;
        Ok(rows.into_iter().map(AttendanceSession::from).collect())
    }

    async fn save_attendance_session(
        &self,
        church_id: ChurchId,
        draft: &SessionDraft,
    ) -> Result<SavedSession> {
        #[derive(Serialize)]
        struct SessionFields {
            church_id: ChurchId,
            group_id: GroupId,
            date: NaiveDate,
        }
        let fields = SessionFields {
            church_id,
            group_id: draft.group_id,
            date: draft.date,
        };

        let session_id = match draft.id {
            Some(id) => {
                let request = self
                    .request(Method::PATCH, "attendance_sessions")
                    .query(&[("id", eq(id))])
                    .json(&fields);
                let row: IdRow = self
                    .send_one(request, &format!("attendance session {}", id))
                    .await?;
                row.id
            }
            None => {
                let lookup = self.request(Method::GET, "attendance_sessions").query(&[
                    ("church_id", eq(church_id)),
                    ("group_id", eq(draft.group_id)),
                    ("date", eq(draft.date)),
                    ("select", "id".to_string()),
                ]);
                let existing: Vec<IdRow> = self.send(lookup).await?;
                match existing.first() {
                    Some(row) => {
                        debug!("Reusing session {} for group {} on {}", row.id, draft.group_id, draft.date);
                        row.id
                    }
                    None => {
                        let create = self.request(Method::POST, "attendance_sessions").json(&fields);
                        let row: IdRow = self.send_one(create, "created attendance session").await?;
                        row.id
                    }
                }
            }
        };

        if let Err(e) = self.replace_records(session_id, &draft.records).await {
            warn!("Session {} saved without records: {}", session_id, e);
            return Err(Error::PartialWrite(Box::new(e)));
        }

        Ok(SavedSession {
            id: session_id,
            group_id: draft.group_id,
            date: draft.date,
        })
    }

    async fn delete_attendance_session(&self, session_id: SessionId) -> Result<()> {
        self.delete_where(
            "attendance_sessions",
            "id",
            session_id,
            &format!("attendance session {}", session_id),
        )
        .await
    }

    async fn fetch_first_timers(&self, church_id: ChurchId) -> Result<Vec<FirstTimer>> {
        let request = self
            .request(Method::GET, "first_timers")
            .query(&[("church_id", eq(church_id)), ("order", "date.desc".to_string())]);
        let rows: Vec<FirstTimer> = self.send(request).await?;
        Ok(rows.into_iter().map(FirstTimer::normalized).collect())
    }

    async fn create_first_timer(&self, church_id: ChurchId, visitor: &NewFirstTimer) -> Result<FirstTimer> {
        visitor.validate()?;
        #[derive(Serialize)]
        struct Insert<'a> {
            #[serde(flatten)]
            visitor: &'a NewFirstTimer,
            visits: BTreeSet<NaiveDate>,
        }
        let row = Insert {
            visitor,
            visits: BTreeSet::from([visitor.date]),
        };
        let request = self
            .request(Method::POST, "first_timers")
            .json(&WithChurch { church_id, row: &row });
        let created: FirstTimer = self.send_one(request, "created first timer").await?;
        Ok(created.normalized())
    }

    async fn update_first_timer(&self, visitor: &FirstTimer) -> Result<FirstTimer> {
        let visitor = visitor.clone().normalized();
        let request = self
            .request(Method::PATCH, "first_timers")
            .query(&[("id", eq(visitor.id))])
            .json(&visitor);
        self.send_one(request, &format!("first timer {}", visitor.id))
            .await
    }

    async fn delete_first_timer(&self, first_timer_id: FirstTimerId) -> Result<()> {
        let what = format!("first timer {}", first_timer_id);
        let lookup = self
            .request(Method::GET, "first_timers")
            .query(&[("id", eq(first_timer_id)), ("select", "church_id".to_string())]);
        let owner: ChurchRef = self.send_one(lookup, &what).await?;

        let mirrored = self
            .request(Method::DELETE, "members")
            .query(&[("first_timer_id", eq(first_timer_id))]);
        let _: Vec<serde_json::Value> = self.send(mirrored).await?;
        self.delete_where("first_timers", "id", first_timer_id, &what)
            .await?;

        let mut attendance = self.fetch_ft_attendance(owner.church_id).await?;
        let before = attendance.values().map(|s| s.len()).sum::<usize>();
        for present in attendance.values_mut() {
            present.remove(&first_timer_id);
        }
        attendance.retain(|_, present| !present.is_empty());
        if attendance.values().map(|s| s.len()).sum::<usize>() != before {
            self.save_ft_attendance(owner.church_id, &attendance).await?;
        }
        Ok(())
    }

    async fn fetch_ft_attendance(&self, church_id: ChurchId) -> Result<FtAttendance> {
        let request = self
            .request(Method::GET, "ft_attendance")
            .query(&[("church_id", eq(church_id))]);
        let rows: Vec<FtAttendanceRow> = self.send(request).await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| row.attendance)
            .unwrap_or_default())
    }

    async fn save_ft_attendance(&self, church_id: ChurchId, attendance: &FtAttendance) -> Result<()> {
        let request = self.ft_attendance_upsert(church_id, attendance);
        let _: Vec<serde_json::Value> = self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ft_attendance_upsert_sends_one_prefer_header() {
        let backend = RestBackend::new("https://db.example.org", "anon", 30).unwrap();
        let request = backend
            .ft_attendance_upsert(3, &FtAttendance::new())
            .build()
            .unwrap();

        let prefer: Vec<_> = request.headers().get_all("Prefer").iter().collect();
        assert_eq!(prefer.len(), 1);
        assert_eq!(prefer[0], "resolution=merge-duplicates,return=representation");
        assert_eq!(request.url().query(), Some("on_conflict=church_id"));
    }

    #[test]
    fn test_table_url_trims_slash() {
        let backend = RestBackend::new("https://db.example.org/", "anon", 30).unwrap();
        assert_eq!(
            backend.table_url("members"),
            "https://db.example.org/rest/v1/members"
        );
    }

    #[test]
    fn test_parse_error_uses_backend_code() {
        let stale = parse_error(
            503,
            r#"{"code":"PGRST002","message":"Could not query the database for the schema cache"}"#,
        );
        assert!(matches!(stale, Error::StaleSchema(_)));
        assert!(stale.is_transient());

        let missing = parse_error(404, r#"{"message":"no such row"}"#);
        assert!(matches!(missing, Error::NotFound(ref m) if m == "no such row"));

        let plain = parse_error(502, "Bad Gateway");
        assert!(matches!(plain, Error::Server { status: 502, ref message } if message == "Bad Gateway"));
    }

    #[test]
    fn test_session_row_orders_records_by_position() {
        let row: SessionRow = serde_json::from_str(
            r#"{
                "id": 42, "group_id": 1, "date": "2025-02-16",
                "attendance_records": [
                    {"member_id": 8, "name": "Esi", "present": true, "position": 2},
                    {"member_id": 1, "name": "Ama", "present": true, "position": 0},
                    {"member_id": 4, "name": "Kofi", "present": false, "position": 1}
                ]
            }"#,
        )
        .unwrap();

        let session = AttendanceSession::from(row);
        let ids: Vec<_> = session.records.iter().map(|r| r.member_id).collect();
        assert_eq!(ids, vec![Some(1), Some(4), Some(8)]);
        assert_eq!(session.absentees().count(), 1);
    }

    #[test]
    fn test_member_insert_payload_carries_church() {
        let member = NewMember {
            name: "Kofi".to_string(),
            phone: "0200000000".to_string(),
            group_ids: [1, 2].into_iter().collect(),
            ..Default::default()
        };
        let json = serde_json::to_value(WithChurch {
            church_id: 9,
            row: &member,
        })
        .unwrap();

        assert_eq!(json["church_id"], 9);
        assert_eq!(json["name"], "Kofi");
        assert_eq!(json["group_ids"], serde_json::json!([1, 2]));
        assert_eq!(json["status"], "active");
    }
}
