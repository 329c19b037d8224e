//! Markdown and JSON rendering of absentee lists and attendance rollups.

use crate::attendance::{GroupAbsentees, MonthSummary, MonthlyReport, YearMonth};
use crate::error::Result;
use crate::followup::{follow_up_key, FollowUpTracker};
use crate::models::{GroupId, MemberId, SessionId};
use crate::workspace::AbsenteeSummary;
use chrono::NaiveDate;
use serde::Serialize;

/// One absentee with their follow-up state.
#[derive(Debug, Clone, Serialize)]
pub struct AbsenteeRow {
    pub name: String,
    pub member_id: Option<MemberId>,
    pub reached: bool,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbsenteeSection {
    pub group_id: GroupId,
    pub group_name: String,
    pub session_id: SessionId,
    pub date: NaiveDate,
    pub absentees: Vec<AbsenteeRow>,
}

/// Absentee list joined with follow-ups, ready to render.
#[derive(Debug, Clone, Serialize)]
pub struct AbsenteeReport {
    pub church: String,
    pub summary: AbsenteeSummary,
    pub groups: Vec<AbsenteeSection>,
}

impl AbsenteeReport {
    /// `summary` is the workspace's count over the same `groups`.
    pub fn build(
        church: &str,
        summary: AbsenteeSummary,
        groups: &[GroupAbsentees<'_>],
        follow_ups: &FollowUpTracker,
    ) -> Self {
        let groups: Vec<AbsenteeSection> = groups
            .iter()
            .map(|g| AbsenteeSection {
                group_id: g.group.id,
                group_name: g.group.name.clone(),
                session_id: g.session.id,
                date: g.session.date,
                absentees: g
                    .absentees
                    .iter()
                    .map(|r| {
                        let entry = follow_ups
                            .get(&follow_up_key(g.session.id, &r.member_ref()))
                            .cloned()
                            .unwrap_or_default();
                        AbsenteeRow {
                            name: r.name.clone(),
                            member_id: r.member_id,
                            reached: entry.reached,
                            note: entry.note,
                        }
                    })
                    .collect(),
            })
            .collect();

        Self {
            church: church.to_string(),
            summary,
            groups,
        }
    }
}

/// Generate the absentee list as Markdown.
pub fn absentee_markdown(report: &AbsenteeReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Absentees: {}\n\n", report.church));
    output.push_str(&format!("- **Absent:** {}\n", report.summary.absent));
    output.push_str(&format!(
        "- **Reached:** {} of {}\n\n",
        report.summary.reached, report.summary.absent
    ));

    if report.groups.is_empty() {
        output.push_str("No attendance has been recorded for the selected groups.\n");
        return output;
    }

    for group in &report.groups {
        output.push_str(&format!("## {} ({})\n\n", group.group_name, group.date));

        if group.absentees.is_empty() {
            output.push_str("Nobody was absent.\n\n");
            continue;
        }

        output.push_str("| Name | Reached | Note |\n");
        output.push_str("|:---|:---:|:---|\n");
        for row in &group.absentees {
            output.push_str(&format!(
                "| {} | {} | {} |\n",
                escape_cell(&row.name),
                if row.reached { "yes" } else { "no" },
                escape_cell(&row.note)
            ));
        }
        output.push('\n');
    }

    output
}

/// Generate a monthly report as Markdown.
pub fn monthly_markdown(church: &str, report: &MonthlyReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "# {}: {}\n\n",
        church,
        month_title(report.month)
    ));

    if report.tally.sessions == 0 {
        output.push_str("No attendance was recorded this month.\n");
        return output;
    }

    output.push_str("## Summary\n\n");
    output.push_str(&format!("- **Sessions:** {}\n", report.tally.sessions));
    output.push_str(&format!(
        "- **Present:** {} of {}\n",
        report.tally.total_present, report.tally.total_records
    ));
    output.push_str(&format!("- **Attendance Rate:** {}%\n\n", report.rate));

    output.push_str("## By Group\n\n");
    output.push_str("| Group | Sessions | Present | Records | Rate |\n");
    output.push_str("|:---|:---:|:---:|:---:|:---:|\n");
    for group in &report.groups {
        output.push_str(&format!(
            "| {} | {} | {} | {} | {}% |\n",
            escape_cell(&group.group_name),
            group.tally.sessions,
            group.tally.total_present,
            group.tally.total_records,
            group.rate
        ));
    }
    output.push('\n');

    if !report.chronic_absentees.is_empty() {
        output.push_str("## Most Absent\n\n");
        output.push_str("| Name | Absences |\n");
        output.push_str("|:---|:---:|\n");
        for absentee in &report.chronic_absentees {
            output.push_str(&format!(
                "| {} | {} |\n",
                escape_cell(&absentee.name),
                absentee.absences
            ));
        }
        output.push('\n');
    }

    output
}

/// Generate a year overview as Markdown. Months without sessions show a dash.
pub fn year_markdown(church: &str, year: i32, months: &[MonthSummary]) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}: {}\n\n", church, year));
    output.push_str("| Month | Sessions | Present | Records | Rate |\n");
    output.push_str("|:---|:---:|:---:|:---:|:---:|\n");

    for summary in months {
        let name = month_name(summary.month);
        if summary.is_empty() {
            output.push_str(&format!("| {} | - | - | - | - |\n", name));
        } else {
            output.push_str(&format!(
                "| {} | {} | {} | {} | {}% |\n",
                name,
                summary.tally.sessions,
                summary.tally.total_present,
                summary.tally.total_records,
                summary.rate
            ));
        }
    }

    output
}

/// Generate any serializable report as pretty JSON.
pub fn generate_json<T: Serialize>(report: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

#[derive(Serialize)]
struct YearOverview<'a> {
    year: i32,
    months: &'a [MonthSummary],
}

pub fn year_json(year: i32, months: &[MonthSummary]) -> Result<String> {
    generate_json(&YearOverview { year, months })
}

fn first_day(month: YearMonth) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(month.year, month.month, 1)
}

fn month_title(month: YearMonth) -> String {
    first_day(month)
        .map(|d| d.format("%B %Y").to_string())
        .unwrap_or_else(|| month.to_string())
}

fn month_name(month: YearMonth) -> String {
    first_day(month)
        .map(|d| d.format("%B").to_string())
        .unwrap_or_else(|| month.to_string())
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
