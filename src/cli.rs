//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{FirstTimerId, GroupId, MemberId, MemberRef, MemberStatus, SessionId};
use crate::sms::SmsKind;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Flockroll - church membership and attendance administration
///
/// Take attendance per group, follow up with absentees, welcome first-time
/// visitors and review monthly attendance.
///
/// Examples:
///   flockroll church create "Grace Chapel"
///   flockroll --church 1 attendance take --group 2 --absent 14,15 --all-present
///   flockroll --church 1 absentees
///   flockroll --church 1 report month 2025-02 --format json
///   flockroll init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .flockroll.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Church to operate on
    #[arg(long, value_name = "ID", env = "FLOCKROLL_CHURCH", global = true)]
    pub church: Option<i64>,

    /// Access token of the signed-in user
    #[arg(long, value_name = "TOKEN", env = "FLOCKROLL_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub access_token: Option<String>,

    /// Output format for reports (markdown, json)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub format: Option<OutputFormat>,

    /// Write reports to this file instead of stdout
    #[arg(short, long, value_name = "FILE", global = true)]
    pub output: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List absentees of each group's latest (or a chosen) session
    Absentees {
        #[arg(long, value_name = "ID")]
        group: Option<GroupId>,

        /// Use the sessions held on this date instead of the latest ones
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// Only list the dates that have sessions
        #[arg(long, conflicts_with = "date")]
        list_dates: bool,
    },

    /// Attendance reports
    #[command(subcommand)]
    Report(ReportCommand),

    /// Take or delete attendance
    #[command(subcommand)]
    Attendance(AttendanceCommand),

    /// Record whether an absentee was reached
    FollowUp {
        #[arg(long, value_name = "ID")]
        session: SessionId,

        /// Member id, or the recorded name for records without one
        #[arg(long, value_name = "MEMBER", value_parser = parse_member_ref)]
        member: MemberRef,

        #[arg(long)]
        reached: Option<bool>,

        #[arg(long, value_name = "TEXT")]
        note: Option<String>,
    },

    #[command(subcommand)]
    Member(MemberCommand),

    #[command(subcommand)]
    Group(GroupCommand),

    /// First-time visitors
    #[command(subcommand)]
    Visitor(VisitorCommand),

    #[command(subcommand)]
    Sms(SmsCommand),

    #[command(subcommand)]
    Church(ChurchCommand),

    /// Generate a default .flockroll.toml configuration file
    InitConfig,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ReportCommand {
    /// Summary, per-group breakdown and most absent members of one month
    Month {
        #[arg(value_name = "YYYY-MM")]
        month: crate::attendance::YearMonth,

        #[arg(long, value_name = "ID")]
        group: Option<GroupId>,
    },
    /// Attendance rate of every month in a year
    Year {
        year: i32,

        #[arg(long, value_name = "ID")]
        group: Option<GroupId>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AttendanceCommand {
    /// Mark attendance for a group; re-running for the same date edits it
    Take {
        #[arg(long, value_name = "ID")]
        group: GroupId,

        /// Defaults to today
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        #[arg(long, value_name = "IDS", value_delimiter = ',')]
        present: Vec<MemberId>,

        #[arg(long, value_name = "IDS", value_delimiter = ',')]
        absent: Vec<MemberId>,

        /// Mark everyone not listed in --absent as present
        #[arg(long, conflicts_with = "present")]
        all_present: bool,
    },
    /// Delete a session and its follow-ups
    Delete { session: SessionId },
}

#[derive(Subcommand, Debug, Clone)]
pub enum MemberCommand {
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        phone: String,

        #[arg(long)]
        address: Option<String>,

        #[arg(long, value_name = "YYYY-MM-DD")]
        birthday: Option<NaiveDate>,

        #[arg(long = "group", value_name = "IDS", value_delimiter = ',')]
        groups: Vec<GroupId>,
    },
    /// Change fields of an existing member
    Update {
        id: MemberId,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        address: Option<String>,

        #[arg(long)]
        status: Option<MemberStatus>,

        /// Replace the member's groups
        #[arg(long = "group", value_name = "IDS", value_delimiter = ',')]
        groups: Option<Vec<GroupId>>,
    },
    /// Add members from a JSON array
    Import { file: PathBuf },
    List {
        #[arg(long, value_name = "ID")]
        group: Option<GroupId>,
    },
    Remove { id: MemberId },
}

#[derive(Subcommand, Debug, Clone)]
pub enum GroupCommand {
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        leader: Option<String>,
    },
    /// Rename a group or change its leader
    Update {
        id: GroupId,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        leader: Option<String>,
    },
    /// Delete a group; its members are kept
    Remove { id: GroupId },
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum VisitorCommand {
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        phone: String,

        #[arg(long)]
        address: Option<String>,

        /// Defaults to today
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
    /// Record a repeat visit
    Visit {
        id: FirstTimerId,

        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
    Remove { id: FirstTimerId },
    /// List visitors, or only those present on a date
    List {
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SmsCommand {
    /// Send a message; `{name}` is replaced with each recipient's name
    Send {
        #[arg(long)]
        message: String,

        #[arg(long, value_enum, default_value = "general")]
        kind: SmsKind,

        #[arg(long, value_enum, default_value = "absentees")]
        to: Audience,

        /// Restrict the audience to one group
        #[arg(long, value_name = "ID")]
        group: Option<GroupId>,

        /// Session date for absentees, or the birthday date (defaults to today)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// Show recipients and the credit estimate without sending
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ChurchCommand {
    /// Register a church in the local data file
    Create { name: String },
}

/// Who an SMS goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Audience {
    Absentees,
    Birthdays,
    Members,
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

fn parse_member_ref(value: &str) -> Result<MemberRef, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("member must not be empty".to_string());
    }
    Ok(match value.parse::<MemberId>() {
        Ok(id) => MemberRef::Id(id),
        Err(_) => MemberRef::Name(value.to_string()),
    })
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(church) = self.church {
            if church <= 0 {
                return Err("Church id must be positive".to_string());
            }
        }

        match self.command {
            Command::Attendance(AttendanceCommand::Take {
                ref present,
                ref absent,
                ..
            }) => {
                if let Some(id) = present.iter().find(|id| absent.contains(id)) {
                    return Err(format!("Member {} is marked both present and absent", id));
                }
            }
            Command::FollowUp { reached, ref note, .. } => {
                if reached.is_none() && note.is_none() {
                    return Err("Nothing to update: pass --reached and/or --note".to_string());
                }
            }
            Command::Sms(SmsCommand::Send { ref message, .. }) => {
                if message.trim().is_empty() {
                    return Err("Message must not be empty".to_string());
                }
            }
            Command::Report(ReportCommand::Year { year, .. }) => {
                if !(1900..=9999).contains(&year) {
                    return Err(format!("Year out of range: {}", year));
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
