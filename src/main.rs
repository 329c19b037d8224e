//! Flockroll - church membership and attendance administration
//!
//! A CLI for taking group attendance, following up with absentees,
//! tracking first-time visitors and reviewing attendance over time.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (validation, backend, configuration, etc.)

mod attendance;
mod auth;
mod backend;
mod cli;
mod config;
mod error;
mod followup;
mod models;
mod persist;
mod report;
mod retry;
mod sms;
mod workspace;

use anyhow::{bail, Context, Result};
use attendance::{DateSelection, GroupFilter};
use auth::{AuthState, AuthStore};
use backend::{Backend, LocalBackend, RestBackend};
use chrono::NaiveDate;
use cli::{
    Args, AttendanceCommand, Audience, ChurchCommand, Command, GroupCommand, MemberCommand,
    OutputFormat, ReportCommand, SmsCommand, VisitorCommand,
};
use config::{BackendKind, Config, CONFIG_FILE_NAME};
use followup::FollowUpTracker;
use models::{FollowUpPatch, MemberStatus, NewFirstTimer, NewGroup, NewMember, Presence};
use report::AbsenteeReport;
use sms::{Recipient, SmsClient, SmsRequest};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use workspace::Workspace;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, &config);

    info!("Flockroll v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(&args, &config).await {
        error!("Command failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Handle init-config: generate a default .flockroll.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to choose the backend, church and SMS function.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags when set.
fn init_logging(args: &Args, config: &Config) {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or use defaults, then apply CLI overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match args.config {
        Some(ref config_path) => Config::load(config_path)?,
        None => Config::load_default()?.unwrap_or_default(),
    };
    config.merge_with_args(args);
    Ok(config)
}

async fn run(args: &Args, config: &Config) -> Result<()> {
    if let Command::Church(ChurchCommand::Create { ref name }) = args.command {
        return create_church(config, name).await;
    }

    match config.backend.kind {
        BackendKind::Local => {
            info!("Using local data file: {}", config.backend.data_file.display());
            let backend = LocalBackend::open(&config.backend.data_file)?;
            run_with(backend, args, config).await
        }
        BackendKind::Remote => {
            if config.backend.url.is_empty() {
                bail!("backend.url must be set for the remote backend");
            }
            info!("Using hosted backend: {}", config.backend.url);
            let mut backend = RestBackend::new(
                &config.backend.url,
                &config.backend.anon_key,
                config.backend.timeout_seconds,
            )?;
            if let Some(ref token) = config.auth.access_token {
                backend = backend.with_token(token.clone());
            }
            run_with(backend, args, config).await
        }
    }
}

async fn create_church(config: &Config, name: &str) -> Result<()> {
    if config.backend.kind != BackendKind::Local {
        bail!("Churches can only be created in the local data file");
    }
    let backend = LocalBackend::open(&config.backend.data_file)?;
    let church = backend.create_church(name).await?;
    println!("✅ Created church '{}' with id {}", church.name, church.id);
    Ok(())
}

async fn run_with<B: Backend>(backend: B, args: &Args, config: &Config) -> Result<()> {
    let church_id = config
        .general
        .church_id
        .context("No church selected: pass --church or set general.church_id")?;

    let mut auth = AuthStore::new();
    auth.subscribe(|state| match state {
        AuthState::SignedIn(session) => debug!("Signed in as {}", session.user_id),
        AuthState::SignedOut => debug!("Signed out"),
        AuthState::Uninitialized => {}
    });
    auth.initialize(config.restored_session())?;

    let follow_ups = FollowUpTracker::open(&config.storage.follow_up_file);
    let mut ws = Workspace::load(backend, church_id, config.retry.policy(), follow_ups)
        .await
        .with_context(|| format!("Failed to load church {}", church_id))?;
    if auth.session().is_some() {
        auth.set_church(church_id)?;
    }

    let format = config.general.format;

    match args.command {
        Command::Absentees {
            group,
            date,
            list_dates,
        } => {
            let filter = GroupFilter::from(group);
            if list_dates {
                for date in attendance::session_dates(ws.sessions(), filter) {
                    println!("{}", date);
                }
                return Ok(());
            }

            let selection = date.map(DateSelection::On).unwrap_or_default();
            let summary = ws.absentee_summary(filter, selection);
            info!(absent = summary.absent, reached = summary.reached, "Absentees computed");

            let lists = ws.absentees(filter, selection);
            let absentees = AbsenteeReport::build(&ws.church().name, summary, &lists, ws.follow_ups());
            let content = match format {
                OutputFormat::Json => report::generate_json(&absentees)?,
                OutputFormat::Markdown => report::absentee_markdown(&absentees),
            };
            emit(args, &content)
        }

        Command::Report(ReportCommand::Month { month, group }) => {
            let monthly = ws.monthly_report(GroupFilter::from(group), month);
            let content = match format {
                OutputFormat::Json => report::generate_json(&monthly)?,
                OutputFormat::Markdown => report::monthly_markdown(&ws.church().name, &monthly),
            };
            emit(args, &content)
        }

        Command::Report(ReportCommand::Year { year, group }) => {
            let filter = GroupFilter::from(group);
            let months = ws.year_overview(filter, year);
            info!(rate = ws.year_rate(filter, year), "Attendance for {}", year);
            let content = match format {
                OutputFormat::Json => report::year_json(year, &months)?,
                OutputFormat::Markdown => report::year_markdown(&ws.church().name, year, &months),
            };
            emit(args, &content)
        }

        Command::Attendance(AttendanceCommand::Take {
            group,
            date,
            ref present,
            ref absent,
            all_present,
        }) => {
            let date = date.unwrap_or_else(today);
            let mut marks = BTreeMap::new();
            if all_present {
                marks.extend(ws.group_members(group).map(|m| (m.id, Presence::Present)));
            }
            marks.extend(present.iter().map(|id| (*id, Presence::Present)));
            marks.extend(absent.iter().map(|id| (*id, Presence::Absent)));

            let draft = ws.attendance_draft(group, date, &marks)?;
            for id in marks.keys() {
                if !draft.records.iter().any(|r| r.member_id == Some(*id)) {
                    warn!("Member {} is not in group {}, ignoring", id, group);
                }
            }
            let editing = draft.id.is_some();
            let session = ws.save_attendance(draft).await?;
            println!(
                "✅ {} attendance session {} for {}",
                if editing { "Updated" } else { "Saved" },
                session,
                date
            );
            Ok(())
        }

        Command::Attendance(AttendanceCommand::Delete { session }) => {
            ws.delete_session(session).await?;
            println!("✅ Deleted attendance session {}", session);
            Ok(())
        }

        Command::FollowUp {
            session,
            ref member,
            reached,
            ref note,
        } => {
            let patch = FollowUpPatch {
                reached,
                note: note.clone(),
            };
            let entry = ws.update_follow_up(session, member, &patch)?;
            println!(
                "✅ Follow-up for {}: {}{}",
                member,
                if entry.reached { "reached" } else { "not reached" },
                if entry.note.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", entry.note)
                }
            );
            Ok(())
        }

        Command::Member(ref command) => member_command(&mut ws, command, args, format).await,
        Command::Group(ref command) => group_command(&mut ws, command, args, format).await,
        Command::Visitor(ref command) => visitor_command(&mut ws, command, args, format).await,
        Command::Sms(ref command) => sms_command(&ws, &auth, command, config).await,

        Command::Church(_) | Command::InitConfig => Ok(()),
    }
}

async fn member_command<B: Backend>(
    ws: &mut Workspace<B>,
    command: &MemberCommand,
    args: &Args,
    format: OutputFormat,
) -> Result<()> {
    match command {
        MemberCommand::Add {
            name,
            phone,
            address,
            birthday,
            groups,
        } => {
            let member = ws
                .add_member(NewMember {
                    name: name.clone(),
                    phone: phone.clone(),
                    address: address.clone(),
                    birthday: *birthday,
                    group_ids: groups.iter().copied().collect(),
                    ..Default::default()
                })
                .await?;
            println!("✅ Added member '{}' with id {}", member.name, member.id);
        }
        MemberCommand::Update {
            id,
            name,
            phone,
            address,
            status,
            groups,
        } => {
            let mut member = ws
                .members()
                .iter()
                .find(|m| m.id == *id)
                .cloned()
                .with_context(|| format!("Member {} not found", id))?;
            if let Some(name) = name {
                member.name = name.clone();
            }
            if let Some(phone) = phone {
                member.phone = phone.clone();
            }
            if let Some(address) = address {
                member.address = Some(address.clone());
            }
            if let Some(status) = status {
                member.status = *status;
            }
            if let Some(groups) = groups {
                member.group_ids = groups.iter().copied().collect();
            }
            ws.update_member(member).await?;
            println!("✅ Updated member {}", id);
        }
        MemberCommand::Import { file } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let members: Vec<NewMember> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            let count = ws.import_members(members).await?;
            println!("✅ Imported {} members", count);
        }
        MemberCommand::List { group } => {
            let filter = GroupFilter::from(*group);
            let members: Vec<_> = ws
                .members()
                .iter()
                .filter(|m| filter_member(filter, m))
                .collect();
            let content = match format {
                OutputFormat::Json => report::generate_json(&members)?,
                OutputFormat::Markdown => {
                    let mut table = String::from("| Id | Name | Phone | Status |\n|:---:|:---|:---|:---:|\n");
                    for m in &members {
                        table.push_str(&format!("| {} | {} | {} | {} |\n", m.id, m.name, m.phone, m.status));
                    }
                    table
                }
            };
            emit(args, &content)?;
        }
        MemberCommand::Remove { id } => {
            ws.remove_member(*id).await?;
            println!("✅ Removed member {}", id);
        }
    }
    Ok(())
}

async fn group_command<B: Backend>(
    ws: &mut Workspace<B>,
    command: &GroupCommand,
    args: &Args,
    format: OutputFormat,
) -> Result<()> {
    match command {
        GroupCommand::Add { name, leader } => {
            let group = ws
                .add_group(NewGroup {
                    name: name.clone(),
                    leader: leader.clone(),
                })
                .await?;
            println!("✅ Added group '{}' with id {}", group.name, group.id);
        }
        GroupCommand::Update { id, name, leader } => {
            let mut group = ws
                .group(*id)
                .cloned()
                .with_context(|| format!("Group {} not found", id))?;
            if let Some(name) = name {
                group.name = name.clone();
            }
            if let Some(leader) = leader {
                group.leader = Some(leader.clone());
            }
            ws.update_group(group).await?;
            println!("✅ Updated group {}", id);
        }
        GroupCommand::Remove { id } => {
            ws.remove_group(*id).await?;
            println!("✅ Removed group {}", id);
        }
        GroupCommand::List => {
            let content = match format {
                OutputFormat::Json => report::generate_json(&ws.groups())?,
                OutputFormat::Markdown => {
                    let mut table = String::from("| Id | Name | Leader | Members |\n|:---:|:---|:---|:---:|\n");
                    for g in ws.groups() {
                        table.push_str(&format!(
                            "| {} | {} | {} | {} |\n",
                            g.id,
                            g.name,
                            g.leader.as_deref().unwrap_or("-"),
                            ws.group_members(g.id).count()
                        ));
                    }
                    table
                }
            };
            emit(args, &content)?;
        }
    }
    Ok(())
}

async fn visitor_command<B: Backend>(
    ws: &mut Workspace<B>,
    command: &VisitorCommand,
    args: &Args,
    format: OutputFormat,
) -> Result<()> {
    match command {
        VisitorCommand::Add {
            name,
            phone,
            address,
            date,
        } => {
            let visitor = ws
                .add_first_timer(NewFirstTimer {
                    name: name.clone(),
                    phone: phone.clone(),
                    address: address.clone(),
                    date: date.unwrap_or_else(today),
                })
                .await?;
            println!("✅ Welcomed '{}' (visitor id {})", visitor.name, visitor.id);
        }
        VisitorCommand::Visit { id, date } => {
            let date = date.unwrap_or_else(today);
            ws.record_visit(*id, date).await?;
            println!("✅ Recorded visit of {} on {}", id, date);
        }
        VisitorCommand::Remove { id } => {
            ws.remove_first_timer(*id).await?;
            println!("✅ Removed visitor {}", id);
        }
        VisitorCommand::List { date } => {
            let present = date.and_then(|d| ws.ft_attendance().get(&d));
            let visitors: Vec<_> = ws
                .first_timers()
                .iter()
                .filter(|f| date.is_none() || present.is_some_and(|p| p.contains(&f.id)))
                .collect();
            let content = match format {
                OutputFormat::Json => report::generate_json(&visitors)?,
                OutputFormat::Markdown => {
                    let mut table = String::from("| Id | Name | Phone | First Visit | Visits |\n|:---:|:---|:---|:---:|:---:|\n");
                    for f in &visitors {
                        table.push_str(&format!(
                            "| {} | {} | {} | {} | {} |\n",
                            f.id,
                            f.name,
                            f.phone,
                            f.date,
                            f.visits.len()
                        ));
                    }
                    table
                }
            };
            emit(args, &content)?;
        }
    }
    Ok(())
}

async fn sms_command<B: Backend>(
    ws: &Workspace<B>,
    auth: &AuthStore,
    command: &SmsCommand,
    config: &Config,
) -> Result<()> {
    let SmsCommand::Send {
        message,
        kind,
        to,
        group,
        date,
        dry_run,
    } = command;
    let filter = GroupFilter::from(*group);

    let recipients: Vec<Recipient> = match to {
        Audience::Absentees => {
            let selection = date.map(DateSelection::On).unwrap_or_default();
            ws.absentee_recipients(filter, selection)
        }
        Audience::Birthdays => {
            let members: Vec<_> = ws
                .members()
                .iter()
                .filter(|m| filter_member(filter, m))
                .cloned()
                .collect();
            sms::birthday_recipients(&members, date.unwrap_or_else(today))
        }
        Audience::Members => ws
            .members()
            .iter()
            .filter(|m| m.status == MemberStatus::Active && filter_member(filter, m))
            .map(Recipient::from)
            .collect(),
    };

    if recipients.is_empty() {
        println!("No recipients matched; nothing to send.");
        return Ok(());
    }

    let request = SmsRequest {
        recipients,
        message: message.clone(),
        kind: *kind,
    };
    let credits = sms::estimate_credits(&request);

    if *dry_run {
        println!("🔍 Dry run: {} recipients, about {} credits\n", request.recipients.len(), credits);
        for r in &request.recipients {
            println!("   {} ({}): {}", r.name, r.phone, sms::personalize(&request.message, &r.name));
        }
        return Ok(());
    }

    let url = config
        .sms_function_url()
        .context("No SMS function configured: set sms.function_url or backend.url")?;
    let client = SmsClient::new(&url, config.backend.timeout_seconds)?;
    let response = ws.send_sms(auth, &client, &request).await?;

    println!("\n📨 SMS Summary:");
    println!("   Sent: {} | Failed: {}", response.sent, response.failed);
    println!("   Credits used: {}", response.credits_used);
    if let Some(balance) = response.new_balance {
        println!("   Remaining balance: {}", balance);
    }
    Ok(())
}

fn filter_member(filter: GroupFilter, member: &models::Member) -> bool {
    match filter {
        GroupFilter::All => true,
        GroupFilter::Only(id) => member.in_group(id),
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Print `content` or write it to `--output`.
fn emit(args: &Args, content: &str) -> Result<()> {
    match args.output {
        Some(ref path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("✅ Report saved to: {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
