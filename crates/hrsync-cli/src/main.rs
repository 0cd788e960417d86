use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use hrsync_common::{APP_NAME, HrSyncConfig, logging};
use hrsync_connectors::StoreKind;
use hrsync_core::{
    AUTHORITY_TARGET, ApprovalRequest, EventContext, NewApprovalRequest, Notification,
    RequestPriority,
};
use hrsync_engine::SyncOutcome;
use hrsync_memory::HrStore;
use hrsync_workflow::{
    ApprovalLifecycle, EngineSyncTarget, SweepPolicy, SweepScheduler, SyncTarget, parse_decision,
};
use serde_json::{Map, Value};

#[derive(Debug, Parser)]
#[command(name = "hrsync", about = "HR approval workflow and record store sync", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate local setup and generate default config if missing.
    Doctor,
    /// Record store connection per company.
    Connection {
        #[command(subcommand)]
        command: ConnectionCommand,
    },
    /// Approval request operations.
    Request {
        #[command(subcommand)]
        command: RequestCommand,
    },
    /// Reminder and escalation sweep.
    Sweep {
        #[command(subcommand)]
        command: SweepCommand,
    },
    /// Direct record store sync for one employee event.
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
    /// Notification inbox.
    Notify {
        #[command(subcommand)]
        command: NotifyCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ConnectionCommand {
    /// Store a new active connection (replaces the previous one).
    Set {
        #[arg(long, default_value = "default")]
        company: String,
        /// google_sheets or memory.
        #[arg(long)]
        kind: String,
        /// Connection config as a JSON object.
        #[arg(long)]
        config: String,
    },
    /// Show the active connection and its cached schema map.
    Show {
        #[arg(long, default_value = "default")]
        company: String,
    },
    /// Re-analyze live headers and persist the schema map.
    Analyze {
        #[arg(long, default_value = "default")]
        company: String,
    },
}

#[derive(Debug, Subcommand)]
enum RequestCommand {
    /// Submit a new approval request.
    Create {
        #[arg(long, default_value = "default")]
        company: String,
        #[arg(long)]
        employee: String,
        #[arg(long = "type")]
        request_type: String,
        #[arg(long)]
        name: Option<String>,
        /// Request details as a JSON object.
        #[arg(long)]
        details: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long)]
        role: Option<String>,
    },
    /// Approve or reject a pending request.
    Decide {
        request_id: String,
        /// approve or reject.
        decision: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Requests awaiting a decision.
    List {
        #[arg(long, default_value = "default")]
        company: String,
        #[arg(long)]
        role: Option<String>,
    },
    /// Show one request.
    Show { request_id: String },
    /// All requests of one employee, newest first.
    History {
        #[arg(long, default_value = "default")]
        company: String,
        #[arg(long)]
        employee: String,
    },
}

#[derive(Debug, Subcommand)]
enum SweepCommand {
    /// Run one sweep now.
    Run,
    /// Run sweeps on the configured cron schedule until killed.
    Daemon,
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    /// Reflect one event into an employee's row.
    Run {
        #[arg(long, default_value = "default")]
        company: String,
        #[arg(long)]
        employee: String,
        /// Event name, e.g. leave_approved.
        #[arg(long)]
        event: String,
        /// Event context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum NotifyCommand {
    /// List notifications for a target (employee id, or "authority").
    List {
        #[arg(long, default_value = "default")]
        company: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        unread: bool,
    },
    /// Mark a notification read.
    Read { notification_id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Doctor) => doctor(),
        Some(Command::Connection { command }) => connection(command),
        Some(Command::Request { command }) => request(command),
        Some(Command::Sweep { command }) => sweep(command),
        Some(Command::Sync { command }) => sync(command),
        Some(Command::Notify { command }) => notify(command),
        None => {
            println!("{APP_NAME} CLI ready.");
            println!("Run `hrsync doctor` to generate and validate local config.");
            Ok(())
        }
    }
}

fn load_initialized_config() -> Result<HrSyncConfig> {
    let (config, _, _) = HrSyncConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init(&config.log_level);
    Ok(config)
}

fn open_db(config: &HrSyncConfig) -> Result<HrStore> {
    HrStore::open(&config.database_path())
}

fn open_lifecycle(config: &HrSyncConfig) -> Result<ApprovalLifecycle> {
    let db = open_db(config)?;
    let target = EngineSyncTarget::from_config(config)?;
    Ok(ApprovalLifecycle::new(
        db,
        Box::new(target),
        SweepPolicy::from(&config.sweep),
    ))
}

fn doctor() -> Result<()> {
    let (config, path, created) = HrSyncConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init(&config.log_level);
    let db = open_db(&config)?;

    println!("{APP_NAME} doctor: OK");
    println!("config: {}", path.display());
    println!("workspace: {}", config.workspace_dir.display());
    println!("database: {}", db.db_path().display());
    println!("model_provider: {:?}", config.model.provider);
    println!("sweep_schedule: {}", config.sweep.schedule);
    println!("created_config: {created}");
    Ok(())
}

fn connection(command: ConnectionCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let db = open_db(&config)?;

    match command {
        ConnectionCommand::Set {
            company,
            kind,
            config: raw,
        } => {
            let kind = StoreKind::parse(&kind)
                .with_context(|| format!("unknown store kind '{kind}'"))?;
            let value: Value =
                serde_json::from_str(&raw).with_context(|| "connection config is not JSON")?;
            if !value.is_object() {
                bail!("connection config must be a JSON object");
            }
            let record = db.set_connection(&company, kind.as_str(), &value)?;
            println!("connection_id: {}", record.id);
            println!("kind: {}", record.kind);
            println!("active: {}", record.is_active);
        }
        ConnectionCommand::Show { company } => {
            let Some(record) = db.get_active_connection(&company)? else {
                println!("connection_not_found: {company}");
                return Ok(());
            };
            println!("connection_id: {}", record.id);
            println!("kind: {}", record.kind);
            println!("config: {}", record.config_json);
            match record.schema_map()? {
                Some(map) => println!("schema_map: {}", serde_json::to_string_pretty(&map)?),
                None => println!("schema_map: <not analyzed>"),
            }
        }
        ConnectionCommand::Analyze { company } => {
            let target = EngineSyncTarget::from_config(&config)?;
            let map = target.analyze(&db, &company)?;
            println!("primary_key: {}", map.primary_key);
            println!("employee_name: {}", map.employee_name);
            println!("email: {}", map.email.as_deref().unwrap_or("<none>"));
            println!("phone: {}", map.phone.as_deref().unwrap_or("<none>"));
            println!(
                "messaging_handle: {}",
                map.messaging_handle.as_deref().unwrap_or("<none>")
            );
            println!(
                "role_column: {}",
                map.role_column.as_deref().unwrap_or("<none>")
            );
            for (tag, columns) in &map.categories {
                println!("category.{tag}: {}", columns.join(", "));
            }
        }
    }
    Ok(())
}

fn request(command: RequestCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let lifecycle = open_lifecycle(&config)?;

    match command {
        RequestCommand::Create {
            company,
            employee,
            request_type,
            name,
            details,
            message,
            priority,
            role,
        } => {
            let priority = RequestPriority::parse(&priority)
                .with_context(|| format!("unknown priority '{priority}'"))?;
            let details = match details {
                Some(raw) => parse_object(&raw, "details")?,
                None => Map::new(),
            };
            let created = lifecycle.create(NewApprovalRequest {
                company_id: company,
                employee_id: employee,
                employee_name: name,
                request_type,
                details,
                context_message: message,
                priority,
                assigned_role: role,
            })?;
            print_request(&created);
        }
        RequestCommand::Decide {
            request_id,
            decision,
            by,
            note,
        } => {
            let decision = parse_decision(&decision)?;
            let decided = lifecycle.decide(&request_id, decision, &by, note.as_deref())?;
            print_request(&decided);
        }
        RequestCommand::List { company, role } => {
            let rows = lifecycle
                .store()
                .list_awaiting_decision(&company, role.as_deref())?;
            println!("awaiting_decision: {}", rows.len());
            for row in rows {
                print_request_line(&row);
            }
        }
        RequestCommand::Show { request_id } => {
            match lifecycle.store().get_request(&request_id)? {
                Some(row) => print_request(&row),
                None => println!("request_not_found: {request_id}"),
            }
        }
        RequestCommand::History { company, employee } => {
            let rows = lifecycle.store().employee_history(&company, &employee)?;
            println!("requests: {}", rows.len());
            for row in rows {
                print_request_line(&row);
            }
        }
    }
    Ok(())
}

fn sweep(command: SweepCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let lifecycle = open_lifecycle(&config)?;

    match command {
        SweepCommand::Run => match lifecycle.sweep(Utc::now())? {
            Some(report) => {
                println!("scanned: {}", report.scanned);
                println!("reminders_sent: {}", report.reminders_sent);
                println!("escalations: {}", report.escalations);
                println!("errors: {}", report.errors);
            }
            None => println!("sweep_skipped: already running"),
        },
        SweepCommand::Daemon => {
            let scheduler = SweepScheduler::from_config(&config.sweep)?;
            println!("sweep_schedule: {}", scheduler.expression());
            let stop = AtomicBool::new(false);
            let runs = scheduler.run(&lifecycle, &stop)?;
            println!("sweeps_run: {runs}");
        }
    }
    Ok(())
}

fn sync(command: SyncCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let db = open_db(&config)?;

    match command {
        SyncCommand::Run {
            company,
            employee,
            event,
            context,
        } => {
            let context: EventContext = match context {
                Some(raw) => parse_object(&raw, "context")?,
                None => EventContext::new(),
            };
            let target = EngineSyncTarget::from_config(&config)?;
            let outcome = target.sync(&db, &company, &employee, &event, &context)?;
            print_outcome(&outcome);
        }
    }
    Ok(())
}

fn notify(command: NotifyCommand) -> Result<()> {
    let config = load_initialized_config()?;
    let db = open_db(&config)?;

    match command {
        NotifyCommand::List {
            company,
            target,
            unread,
        } => {
            let target = if target.eq_ignore_ascii_case("authority") {
                AUTHORITY_TARGET.to_string()
            } else {
                target
            };
            let rows = db.list_notifications(&company, &target, unread)?;
            println!("notifications: {}", rows.len());
            for row in rows {
                print_notification_line(&row);
            }
        }
        NotifyCommand::Read { notification_id } => {
            if db.mark_notification_read(&notification_id)? {
                println!("notification_read: {notification_id}");
            } else {
                println!("notification_unchanged: {notification_id}");
            }
        }
    }
    Ok(())
}

fn parse_object(raw: &str, label: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).with_context(|| format!("{label} is not JSON"))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{label} must be a JSON object"),
    }
}

fn print_request(request: &ApprovalRequest) {
    println!("request_id: {}", request.id);
    println!("company: {}", request.company_id);
    println!("employee: {} ({})", request.employee_id, request.display_name());
    println!("type: {}", request.request_type);
    println!("status: {}", request.status.as_str());
    println!("priority: {}", request.priority.as_str());
    println!("assigned_role: {}", request.assigned_role);
    println!("details: {}", Value::Object(request.details.clone()));
    println!(
        "decided_by: {}",
        request.decided_by.as_deref().unwrap_or("<none>")
    );
    println!(
        "decision_note: {}",
        request.decision_note.as_deref().unwrap_or("<none>")
    );
    println!("reminder_sent: {}", request.reminder_sent);
    println!("escalated: {}", request.escalated);
    println!("created_at: {}", request.created_at.to_rfc3339());
}

fn print_request_line(request: &ApprovalRequest) {
    println!(
        "- {} | {} | {} | {} | {}",
        request.id,
        request.employee_id,
        request.request_type,
        request.status.as_str(),
        request.created_at.to_rfc3339()
    );
}

fn print_notification_line(notification: &Notification) {
    println!(
        "- {} | {} | {} | {} | {}",
        notification.id,
        notification.kind.as_str(),
        if notification.is_read { "read" } else { "unread" },
        notification.title,
        notification.message
    );
}

fn print_outcome(outcome: &SyncOutcome) {
    println!("success: {}", outcome.success);
    println!(
        "plan_source: {}",
        outcome.plan_source.as_ref().map_or("none", |source| source.label())
    );
    for (column, value) in &outcome.updates_applied {
        println!("update.{column}: {value}");
    }
    println!(
        "new_columns: {}",
        if outcome.new_columns_created.is_empty() {
            "<none>".to_string()
        } else {
            outcome.new_columns_created.join(", ")
        }
    );
    println!("retry_count: {}", outcome.retry_count);
    if let Some(report) = &outcome.verification {
        println!("verified: {}", report.verified_count());
        for (column, mismatch) in &report.failed {
            println!(
                "mismatch.{column}: expected {} got {}",
                mismatch.expected, mismatch.actual
            );
        }
    }
    if let Some(err) = &outcome.error {
        println!("error: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn decide_parses_positional_decision() {
        let cli = Cli::try_parse_from(["hrsync", "request", "decide", "r-1", "approve", "--by", "mgr"])
            .expect("parse");
        match cli.command {
            Some(Command::Request {
                command: RequestCommand::Decide { decision, by, .. },
            }) => {
                assert_eq!(decision, "approve");
                assert_eq!(by, "mgr");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn json_objects_only() {
        assert_eq!(
            parse_object("{\"duration\": 2}", "details").expect("object")["duration"],
            2
        );
        assert!(parse_object("[1]", "details").is_err());
        assert!(parse_object("nope", "details").is_err());
    }
}
