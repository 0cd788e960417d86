use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use hrsync_core::{
    ApprovalRequest, Notification, NotificationKind, RequestPriority, RequestStatus, SchemaMap,
};
use rusqlite::{Connection, Row, params};
use serde_json::{Map, Value};
use uuid::Uuid;

/// SQLite bookkeeping for approval requests, notifications and store connections.
pub struct HrStore {
    conn: Connection,
    db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: String,
    pub company_id: String,
    pub kind: String,
    pub config_json: String,
    pub schema_map_json: Option<String>,
    pub is_active: bool,
    pub created_at_ms: i64,
}

impl ConnectionRecord {
    pub fn config(&self) -> Result<Value> {
        serde_json::from_str(&self.config_json)
            .with_context(|| format!("invalid config_json for connection {}", self.id))
    }

    pub fn schema_map(&self) -> Result<Option<SchemaMap>> {
        self.schema_map_json
            .as_deref()
            .map(|raw| {
                serde_json::from_str(raw)
                    .with_context(|| format!("invalid schema map for connection {}", self.id))
            })
            .transpose()
    }
}

const REQUEST_COLUMNS: &str = "id, company_id, employee_id, employee_name, request_type, \
     details_json, context_message, priority, status, assigned_role, decided_by, decision_note, \
     decided_at_ms, reminder_sent, escalated, created_at_ms";

struct RequestRow {
    id: String,
    company_id: String,
    employee_id: String,
    employee_name: Option<String>,
    request_type: String,
    details_json: String,
    context_message: Option<String>,
    priority: String,
    status: String,
    assigned_role: String,
    decided_by: Option<String>,
    decision_note: Option<String>,
    decided_at_ms: Option<i64>,
    reminder_sent: bool,
    escalated: bool,
    created_at_ms: i64,
}

impl RequestRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            company_id: row.get(1)?,
            employee_id: row.get(2)?,
            employee_name: row.get(3)?,
            request_type: row.get(4)?,
            details_json: row.get(5)?,
            context_message: row.get(6)?,
            priority: row.get(7)?,
            status: row.get(8)?,
            assigned_role: row.get(9)?,
            decided_by: row.get(10)?,
            decision_note: row.get(11)?,
            decided_at_ms: row.get(12)?,
            reminder_sent: row.get(13)?,
            escalated: row.get(14)?,
            created_at_ms: row.get(15)?,
        })
    }

    fn into_request(self) -> Result<ApprovalRequest> {
        let details: Map<String, Value> = serde_json::from_str(&self.details_json)
            .with_context(|| format!("invalid details for request {}", self.id))?;
        Ok(ApprovalRequest {
            status: RequestStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("unknown request status {}", self.status))?,
            priority: RequestPriority::parse(&self.priority).unwrap_or_default(),
            decided_at: self.decided_at_ms.map(from_epoch_ms).transpose()?,
            created_at: from_epoch_ms(self.created_at_ms)?,
            id: self.id,
            company_id: self.company_id,
            employee_id: self.employee_id,
            employee_name: self.employee_name,
            request_type: self.request_type,
            details,
            context_message: self.context_message,
            assigned_role: self.assigned_role,
            decided_by: self.decided_by,
            decision_note: self.decision_note,
            reminder_sent: self.reminder_sent,
            escalated: self.escalated,
        })
    }
}

impl HrStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create db directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        let store = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
              version INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        self.apply_migration(
            1,
            "approval_tables",
            r#"
            CREATE TABLE IF NOT EXISTS approval_requests (
              id TEXT PRIMARY KEY,
              company_id TEXT NOT NULL,
              employee_id TEXT NOT NULL,
              employee_name TEXT,
              request_type TEXT NOT NULL,
              details_json TEXT NOT NULL DEFAULT '{}',
              context_message TEXT,
              priority TEXT NOT NULL DEFAULT 'normal',
              status TEXT NOT NULL DEFAULT 'pending',
              assigned_role TEXT NOT NULL,
              decided_by TEXT,
              decision_note TEXT,
              decided_at_ms INTEGER,
              reminder_sent INTEGER NOT NULL DEFAULT 0,
              escalated INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_requests_status ON approval_requests(status, created_at_ms);

            CREATE INDEX IF NOT EXISTS idx_requests_employee ON approval_requests(company_id, employee_id);

            CREATE TABLE IF NOT EXISTS notifications (
              id TEXT PRIMARY KEY,
              company_id TEXT NOT NULL,
              target TEXT NOT NULL,
              title TEXT NOT NULL,
              message TEXT NOT NULL,
              kind TEXT NOT NULL,
              related_request_id TEXT,
              is_read INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_target ON notifications(company_id, target, is_read)
            "#,
        )?;

        self.apply_migration(
            2,
            "store_connections",
            r#"
            CREATE TABLE IF NOT EXISTS store_connections (
              id TEXT PRIMARY KEY,
              company_id TEXT NOT NULL,
              kind TEXT NOT NULL,
              config_json TEXT NOT NULL,
              schema_map_json TEXT,
              is_active INTEGER NOT NULL DEFAULT 1,
              created_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_connections_company ON store_connections(company_id, is_active)
            "#,
        )?;

        Ok(())
    }

    fn apply_migration(&self, version: i64, name: &str, sql: &str) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![version])?;
        if rows.next()?.is_some() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        for raw in sql.split(';') {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            tx.execute(trimmed, [])
                .with_context(|| format!("migration {version} ({name}) failed"))?;
        }
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn insert_request(&self, request: &ApprovalRequest) -> Result<()> {
        insert_request(&self.conn, request)
    }

    /// Stores a new request together with the notification announcing it; neither is kept
    /// when the other fails.
    pub fn submit_request(
        &self,
        request: &ApprovalRequest,
        notification: &Notification,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        insert_request(&tx, request)?;
        insert_notification(&tx, notification)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_request(&self, request_id: &str) -> Result<Option<ApprovalRequest>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE id = ?1"
        ))?;
        let mut rows = stmt.query(params![request_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(RequestRow::read(row)?.into_request()?)),
            None => Ok(None),
        }
    }

    /// Applies a decision only while the request still awaits one, storing `notification`
    /// in the same transaction. Returns false (and stores nothing) when the request was
    /// already decided or does not exist.
    pub fn record_decision(
        &self,
        request_id: &str,
        status: RequestStatus,
        decided_by: &str,
        decision_note: Option<&str>,
        decided_at: DateTime<Utc>,
        notification: &Notification,
    ) -> Result<bool> {
        self.update_with_notification(
            "UPDATE approval_requests
             SET status = ?1, decided_by = ?2, decision_note = ?3, decided_at_ms = ?4
             WHERE id = ?5 AND status IN ('pending', 'escalated')",
            params![
                status.as_str(),
                decided_by,
                decision_note,
                decided_at.timestamp_millis(),
                request_id
            ],
            notification,
        )
    }

    /// Requests awaiting a decision (pending or escalated), oldest first.
    pub fn list_awaiting_decision(
        &self,
        company_id: &str,
        assigned_role: Option<&str>,
    ) -> Result<Vec<ApprovalRequest>> {
        self.query_requests(
            &format!(
                "SELECT {REQUEST_COLUMNS} FROM approval_requests
                 WHERE company_id = ?1
                   AND status IN ('pending', 'escalated')
                   AND (?2 IS NULL OR lower(assigned_role) = lower(?2))
                 ORDER BY created_at_ms ASC"
            ),
            params![company_id, assigned_role],
        )
    }

    /// Every request still in plain `pending`, across companies.
    pub fn list_sweep_candidates(&self) -> Result<Vec<ApprovalRequest>> {
        self.query_requests(
            &format!(
                "SELECT {REQUEST_COLUMNS} FROM approval_requests
                 WHERE status = 'pending'
                 ORDER BY created_at_ms ASC"
            ),
            [],
        )
    }

    /// Newest first; the employee id is matched trimmed and case-insensitively.
    pub fn employee_history(
        &self,
        company_id: &str,
        employee_id: &str,
    ) -> Result<Vec<ApprovalRequest>> {
        self.query_requests(
            &format!(
                "SELECT {REQUEST_COLUMNS} FROM approval_requests
                 WHERE company_id = ?1 AND lower(trim(employee_id)) = lower(trim(?2))
                 ORDER BY created_at_ms DESC"
            ),
            params![company_id, employee_id],
        )
    }

    fn query_requests(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ApprovalRequest>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, RequestRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RequestRow::into_request).collect()
    }

    /// Sets the reminder flag once and stores the reminder. Returns false when the flag
    /// was already set or the request left `pending`.
    pub fn mark_reminder_sent(&self, request_id: &str, reminder: &Notification) -> Result<bool> {
        self.update_with_notification(
            "UPDATE approval_requests SET reminder_sent = 1
             WHERE id = ?1 AND reminder_sent = 0 AND status = 'pending'",
            params![request_id],
            reminder,
        )
    }

    /// Promotes a pending request to escalated once and stores the escalation notice.
    pub fn mark_escalated(&self, request_id: &str, escalation: &Notification) -> Result<bool> {
        self.update_with_notification(
            "UPDATE approval_requests SET escalated = 1, status = 'escalated'
             WHERE id = ?1 AND escalated = 0 AND status = 'pending'",
            params![request_id],
            escalation,
        )
    }

    /// The flag and its notification land together or not at all.
    fn update_with_notification(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        notification: &Notification,
    ) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        if tx.execute(sql, params)? == 0 {
            return Ok(false);
        }
        insert_notification(&tx, notification)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn add_notification(&self, notification: &Notification) -> Result<()> {
        insert_notification(&self.conn, notification)
    }

    /// Newest first. `target` matches case-insensitively.
    pub fn list_notifications(
        &self,
        company_id: &str,
        target: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, target, title, message, kind, related_request_id, is_read, created_at_ms
             FROM notifications
             WHERE company_id = ?1 AND lower(target) = lower(?2) AND (?3 = 0 OR is_read = 0)
             ORDER BY created_at_ms DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![company_id, target.trim(), unread_only], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(
                |(id, company_id, target, title, message, kind, related, is_read, created)| {
                    Ok(Notification {
                        kind: NotificationKind::parse(&kind)
                            .ok_or_else(|| anyhow!("unknown notification kind {kind}"))?,
                        created_at: from_epoch_ms(created)?,
                        id,
                        company_id,
                        target,
                        title,
                        message,
                        related_request_id: related,
                        is_read,
                    })
                },
            )
            .collect()
    }

    pub fn list_notifications_for_request(
        &self,
        request_id: &str,
    ) -> Result<Vec<(String, NotificationKind)>> {
        let mut stmt = self.conn.prepare(
            "SELECT target, kind FROM notifications
             WHERE related_request_id = ?1
             ORDER BY created_at_ms ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![request_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(target, kind)| {
                let kind = NotificationKind::parse(&kind)
                    .ok_or_else(|| anyhow!("unknown notification kind {kind}"))?;
                Ok((target, kind))
            })
            .collect()
    }

    pub fn mark_notification_read(&self, notification_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND is_read = 0",
            params![notification_id],
        )?;
        Ok(changed > 0)
    }

    /// Stores a new active connection for the company and deactivates the previous one.
    pub fn set_connection(
        &self,
        company_id: &str,
        kind: &str,
        config: &Value,
    ) -> Result<ConnectionRecord> {
        let record = ConnectionRecord {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            kind: kind.to_string(),
            config_json: serde_json::to_string(config)?,
            schema_map_json: None,
            is_active: true,
            created_at_ms: Utc::now().timestamp_millis(),
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE store_connections SET is_active = 0 WHERE company_id = ?1 AND is_active = 1",
            params![company_id],
        )?;
        tx.execute(
            "INSERT INTO store_connections (id, company_id, kind, config_json, schema_map_json, is_active, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, NULL, 1, ?5)",
            params![
                record.id,
                record.company_id,
                record.kind,
                record.config_json,
                record.created_at_ms
            ],
        )?;
        tx.commit()?;
        Ok(record)
    }

    pub fn get_active_connection(&self, company_id: &str) -> Result<Option<ConnectionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, kind, config_json, schema_map_json, is_active, created_at_ms
             FROM store_connections
             WHERE company_id = ?1 AND is_active = 1
             ORDER BY created_at_ms DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query(params![company_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(ConnectionRecord {
                id: row.get(0)?,
                company_id: row.get(1)?,
                kind: row.get(2)?,
                config_json: row.get(3)?,
                schema_map_json: row.get(4)?,
                is_active: row.get(5)?,
                created_at_ms: row.get(6)?,
            }));
        }
        Ok(None)
    }

    pub fn save_schema_map(&self, connection_id: &str, schema: &SchemaMap) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE store_connections SET schema_map_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(schema)?, connection_id],
        )?;
        Ok(changed > 0)
    }
}

fn insert_request(conn: &Connection, request: &ApprovalRequest) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO approval_requests ({REQUEST_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ),
        params![
            request.id,
            request.company_id,
            request.employee_id,
            request.employee_name,
            request.request_type,
            serde_json::to_string(&request.details)?,
            request.context_message,
            request.priority.as_str(),
            request.status.as_str(),
            request.assigned_role,
            request.decided_by,
            request.decision_note,
            request.decided_at.map(|at| at.timestamp_millis()),
            request.reminder_sent,
            request.escalated,
            request.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn insert_notification(conn: &Connection, notification: &Notification) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications
         (id, company_id, target, title, message, kind, related_request_id, is_read, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            notification.id,
            notification.company_id,
            notification.target,
            notification.title,
            notification.message,
            notification.kind.as_str(),
            notification.related_request_id,
            notification.is_read,
            notification.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn from_epoch_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}
