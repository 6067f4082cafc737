use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::db;

/// Approval sub-state of one activity record.
///
/// There is no draft state: every write submits directly, and a terminal
/// decision holds only until the next edit re-submits the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStatus {
    Pending,
    Approved,
    Rejected,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::Approved => "approved",
            ActivityStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<ActivityStatus> {
        match raw {
            "pending" => Some(ActivityStatus::Pending),
            "approved" => Some(ActivityStatus::Approved),
            "rejected" => Some(ActivityStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller role, decoded once at the command boundary. Senior teacher roles
/// from the staff directory ("vice_principal", "head_of_department", ...)
/// do not carry approval authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Principal,
}

impl Role {
    pub fn parse(raw: &str) -> Role {
        if raw.eq_ignore_ascii_case("principal") {
            Role::Principal
        } else {
            Role::Teacher
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("record not found")]
    NotFound,
    #[error("record is {status}, not pending approval")]
    InvalidState { status: ActivityStatus },
    #[error("daily homework limit ({limit}) reached for class")]
    QuotaExceeded { current: i64, limit: i64 },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

fn invalid(msg: impl Into<String>) -> LedgerError {
    LedgerError::Validation(msg.into())
}

/// One teacher's logged record for one period on one date. Names are joined
/// in from the directory tables so report views need no further lookups.
#[derive(Debug, Clone)]
pub struct Activity {
    pub id: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub date: NaiveDate,
    pub period: i64,
    pub class_id: String,
    pub class_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub description: Option<String>,
    pub attachment: Option<String>,
    pub has_homework: bool,
    pub homework_description: Option<String>,
    pub status: ActivityStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Teacher {
    pub id: String,
    pub name: String,
    pub teacher_code: String,
    pub department: String,
    pub role: String,
}

/// Content of a create/update command. Teacher, date and period are keyed
/// separately and immutable after creation.
#[derive(Debug, Clone)]
pub struct ActivityPayload {
    pub class_id: String,
    pub subject_id: String,
    pub description: Option<String>,
    pub attachment: Option<String>,
    pub has_homework: bool,
    pub homework_description: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct HomeworkQuota {
    pub current_count: i64,
    pub limit: i64,
}

#[derive(Debug, Clone)]
pub struct DayApproval {
    pub id: String,
    pub teacher_id: String,
    pub date: NaiveDate,
    pub sent_at: DateTime<Utc>,
    pub is_approved: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

const ACTIVITY_SELECT: &str = "SELECT
    a.id, a.teacher_id, t.name, a.date, a.period,
    a.class_id, c.name, a.subject_id, s.name,
    a.description, a.attachment, a.has_homework, a.homework_description,
    a.status, a.approved_by, a.approved_at,
    a.rejected_by, a.rejected_at, a.rejection_reason,
    a.created_at, a.updated_at
  FROM activities a
  JOIN teachers t ON t.id = a.teacher_id
  JOIN classes c ON c.id = a.class_id
  JOIN subjects s ON s.id = a.subject_id";

fn map_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Activity> {
    let status_raw: String = row.get(13)?;
    let status = ActivityStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            13,
            rusqlite::types::Type::Text,
            format!("unknown activity status: {}", status_raw).into(),
        )
    })?;
    Ok(Activity {
        id: row.get(0)?,
        teacher_id: row.get(1)?,
        teacher_name: row.get(2)?,
        date: row.get(3)?,
        period: row.get(4)?,
        class_id: row.get(5)?,
        class_name: row.get(6)?,
        subject_id: row.get(7)?,
        subject_name: row.get(8)?,
        description: row.get(9)?,
        attachment: row.get(10)?,
        has_homework: row.get(11)?,
        homework_description: row.get(12)?,
        status,
        approved_by: row.get(14)?,
        approved_at: row.get(15)?,
        rejected_by: row.get(16)?,
        rejected_at: row.get(17)?,
        rejection_reason: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

pub fn get_activity(conn: &Connection, id: &str) -> Result<Activity, LedgerError> {
    let sql = format!("{} WHERE a.id = ?", ACTIVITY_SELECT);
    conn.query_row(&sql, [id], map_activity_row)
        .optional()?
        .ok_or(LedgerError::NotFound)
}

/// Full ledger snapshot for the report aggregator, in a stable order.
pub fn load_activities(conn: &Connection) -> Result<Vec<Activity>, LedgerError> {
    let sql = format!("{} ORDER BY a.date, a.period, a.created_at", ACTIVITY_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], map_activity_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_teachers(conn: &Connection) -> Result<Vec<Teacher>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, teacher_code, department, role FROM teachers ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Teacher {
                id: row.get(0)?,
                name: row.get(1)?,
                teacher_code: row.get(2)?,
                department: row.get(3)?,
                role: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, LedgerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn class_homework_limit(conn: &Connection, class_id: &str) -> Result<Option<i64>, LedgerError> {
    let limit: Option<i64> = conn
        .query_row(
            "SELECT daily_homework_limit FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(limit)
}

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, LedgerError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Content-completeness rule: exactly one of description / attachment, and a
/// homework description exactly when the homework flag is set.
fn validate_payload(conn: &Connection, payload: &ActivityPayload) -> Result<(), LedgerError> {
    let has_desc = payload
        .description
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    let has_attach = payload
        .attachment
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    match (has_desc, has_attach) {
        (false, false) => {
            return Err(invalid(
                "either a description or an attachment must be provided",
            ))
        }
        (true, true) => {
            return Err(invalid(
                "description and attachment are mutually exclusive",
            ))
        }
        _ => {}
    }
    if payload.has_homework {
        let has_hw_text = payload
            .homework_description
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_hw_text {
            return Err(invalid(
                "homework description is required when homework is assigned",
            ));
        }
    }
    if class_homework_limit(conn, &payload.class_id)?.is_none() {
        return Err(invalid(format!("unknown class: {}", payload.class_id)));
    }
    if !subject_exists(conn, &payload.subject_id)? {
        return Err(invalid(format!("unknown subject: {}", payload.subject_id)));
    }
    Ok(())
}

/// Homework-bearing activities counting against the class quota for one date.
/// Rejected homework does not count; the record being replaced by an upsert
/// is excluded so re-submitting does not double-count itself.
fn homework_count_for(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
    exclude_id: Option<&str>,
) -> Result<i64, LedgerError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM activities
         WHERE class_id = ?1 AND date = ?2 AND has_homework = 1
           AND status IN ('pending', 'approved')
           AND (?3 IS NULL OR id != ?3)",
        params![class_id, date, exclude_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

fn check_quota(
    conn: &Connection,
    payload: &ActivityPayload,
    date: NaiveDate,
    exclude_id: Option<&str>,
) -> Result<(), LedgerError> {
    if !payload.has_homework {
        return Ok(());
    }
    let limit = class_homework_limit(conn, &payload.class_id)?
        .unwrap_or(db::DEFAULT_HOMEWORK_LIMIT);
    let current = homework_count_for(conn, &payload.class_id, date, exclude_id)?;
    if current >= limit {
        return Err(LedgerError::QuotaExceeded { current, limit });
    }
    Ok(())
}

/// Create one activity record, or replace the current record for the same
/// (teacher, date, period) key. A replace keeps the record id and created_at,
/// resets the status to pending and clears any prior decision.
pub fn create_activity(
    conn: &Connection,
    teacher_id: &str,
    date: NaiveDate,
    period: i64,
    payload: &ActivityPayload,
) -> Result<Activity, LedgerError> {
    let periods = db::periods_per_day(conn)?;
    if period < 1 || period > periods {
        return Err(invalid(format!(
            "period must be between 1 and {}",
            periods
        )));
    }

    let tx = conn.unchecked_transaction()?;
    if !teacher_exists(&tx, teacher_id)? {
        return Err(invalid(format!("unknown teacher: {}", teacher_id)));
    }
    validate_payload(&tx, payload)?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM activities WHERE teacher_id = ? AND date = ? AND period = ?",
            params![teacher_id, date, period],
            |r| r.get(0),
        )
        .optional()?;
    check_quota(&tx, payload, date, existing.as_deref())?;

    let now = Utc::now();
    let homework_description = if payload.has_homework {
        payload.homework_description.as_deref()
    } else {
        None
    };
    let id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE activities SET
                   class_id = ?1, subject_id = ?2, description = ?3, attachment = ?4,
                   has_homework = ?5, homework_description = ?6,
                   status = 'pending', approved_by = NULL, approved_at = NULL,
                   rejected_by = NULL, rejected_at = NULL, rejection_reason = NULL,
                   updated_at = ?7
                 WHERE id = ?8",
                params![
                    payload.class_id,
                    payload.subject_id,
                    payload.description,
                    payload.attachment,
                    payload.has_homework,
                    homework_description,
                    now,
                    id
                ],
            )?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO activities(
                   id, teacher_id, date, period, class_id, subject_id,
                   description, attachment, has_homework, homework_description,
                   status, created_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?11)",
                params![
                    id,
                    teacher_id,
                    date,
                    period,
                    payload.class_id,
                    payload.subject_id,
                    payload.description,
                    payload.attachment,
                    payload.has_homework,
                    homework_description,
                    now
                ],
            )?;
            id
        }
    };
    tx.commit()?;

    get_activity(conn, &id)
}

/// Edit an existing record by id. Any edit re-submits: the status goes back
/// to pending and a prior approval or rejection is cleared.
pub fn update_activity(
    conn: &Connection,
    id: &str,
    payload: &ActivityPayload,
) -> Result<Activity, LedgerError> {
    let tx = conn.unchecked_transaction()?;
    let date: Option<NaiveDate> = tx
        .query_row("SELECT date FROM activities WHERE id = ?", [id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(date) = date else {
        return Err(LedgerError::NotFound);
    };
    validate_payload(&tx, payload)?;
    check_quota(&tx, payload, date, Some(id))?;

    let now = Utc::now();
    let homework_description = if payload.has_homework {
        payload.homework_description.as_deref()
    } else {
        None
    };
    tx.execute(
        "UPDATE activities SET
           class_id = ?1, subject_id = ?2, description = ?3, attachment = ?4,
           has_homework = ?5, homework_description = ?6,
           status = 'pending', approved_by = NULL, approved_at = NULL,
           rejected_by = NULL, rejected_at = NULL, rejection_reason = NULL,
           updated_at = ?7
         WHERE id = ?8",
        params![
            payload.class_id,
            payload.subject_id,
            payload.description,
            payload.attachment,
            payload.has_homework,
            homework_description,
            now,
            id
        ],
    )?;
    tx.commit()?;

    get_activity(conn, id)
}

/// Approve a pending record. The write is conditioned on the current status,
/// so of two racing decisions only the first can succeed; the loser surfaces
/// `InvalidState` with the status it lost to.
pub fn approve(conn: &Connection, id: &str, approved_by: &str) -> Result<Activity, LedgerError> {
    let now = Utc::now();
    let n = conn.execute(
        "UPDATE activities SET
           status = 'approved', approved_by = ?1, approved_at = ?2,
           rejected_by = NULL, rejected_at = NULL, rejection_reason = NULL,
           updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![approved_by, now, id],
    )?;
    if n == 0 {
        return Err(decision_conflict(conn, id)?);
    }
    get_activity(conn, id)
}

/// Reject a pending record with a reason. Same status guard as `approve`.
pub fn reject(
    conn: &Connection,
    id: &str,
    rejected_by: &str,
    reason: Option<&str>,
) -> Result<Activity, LedgerError> {
    let reason = match reason.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => "Not specified",
    };
    let now = Utc::now();
    let n = conn.execute(
        "UPDATE activities SET
           status = 'rejected', rejected_by = ?1, rejected_at = ?2, rejection_reason = ?3,
           approved_by = NULL, approved_at = NULL,
           updated_at = ?2
         WHERE id = ?4 AND status = 'pending'",
        params![rejected_by, now, reason, id],
    )?;
    if n == 0 {
        return Err(decision_conflict(conn, id)?);
    }
    get_activity(conn, id)
}

fn decision_conflict(conn: &Connection, id: &str) -> Result<LedgerError, LedgerError> {
    let status_raw: Option<String> = conn
        .query_row("SELECT status FROM activities WHERE id = ?", [id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(match status_raw.as_deref().and_then(ActivityStatus::parse) {
        Some(status) => LedgerError::InvalidState { status },
        None => LedgerError::NotFound,
    })
}

pub fn homework_quota(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
) -> Result<HomeworkQuota, LedgerError> {
    let Some(limit) = class_homework_limit(conn, class_id)? else {
        return Err(invalid(format!("unknown class: {}", class_id)));
    };
    let current_count = homework_count_for(conn, class_id, date, None)?;
    Ok(HomeworkQuota {
        current_count,
        limit,
    })
}

fn map_day_approval_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DayApproval> {
    Ok(DayApproval {
        id: row.get(0)?,
        teacher_id: row.get(1)?,
        date: row.get(2)?,
        sent_at: row.get(3)?,
        is_approved: row.get(4)?,
        approved_by: row.get(5)?,
        approved_at: row.get(6)?,
    })
}

fn get_day_approval(
    conn: &Connection,
    teacher_id: &str,
    date: NaiveDate,
) -> Result<Option<DayApproval>, LedgerError> {
    let row = conn
        .query_row(
            "SELECT id, teacher_id, date, sent_at, is_approved, approved_by, approved_at
             FROM day_approvals WHERE teacher_id = ? AND date = ?",
            params![teacher_id, date],
            map_day_approval_row,
        )
        .optional()?;
    Ok(row)
}

/// Mark one teacher's day as sent for approval. Re-sending re-stamps sent_at
/// and resets any prior day-level decision.
pub fn send_day(
    conn: &Connection,
    teacher_id: &str,
    date: NaiveDate,
) -> Result<DayApproval, LedgerError> {
    if !teacher_exists(conn, teacher_id)? {
        return Err(invalid(format!("unknown teacher: {}", teacher_id)));
    }
    let now = Utc::now();
    conn.execute(
        "INSERT INTO day_approvals(id, teacher_id, date, sent_at, is_approved)
         VALUES(?1, ?2, ?3, ?4, 0)
         ON CONFLICT(teacher_id, date) DO UPDATE SET
           sent_at = excluded.sent_at,
           is_approved = 0, approved_by = NULL, approved_at = NULL",
        params![Uuid::new_v4().to_string(), teacher_id, date, now],
    )?;
    get_day_approval(conn, teacher_id, date)?.ok_or(LedgerError::NotFound)
}

/// Day-level bulk approval: marks the sent wrapper approved and approves
/// every still-pending activity of that teacher and date in one transaction.
pub fn approve_day(
    conn: &Connection,
    teacher_id: &str,
    date: NaiveDate,
    approved_by: &str,
) -> Result<DayApproval, LedgerError> {
    let tx = conn.unchecked_transaction()?;
    let Some(wrapper) = get_day_approval(&tx, teacher_id, date)? else {
        return Err(LedgerError::NotFound);
    };
    if wrapper.is_approved {
        return Err(LedgerError::InvalidState {
            status: ActivityStatus::Approved,
        });
    }

    let now = Utc::now();
    tx.execute(
        "UPDATE day_approvals SET is_approved = 1, approved_by = ?1, approved_at = ?2
         WHERE id = ?3",
        params![approved_by, now, wrapper.id],
    )?;
    tx.execute(
        "UPDATE activities SET
           status = 'approved', approved_by = ?1, approved_at = ?2,
           rejected_by = NULL, rejected_at = NULL, rejection_reason = NULL,
           updated_at = ?2
         WHERE teacher_id = ?3 AND date = ?4 AND status = 'pending'",
        params![approved_by, now, teacher_id, date],
    )?;
    tx.commit()?;

    get_day_approval(conn, teacher_id, date)?.ok_or(LedgerError::NotFound)
}
