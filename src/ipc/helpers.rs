use chrono::NaiveDate;
use serde_json::json;

use crate::ipc::error::err;
use crate::ledger::{Activity, DayApproval, HomeworkQuota, LedgerError, Role};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr::new("bad_params", message)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

/// Optional string param; blank counts as absent.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn get_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    parse_date(&raw)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "validation_failed",
        message: format!("invalid date (expected YYYY-MM-DD): {}", raw),
        details: None,
    })
}

/// The authenticated caller, supplied per call by the transport layer.
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

pub fn get_actor(params: &serde_json::Value) -> Result<Actor, HandlerErr> {
    let actor = params
        .get("actor")
        .ok_or_else(|| bad_params("missing actor"))?;
    let id = get_required_str(actor, "id").map_err(|_| bad_params("missing actor.id"))?;
    let name = get_required_str(actor, "name").map_err(|_| bad_params("missing actor.name"))?;
    let role = get_required_str(actor, "role").map_err(|_| bad_params("missing actor.role"))?;
    Ok(Actor {
        id,
        name,
        role: Role::parse(&role),
    })
}

/// Approve/reject authority is checked here, once, at the command boundary.
pub fn require_principal(actor: &Actor) -> Result<(), HandlerErr> {
    if actor.role != Role::Principal {
        return Err(HandlerErr::new(
            "forbidden",
            "only a principal may decide approvals",
        ));
    }
    Ok(())
}

/// Each ledger error kind keeps its own code so the UI can react
/// appropriately (re-prompt, refresh, or block submission).
pub fn ledger_err(e: LedgerError) -> HandlerErr {
    match e {
        LedgerError::Validation(message) => HandlerErr::new("validation_failed", message),
        LedgerError::NotFound => HandlerErr::new("not_found", "record not found"),
        LedgerError::InvalidState { status } => HandlerErr {
            code: "invalid_state",
            message: format!("record is already {}, refresh and retry", status),
            details: Some(json!({ "status": status.as_str() })),
        },
        LedgerError::QuotaExceeded { current, limit } => HandlerErr {
            code: "quota_exceeded",
            message: format!("daily homework limit ({}) reached for class", limit),
            details: Some(json!({ "currentCount": current, "limit": limit })),
        },
        LedgerError::Db(e) => HandlerErr::new("db_query_failed", e.to_string()),
    }
}

pub fn activity_json(a: &Activity) -> serde_json::Value {
    json!({
        "id": a.id,
        "teacherId": a.teacher_id,
        "teacherName": a.teacher_name,
        "date": a.date.to_string(),
        "period": a.period,
        "classId": a.class_id,
        "className": a.class_name,
        "subjectId": a.subject_id,
        "subjectName": a.subject_name,
        "description": a.description,
        "attachment": a.attachment,
        "hasHomework": a.has_homework,
        "homeworkDescription": a.homework_description,
        "status": a.status.as_str(),
        "approvedBy": a.approved_by,
        "approvedAt": a.approved_at.map(|t| t.to_rfc3339()),
        "rejectedBy": a.rejected_by,
        "rejectedAt": a.rejected_at.map(|t| t.to_rfc3339()),
        "rejectionReason": a.rejection_reason,
        "createdAt": a.created_at.to_rfc3339(),
        "updatedAt": a.updated_at.to_rfc3339(),
    })
}

pub fn day_approval_json(d: &DayApproval) -> serde_json::Value {
    json!({
        "id": d.id,
        "teacherId": d.teacher_id,
        "date": d.date.to_string(),
        "sentAt": d.sent_at.to_rfc3339(),
        "isApproved": d.is_approved,
        "approvedBy": d.approved_by,
        "approvedAt": d.approved_at.map(|t| t.to_rfc3339()),
    })
}

pub fn quota_json(q: &HomeworkQuota) -> serde_json::Value {
    json!({
        "currentCount": q.current_count,
        "limit": q.limit,
        "canAssignMore": q.current_count < q.limit,
    })
}
