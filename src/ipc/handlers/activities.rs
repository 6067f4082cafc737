//! Ledger command handlers: create/update/approve/reject plus the homework
//! quota read and the day-level bulk approval wrapper.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    activity_json, bad_params, day_approval_json, get_actor, get_date, get_optional_str,
    get_required_str, ledger_err, quota_json, require_principal, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, ActivityPayload};
use rusqlite::Connection;
use serde_json::json;

fn payload_from(params: &serde_json::Value) -> Result<ActivityPayload, HandlerErr> {
    Ok(ActivityPayload {
        class_id: get_required_str(params, "classId")?,
        subject_id: get_required_str(params, "subjectId")?,
        description: get_optional_str(params, "description"),
        attachment: get_optional_str(params, "attachment"),
        has_homework: params
            .get("hasHomework")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        homework_description: get_optional_str(params, "homeworkDescription"),
    })
}

fn activities_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = get_date(params, "date")?;
    let period = params
        .get("period")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params("missing period"))?;
    let payload = payload_from(params)?;

    let activity = ledger::create_activity(conn, &teacher_id, date, period, &payload)
        .map_err(ledger_err)?;
    tracing::debug!(id = %activity.id, period, "activity submitted");
    Ok(json!({ "activity": activity_json(&activity) }))
}

fn activities_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let payload = payload_from(params)?;
    let activity = ledger::update_activity(conn, &id, &payload).map_err(ledger_err)?;
    Ok(json!({ "activity": activity_json(&activity) }))
}

fn activities_approve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let actor = get_actor(params)?;
    require_principal(&actor)?;
    let activity = ledger::approve(conn, &id, &actor.name).map_err(ledger_err)?;
    tracing::debug!(id = %activity.id, by = %actor.name, "activity approved");
    Ok(json!({ "activity": activity_json(&activity) }))
}

fn activities_reject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let actor = get_actor(params)?;
    require_principal(&actor)?;
    let reason = get_optional_str(params, "reason");
    let activity =
        ledger::reject(conn, &id, &actor.name, reason.as_deref()).map_err(ledger_err)?;
    tracing::debug!(id = %activity.id, by = %actor.name, "activity rejected");
    Ok(json!({ "activity": activity_json(&activity) }))
}

fn activities_homework_quota(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    let quota = ledger::homework_quota(conn, &class_id, date).map_err(ledger_err)?;
    Ok(quota_json(&quota))
}

fn day_send(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = get_date(params, "date")?;
    let day = ledger::send_day(conn, &teacher_id, date).map_err(ledger_err)?;
    Ok(json!({ "dayApproval": day_approval_json(&day) }))
}

fn day_approve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = get_date(params, "date")?;
    let actor = get_actor(params)?;
    require_principal(&actor)?;
    let day = ledger::approve_day(conn, &teacher_id, date, &actor.name).map_err(ledger_err)?;
    Ok(json!({ "dayApproval": day_approval_json(&day) }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activities.create" => Some(with_conn(state, req, activities_create)),
        "activities.update" => Some(with_conn(state, req, activities_update)),
        "activities.approve" => Some(with_conn(state, req, activities_approve)),
        "activities.reject" => Some(with_conn(state, req, activities_reject)),
        "activities.homeworkQuota" => Some(with_conn(state, req, activities_homework_quota)),
        "day.send" => Some(with_conn(state, req, day_send)),
        "day.approve" => Some(with_conn(state, req, day_approve)),
        _ => None,
    }
}
