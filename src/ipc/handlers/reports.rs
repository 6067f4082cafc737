//! Report view handlers. Each one loads a ledger snapshot and hands it to the
//! pure aggregator; nothing here mutates state.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{activity_json, get_date, get_required_str, ledger_err, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, Activity};
use crate::reports;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

fn stats_json(stats: &reports::ApprovalStats) -> serde_json::Value {
    json!({
        "total": stats.total,
        "approved": stats.approved,
        "pending": stats.pending,
        "rejected": stats.rejected,
    })
}

fn slice_json(activities: &[&Activity]) -> Vec<serde_json::Value> {
    activities.iter().map(|a| activity_json(a)).collect()
}

fn reports_by_date(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_date(params, "date")?;
    let all = ledger::load_activities(conn).map_err(ledger_err)?;
    let day: Vec<&Activity> = reports::activities_by_date(&all, date);
    let owned: Vec<Activity> = day.iter().map(|a| (*a).clone()).collect();
    let stats = reports::approval_stats(&owned);
    Ok(json!({
        "date": date.to_string(),
        "activities": slice_json(&day),
        "stats": stats_json(&stats),
    }))
}

fn reports_by_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let all = ledger::load_activities(conn).map_err(ledger_err)?;
    let mine = reports::activities_by_teacher(&all, &teacher_id);
    Ok(json!({
        "teacherId": teacher_id,
        "activities": slice_json(&mine),
        "pendingCount": reports::teacher_pending_count(&all, &teacher_id),
    }))
}

fn reports_active_dates(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let all = ledger::load_activities(conn).map_err(ledger_err)?;
    let dates: Vec<String> = reports::active_dates(&all)
        .into_iter()
        .map(|d| d.to_string())
        .collect();
    Ok(json!({ "dates": dates }))
}

fn reports_homework(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let all = ledger::load_activities(conn).map_err(ledger_err)?;
    let rows = match params.get("date") {
        Some(_) => {
            let date = get_date(params, "date")?;
            let day: Vec<Activity> = reports::activities_by_date(&all, date)
                .into_iter()
                .cloned()
                .collect();
            reports::homework_report(&day)
        }
        None => reports::homework_report(&all),
    };
    let rows_json: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "teacherId": r.teacher_id,
                "teacherName": r.teacher_name,
                "homeworkCount": r.homework_count,
                "subjects": r.subjects.iter().cloned().collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(json!({ "rows": rows_json }))
}

/// Principal dashboard: the pending queue (newest first), the teacher
/// overview in review order, and the day's headline counts.
fn reports_dashboard(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let limit = params
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(10) as usize;
    let today = match params.get("date") {
        Some(_) => get_date(params, "date")?,
        None => Utc::now().date_naive(),
    };

    let all = ledger::load_activities(conn).map_err(ledger_err)?;
    let teachers = ledger::load_teachers(conn).map_err(ledger_err)?;

    let mut pending = reports::pending_approvals(&all);
    pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let pending_total = pending.len();
    pending.truncate(limit);

    let overview: Vec<serde_json::Value> = reports::teacher_ordering(&teachers, &all)
        .iter()
        .map(|s| {
            json!({
                "teacherId": s.teacher.id,
                "teacherName": s.teacher.name,
                "department": s.teacher.department,
                "pendingCount": s.pending_count,
                "latestPendingAt": s.latest_pending_at.map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    let today_slice: Vec<Activity> = reports::activities_by_date(&all, today)
        .into_iter()
        .cloned()
        .collect();
    let today_stats = reports::approval_stats(&today_slice);

    Ok(json!({
        "pendingApprovals": slice_json(&pending),
        "teachersOverview": overview,
        "stats": {
            "totalTeachers": teachers.len(),
            "pendingApprovals": pending_total,
            "todayReports": today_stats.total,
            "today": stats_json(&today_stats),
        },
    }))
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
        "reports.byDate" => Some(with_conn(state, req, reports_by_date)),
        "reports.byTeacher" => Some(with_conn(state, req, reports_by_teacher)),
        "reports.activeDates" => Some(with_conn(state, req, |c, _| reports_active_dates(c))),
        "reports.homework" => Some(with_conn(state, req, reports_homework)),
        "reports.dashboard" => Some(with_conn(state, req, reports_dashboard)),
        _ => None,
    }
}
