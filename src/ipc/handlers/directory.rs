//! Reference-data handlers: the staff directory and the class/subject
//! catalogs the ledger validates against. Read-mostly; the activity workflow
//! never mutates these.

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{bad_params, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::json;
use uuid::Uuid;

const TEACHER_ROLES: [&str; 5] = [
    "teacher",
    "senior_teacher",
    "head_of_department",
    "vice_principal",
    "principal",
];

fn teachers_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let teacher_code = get_required_str(params, "teacherCode")?;
    let department = get_required_str(params, "department")?;
    let role = get_optional_str(params, "role").unwrap_or_else(|| "teacher".to_string());
    if name.trim().is_empty() || teacher_code.trim().is_empty() {
        return Err(bad_params("name and teacherCode must not be empty"));
    }
    if !TEACHER_ROLES.contains(&role.as_str()) {
        return Err(HandlerErr::new(
            "validation_failed",
            format!("unknown role: {}", role),
        ));
    }

    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teachers WHERE teacher_code = ?",
            [teacher_code.trim()],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if exists > 0 {
        return Err(HandlerErr::new(
            "validation_failed",
            "teacher code already exists",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, name, teacher_code, department, role, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, name.trim(), teacher_code.trim(), department.trim(), role, Utc::now()],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;

    Ok(json!({ "teacherId": id, "name": name.trim(), "teacherCode": teacher_code.trim() }))
}

fn teachers_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, teacher_code, department, role FROM teachers ORDER BY name",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let teachers = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "teacherCode": r.get::<_, String>(2)?,
                "department": r.get::<_, String>(3)?,
                "role": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "teachers": teachers }))
}

fn classes_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(bad_params("name must not be empty"));
    }
    let grade = params.get("grade").and_then(|v| v.as_i64());
    let section = get_optional_str(params, "section");
    let limit = params
        .get("dailyHomeworkLimit")
        .and_then(|v| v.as_i64())
        .unwrap_or(db::DEFAULT_HOMEWORK_LIMIT);
    if limit < 0 {
        return Err(HandlerErr::new(
            "validation_failed",
            "dailyHomeworkLimit must not be negative",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, grade, section, daily_homework_limit, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, name.trim(), grade, section, limit, Utc::now()],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;

    Ok(json!({ "classId": id, "name": name.trim(), "dailyHomeworkLimit": limit }))
}

fn classes_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, grade, section, daily_homework_limit FROM classes ORDER BY name",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let classes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "grade": r.get::<_, Option<i64>>(2)?,
                "section": r.get::<_, Option<String>>(3)?,
                "dailyHomeworkLimit": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "classes": classes }))
}

fn subjects_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if name.trim().is_empty() {
        return Err(bad_params("name must not be empty"));
    }
    let code = get_optional_str(params, "code");

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code, created_at) VALUES(?1, ?2, ?3, ?4)",
        params![id, name.trim(), code, Utc::now()],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "subjects" })),
    })?;

    Ok(json!({ "subjectId": id, "name": name.trim() }))
}

fn subjects_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM subjects ORDER BY name")
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "subjects": subjects }))
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
        "teachers.add" => Some(with_conn(state, req, teachers_add)),
        "teachers.list" => Some(with_conn(state, req, |c, _| teachers_list(c))),
        "classes.add" => Some(with_conn(state, req, classes_add)),
        "classes.list" => Some(with_conn(state, req, |c, _| classes_list(c))),
        "subjects.add" => Some(with_conn(state, req, subjects_add)),
        "subjects.list" => Some(with_conn(state, req, |c, _| subjects_list(c))),
        _ => None,
    }
}
