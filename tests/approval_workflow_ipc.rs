use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_classlogd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn classlogd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

struct Seed {
    teacher_id: String,
    class_id: String,
    subject_id: String,
}

fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Seed {
    request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "s2",
        "teachers.add",
        json!({ "name": "Alice Wright", "teacherCode": "T-100", "department": "Math" }),
    );
    let class = request_ok(
        stdin,
        reader,
        "s3",
        "classes.add",
        json!({ "name": "10-A", "grade": 10, "section": "A" }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "s4",
        "subjects.add",
        json!({ "name": "Mathematics", "code": "MATH" }),
    );
    Seed {
        teacher_id: teacher["teacherId"].as_str().expect("teacherId").into(),
        class_id: class["classId"].as_str().expect("classId").into(),
        subject_id: subject["subjectId"].as_str().expect("subjectId").into(),
    }
}

fn principal() -> serde_json::Value {
    json!({ "id": "p1", "name": "Principal Smith", "role": "principal" })
}

#[test]
fn approve_then_edit_resubmits_and_clears_the_decision() {
    let workspace = temp_dir("classlog-approval-flow");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "activities.create",
        json!({
            "teacherId": seed.teacher_id,
            "date": "2025-03-10",
            "period": 3,
            "classId": seed.class_id,
            "subjectId": seed.subject_id,
            "description": "Algebra intro",
            "hasHomework": false
        }),
    );
    let activity = &created["activity"];
    assert_eq!(activity["status"].as_str(), Some("pending"));
    let id = activity["id"].as_str().expect("id").to_string();

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "activities.approve",
        json!({ "id": id, "actor": principal() }),
    );
    assert_eq!(approved["activity"]["status"].as_str(), Some("approved"));
    assert_eq!(
        approved["activity"]["approvedBy"].as_str(),
        Some("Principal Smith")
    );
    assert!(approved["activity"]["approvedAt"].is_string());

    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "activities.update",
        json!({
            "id": id,
            "classId": seed.class_id,
            "subjectId": seed.subject_id,
            "description": "Algebra intro + quiz"
        }),
    );
    assert_eq!(edited["activity"]["status"].as_str(), Some("pending"));
    assert!(edited["activity"]["approvedBy"].is_null());
    assert!(edited["activity"]["approvedAt"].is_null());
    assert_eq!(
        edited["activity"]["description"].as_str(),
        Some("Algebra intro + quiz")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn decisions_are_strictly_guarded() {
    let workspace = temp_dir("classlog-approval-guard");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "activities.create",
        json!({
            "teacherId": seed.teacher_id,
            "date": "2025-03-10",
            "period": 1,
            "classId": seed.class_id,
            "subjectId": seed.subject_id,
            "description": "Fractions"
        }),
    );
    let id = created["activity"]["id"].as_str().expect("id").to_string();

    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "activities.reject",
        json!({ "id": id, "actor": principal(), "reason": "Insufficient detail" }),
    );
    assert_eq!(rejected["activity"]["status"].as_str(), Some("rejected"));
    assert_eq!(
        rejected["activity"]["rejectionReason"].as_str(),
        Some("Insufficient detail")
    );

    // Already decided: both follow-up decisions must surface a stale view.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "activities.approve",
        json!({ "id": id, "actor": principal() }),
    );
    assert_eq!(code, "invalid_state");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "activities.reject",
        json!({ "id": id, "actor": principal() }),
    );
    assert_eq!(code, "invalid_state");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "activities.approve",
        json!({ "id": "no-such-activity", "actor": principal() }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn only_principals_may_decide() {
    let workspace = temp_dir("classlog-approval-role");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "activities.create",
        json!({
            "teacherId": seed.teacher_id,
            "date": "2025-03-10",
            "period": 2,
            "classId": seed.class_id,
            "subjectId": seed.subject_id,
            "description": "Geometry"
        }),
    );
    let id = created["activity"]["id"].as_str().expect("id").to_string();

    for (req_id, role) in [("2", "teacher"), ("3", "vice_principal")] {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            req_id,
            "activities.approve",
            json!({ "id": id, "actor": { "id": "t9", "name": "Someone Else", "role": role } }),
        );
        assert_eq!(code, "forbidden", "role {role}");
    }

    // The record is untouched by the refused decisions.
    let day = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.byDate",
        json!({ "date": "2025-03-10" }),
    );
    assert_eq!(
        day["activities"][0]["status"].as_str(),
        Some("pending")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn rejection_reason_defaults_when_missing() {
    let workspace = temp_dir("classlog-approval-reason");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let seed = seed(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "activities.create",
        json!({
            "teacherId": seed.teacher_id,
            "date": "2025-03-10",
            "period": 4,
            "classId": seed.class_id,
            "subjectId": seed.subject_id,
            "description": "Reading"
        }),
    );
    let id = created["activity"]["id"].as_str().expect("id").to_string();

    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "activities.reject",
        json!({ "id": id, "actor": principal() }),
    );
    assert_eq!(
        rejected["activity"]["rejectionReason"].as_str(),
        Some("Not specified")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
