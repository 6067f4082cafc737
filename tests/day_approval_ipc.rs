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
        "request failed: {}",
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn principal() -> serde_json::Value {
    json!({ "id": "p1", "name": "Principal Smith", "role": "principal" })
}

struct Seeded {
    teacher_id: String,
    class_id: String,
    subject_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Seeded {
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "seed-t",
        "teachers.add",
        json!({ "name": "Alice Wright", "teacherCode": "T-100", "department": "Math" }),
    );
    let class = request_ok(
        stdin,
        reader,
        "seed-c",
        "classes.add",
        json!({ "name": "10-A" }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "seed-s",
        "subjects.add",
        json!({ "name": "Mathematics" }),
    );
    Seeded {
        teacher_id: teacher["teacherId"].as_str().expect("teacherId").to_string(),
        class_id: class["classId"].as_str().expect("classId").to_string(),
        subject_id: subject["subjectId"].as_str().expect("subjectId").to_string(),
    }
}

#[test]
fn approving_a_sent_day_approves_its_pending_activities() {
    let workspace = temp_dir("classlog-day-approve");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    for (req_id, period, date) in [("1", 1, "2025-03-10"), ("2", 2, "2025-03-10"), ("3", 1, "2025-03-11")] {
        request_ok(
            &mut stdin,
            &mut reader,
            req_id,
            "activities.create",
            json!({
                "teacherId": seeded.teacher_id,
                "date": date,
                "period": period,
                "classId": seeded.class_id,
                "subjectId": seeded.subject_id,
                "description": "lesson"
            }),
        );
    }

    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "day.send",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10" }),
    );
    assert_eq!(sent["dayApproval"]["isApproved"].as_bool(), Some(false));

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "day.approve",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10", "actor": principal() }),
    );
    assert_eq!(approved["dayApproval"]["isApproved"].as_bool(), Some(true));
    assert_eq!(
        approved["dayApproval"]["approvedBy"].as_str(),
        Some("Principal Smith")
    );

    // Both records of the sent day flip to approved; the other day is untouched.
    let day = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.byDate",
        json!({ "date": "2025-03-10" }),
    );
    assert_eq!(day["stats"]["approved"].as_u64(), Some(2));
    assert_eq!(day["stats"]["pending"].as_u64(), Some(0));

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.byDate",
        json!({ "date": "2025-03-11" }),
    );
    assert_eq!(other["stats"]["pending"].as_u64(), Some(1));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn a_day_cannot_be_approved_twice_or_before_sending() {
    let workspace = temp_dir("classlog-day-guard");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    // Never sent: nothing to approve.
    let missing = request(
        &mut stdin,
        &mut reader,
        "1",
        "day.approve",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10", "actor": principal() }),
    );
    assert_eq!(missing["ok"].as_bool(), Some(false));
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "day.send",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "day.approve",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10", "actor": principal() }),
    );

    let again = request(
        &mut stdin,
        &mut reader,
        "4",
        "day.approve",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10", "actor": principal() }),
    );
    assert_eq!(again["ok"].as_bool(), Some(false));
    assert_eq!(again["error"]["code"].as_str(), Some("invalid_state"));

    // Re-sending the day clears the old approval so it can be reviewed again.
    let resent = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "day.send",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10" }),
    );
    assert_eq!(resent["dayApproval"]["isApproved"].as_bool(), Some(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn day_approval_requires_the_principal_role() {
    let workspace = temp_dir("classlog-day-role");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "day.send",
        json!({ "teacherId": seeded.teacher_id, "date": "2025-03-10" }),
    );

    let denied = request(
        &mut stdin,
        &mut reader,
        "2",
        "day.approve",
        json!({
            "teacherId": seeded.teacher_id,
            "date": "2025-03-10",
            "actor": { "id": "t9", "name": "Head Jones", "role": "head_of_department" }
        }),
    );
    assert_eq!(denied["ok"].as_bool(), Some(false));
    assert_eq!(denied["error"]["code"].as_str(), Some("forbidden"));

    let _ = std::fs::remove_dir_all(workspace);
}
