use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DEFAULT_PERIODS_PER_DAY: i64 = 8;
pub const DEFAULT_HOMEWORK_LIMIT: i64 = 3;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("classlog.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            teacher_code TEXT NOT NULL UNIQUE,
            department TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'teacher',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            grade INTEGER,
            section TEXT,
            daily_homework_limit INTEGER NOT NULL DEFAULT 3,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            period INTEGER NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            description TEXT,
            attachment TEXT,
            has_homework INTEGER NOT NULL DEFAULT 0,
            homework_description TEXT,
            status TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT,
            rejected_by TEXT,
            rejected_at TEXT,
            rejection_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(teacher_id, date, period),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_date ON activities(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_teacher ON activities(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_status ON activities(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_class_date ON activities(class_id, date)",
        [],
    )?;

    // Workspaces created before the rejection workflow lack these columns.
    ensure_activities_rejection_columns(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS day_approvals(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            is_approved INTEGER NOT NULL DEFAULT 0,
            approved_by TEXT,
            approved_at TEXT,
            UNIQUE(teacher_id, date),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_day_approvals_date ON day_approvals(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_activities_rejection_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "activities", "rejected_by")? {
        conn.execute("ALTER TABLE activities ADD COLUMN rejected_by TEXT", [])?;
    }
    if !table_has_column(conn, "activities", "rejected_at")? {
        conn.execute("ALTER TABLE activities ADD COLUMN rejected_at TEXT", [])?;
    }
    if !table_has_column(conn, "activities", "rejection_reason")? {
        conn.execute("ALTER TABLE activities ADD COLUMN rejection_reason TEXT", [])?;
    }
    Ok(())
}

pub fn settings_get_i64(conn: &Connection, key: &str, default: i64) -> rusqlite::Result<i64> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(raw.and_then(|v| v.parse::<i64>().ok()).unwrap_or(default))
}

pub fn settings_set_i64(conn: &Connection, key: &str, value: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn periods_per_day(conn: &Connection) -> rusqlite::Result<i64> {
    settings_get_i64(conn, "periods_per_day", DEFAULT_PERIODS_PER_DAY)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
