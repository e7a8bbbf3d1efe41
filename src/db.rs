use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("attendance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_slots(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            period_start INTEGER NOT NULL,
            period_end INTEGER NOT NULL,
            merged INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_slots_subject ON timetable_slots(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_slots_day ON timetable_slots(day_of_week, period_start)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            period_start INTEGER,
            period_end INTEGER,
            count INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(subject_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_subject ON attendance_records(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_subject_date ON attendance_records(subject_id, date)",
        [],
    )?;

    // Workspaces created before per-record period weighting stored one row
    // per period with no count column. Add and backfill to 1.
    ensure_records_count_column(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            semester TEXT,
            section TEXT,
            batch TEXT,
            import_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_subjects(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            FOREIGN KEY(template_id) REFERENCES templates(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_template_subjects_template ON template_subjects(template_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_slots(
            id TEXT PRIMARY KEY,
            template_subject_id TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            period_start INTEGER NOT NULL,
            period_end INTEGER NOT NULL,
            merged INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(template_subject_id) REFERENCES template_subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_template_slots_subject ON template_slots(template_subject_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_records_count_column(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_records", "count")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance_records ADD COLUMN count INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
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
