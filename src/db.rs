use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "results.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout_ms: u64) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    migrate(&conn)?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_class ON sections(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS examinations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT
        )",
        [],
    )?;

    // The exam schedule: one row per subject sat by a class in an examination.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_offerings(
            id TEXT PRIMARY KEY,
            examination_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            full_marks REAL NOT NULL,
            pass_marks REAL NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(examination_id) REFERENCES examinations(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(examination_id, class_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_offerings_exam_class
         ON subject_offerings(examination_id, class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            section_id TEXT,
            academic_year TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            UNIQUE(student_id, academic_year)
        )",
        [],
    )?;
    ensure_enrollments_roll_no(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class_year
         ON enrollments(class_id, academic_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(offering_id) REFERENCES subject_offerings(id),
            UNIQUE(enrollment_id, offering_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_offering ON marks(offering_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grading_systems(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            is_default INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            grading_system_id TEXT NOT NULL,
            grade_name TEXT NOT NULL,
            min_percentage REAL NOT NULL,
            max_percentage REAL NOT NULL,
            points REAL NOT NULL,
            FOREIGN KEY(grading_system_id) REFERENCES grading_systems(id),
            UNIQUE(grading_system_id, grade_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_system ON grades(grading_system_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            examination_id TEXT NOT NULL,
            grading_system_id TEXT NOT NULL,
            final_grade_id TEXT NOT NULL,
            total_marks REAL NOT NULL,
            total_full_marks REAL NOT NULL,
            percentage REAL NOT NULL,
            gpa REAL NOT NULL,
            rank INTEGER,
            processed_at TEXT NOT NULL,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(examination_id) REFERENCES examinations(id),
            FOREIGN KEY(grading_system_id) REFERENCES grading_systems(id),
            FOREIGN KEY(final_grade_id) REFERENCES grades(id),
            UNIQUE(enrollment_id, examination_id)
        )",
        [],
    )?;
    ensure_results_ranked_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_exam ON results(examination_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_subjects(
            result_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            full_marks REAL NOT NULL,
            percentage REAL NOT NULL,
            grade_id TEXT NOT NULL,
            points REAL NOT NULL,
            passed INTEGER NOT NULL,
            PRIMARY KEY(result_id, offering_id),
            FOREIGN KEY(result_id) REFERENCES results(id),
            FOREIGN KEY(offering_id) REFERENCES subject_offerings(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id)
        )",
        [],
    )?;

    // One row per (examination, class) while a process/rank call is running.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS processing_locks(
            scope_key TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at_epoch INTEGER NOT NULL,
            acquired_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_enrollments_roll_no(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "enrollments", "roll_no")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE enrollments ADD COLUMN roll_no INTEGER", [])?;
    Ok(())
}

fn ensure_results_ranked_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "results", "ranked_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE results ADD COLUMN ranked_at TEXT", [])?;
    // Older rows carry ranks from before the column existed; they are stale.
    conn.execute("UPDATE results SET rank = NULL", [])?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_repeatable() {
        let conn = Connection::open_in_memory().expect("open");
        migrate(&conn).expect("first migrate");
        migrate(&conn).expect("second migrate");
        assert!(table_has_column(&conn, "results", "ranked_at").expect("pragma"));
        assert!(table_has_column(&conn, "enrollments", "roll_no").expect("pragma"));
    }

    #[test]
    fn migrate_adds_late_columns_and_clears_stale_ranks() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE enrollments(
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                class_id TEXT NOT NULL,
                section_id TEXT,
                academic_year TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
             );
             CREATE TABLE results(
                id TEXT PRIMARY KEY,
                enrollment_id TEXT NOT NULL,
                examination_id TEXT NOT NULL,
                grading_system_id TEXT NOT NULL,
                final_grade_id TEXT NOT NULL,
                total_marks REAL NOT NULL,
                total_full_marks REAL NOT NULL,
                percentage REAL NOT NULL,
                gpa REAL NOT NULL,
                rank INTEGER,
                processed_at TEXT NOT NULL
             );
             INSERT INTO results VALUES('r1','e1','x1','g1','a',1,2,50,2,7,'2024-01-01T00:00:00Z');",
        )
        .expect("legacy schema");

        migrate(&conn).expect("migrate");

        assert!(table_has_column(&conn, "results", "ranked_at").expect("pragma"));
        assert!(table_has_column(&conn, "enrollments", "roll_no").expect("pragma"));
        let rank: Option<i64> = conn
            .query_row("SELECT rank FROM results WHERE id = 'r1'", [], |r| r.get(0))
            .expect("rank");
        assert_eq!(rank, None);
    }
}
