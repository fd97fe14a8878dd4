use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("hexagons.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pupils(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            target_level TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            slug TEXT,
            is_core INTEGER NOT NULL DEFAULT 0,
            is_child_of TEXT,
            is_rainbow_award INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS modules(
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL,
            ord INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS capabilities(
            id TEXT PRIMARY KEY,
            module_id TEXT NOT NULL,
            name TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(module_id) REFERENCES modules(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_capabilities_module ON capabilities(module_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            id TEXT PRIMARY KEY,
            pupil_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            module_id TEXT,
            status TEXT,
            was_quick_assessed INTEGER NOT NULL DEFAULT 0,
            percent_complete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(pupil_id) REFERENCES pupils(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(module_id) REFERENCES modules(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_levels_pupil_subject ON levels(pupil_id, subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_levels_module ON levels(module_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS competencies(
            id TEXT PRIMARY KEY,
            level_id TEXT NOT NULL,
            capability_fk TEXT NOT NULL,
            status TEXT NOT NULL,
            adaptation TEXT,
            FOREIGN KEY(level_id) REFERENCES levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_competencies_level ON competencies(level_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pupil_subject_scores(
            id TEXT PRIMARY KEY,
            pupil_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            current_score REAL NOT NULL,
            published_at TEXT,
            FOREIGN KEY(pupil_id) REFERENCES pupils(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(pupil_id, subject_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots(
            id TEXT PRIMARY KEY,
            name TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS targets(
            id TEXT PRIMARY KEY,
            snapshot_id TEXT NOT NULL,
            pupil_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            pupil_subject_score_id TEXT NOT NULL,
            initial_score REAL NOT NULL,
            target_score REAL NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(snapshot_id) REFERENCES snapshots(id),
            FOREIGN KEY(pupil_id) REFERENCES pupils(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(pupil_subject_score_id) REFERENCES pupil_subject_scores(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_targets_snapshot ON targets(snapshot_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            org_id TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_members(
            group_id TEXT NOT NULL,
            pupil_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(group_id, pupil_id),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(pupil_id) REFERENCES pupils(id)
        )",
        [],
    )?;

    Ok(())
}
