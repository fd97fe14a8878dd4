//! Record fetch/upsert against the workspace store. Everything here maps
//! rusqlite failures onto the `db_query_failed` error code so handler and
//! engine code can surface them uniformly.

use crate::progress::{
    Competency, Group, Level, LevelStatus, Module, ProgressError, Pupil, Subject,
};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use uuid::Uuid;

fn db_err(e: rusqlite::Error) -> ProgressError {
    ProgressError::new("db_query_failed", e.to_string())
}

pub fn load_pupils(conn: &Connection) -> Result<Vec<Pupil>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT id, name, target_level FROM pupils ORDER BY id")
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok(Pupil {
            id: r.get(0)?,
            name: r.get(1)?,
            target_level: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn load_pupil(conn: &Connection, id: &str) -> Result<Option<Pupil>, ProgressError> {
    conn.query_row(
        "SELECT id, name, target_level FROM pupils WHERE id = ?",
        [id],
        |r| {
            Ok(Pupil {
                id: r.get(0)?,
                name: r.get(1)?,
                target_level: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

pub fn load_subjects(conn: &Connection) -> Result<Vec<Subject>, ProgressError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, slug, is_core, is_child_of, is_rainbow_award
             FROM subjects
             ORDER BY id",
        )
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok(Subject {
            id: r.get(0)?,
            name: r.get(1)?,
            slug: r.get(2)?,
            is_core: r.get::<_, i64>(3)? != 0,
            is_child_of: r.get(4)?,
            is_rainbow_award: r.get::<_, i64>(5)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn load_group(conn: &Connection, id: &str) -> Result<Option<Group>, ProgressError> {
    let head: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT id, name, org_id FROM groups WHERE id = ?",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((group_id, name, org_id)) = head else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.name, p.target_level
             FROM group_members gm
             JOIN pupils p ON p.id = gm.pupil_id
             WHERE gm.group_id = ?
             ORDER BY gm.sort_order",
        )
        .map_err(db_err)?;
    let pupils = stmt
        .query_map([&group_id], |r| {
            Ok(Pupil {
                id: r.get(0)?,
                name: r.get(1)?,
                target_level: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(Some(Group {
        id: group_id,
        name,
        org_id,
        pupils,
    }))
}

fn load_modules_with_capabilities(
    conn: &Connection,
) -> Result<HashMap<String, Module>, ProgressError> {
    let mut stmt = conn
        .prepare("SELECT id, level, ord FROM modules")
        .map_err(db_err)?;
    let mut modules: HashMap<String, Module> = stmt
        .query_map([], |r| {
            Ok(Module {
                id: r.get(0)?,
                level: r.get(1)?,
                order: r.get(2)?,
                capabilities: Vec::new(),
            })
        })
        .and_then(|it| {
            it.map(|m| m.map(|m| (m.id.clone(), m)))
                .collect::<Result<HashMap<_, _>, _>>()
        })
        .map_err(db_err)?;

    let mut cap_stmt = conn
        .prepare("SELECT module_id, id FROM capabilities ORDER BY module_id, sort_order")
        .map_err(db_err)?;
    let caps = cap_stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    for (module_id, capability_id) in caps {
        if let Some(module) = modules.get_mut(&module_id) {
            module.capabilities.push(capability_id);
        }
    }
    Ok(modules)
}

/// All levels with their module (capabilities included) and competency
/// records populated, the working set for report building and snapshots.
pub fn load_levels_with_modules(conn: &Connection) -> Result<Vec<Level>, ProgressError> {
    let modules = load_modules_with_capabilities(conn)?;

    let mut comp_stmt = conn
        .prepare("SELECT level_id, id, status, capability_fk FROM competencies ORDER BY id")
        .map_err(db_err)?;
    let comp_rows = comp_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                Competency {
                    id: r.get(1)?,
                    status: r.get(2)?,
                    capability_fk: r.get(3)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    let mut competencies_by_level: HashMap<String, Vec<Competency>> = HashMap::new();
    for (level_id, competency) in comp_rows {
        competencies_by_level
            .entry(level_id)
            .or_default()
            .push(competency);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, pupil_id, subject_id, module_id, status, was_quick_assessed,
                    percent_complete, created_at
             FROM levels
             ORDER BY id",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, String>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut levels = Vec::with_capacity(rows.len());
    for (id, pupil_id, subject_id, module_id, status, quick, percent, created_at) in rows {
        let module = module_id.and_then(|mid| modules.get(&mid).cloned());
        let competencies = competencies_by_level.remove(&id).unwrap_or_default();
        levels.push(Level {
            pupil_id,
            subject_id,
            module,
            status: status.as_deref().and_then(LevelStatus::parse),
            was_quick_assessed: quick != 0,
            percent_complete: percent,
            competencies,
            created_at,
            id,
        });
    }
    Ok(levels)
}

/// Cache write-back of an evaluation onto its level row. Callers treat
/// failures as best-effort (§ report building must not fail on this).
pub fn write_level_evaluation(
    conn: &Connection,
    level_id: &str,
    percent_complete: i64,
    status: LevelStatus,
) -> Result<(), ProgressError> {
    conn.execute(
        "UPDATE levels SET percent_complete = ?, status = ? WHERE id = ?",
        (percent_complete, status.as_str(), level_id),
    )
    .map_err(db_err)?;
    Ok(())
}

/// One row per (pupil, subject): update when present, insert otherwise.
/// Returns the row id.
pub fn upsert_pupil_subject_score(
    conn: &Connection,
    pupil_id: &str,
    subject_id: &str,
    score: f64,
) -> Result<String, ProgressError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM pupil_subject_scores WHERE pupil_id = ? AND subject_id = ?",
            (pupil_id, subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;

    let now = chrono::Utc::now().to_rfc3339();
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE pupil_subject_scores SET current_score = ?, published_at = ? WHERE id = ?",
                (score, &now, &id),
            )
            .map_err(db_err)?;
            Ok(id)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO pupil_subject_scores(id, pupil_id, subject_id, current_score, published_at)
                 VALUES (?, ?, ?, ?, ?)",
                (&id, pupil_id, subject_id, score, &now),
            )
            .map_err(db_err)?;
            Ok(id)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub id: String,
    pub pupil_id: String,
    pub subject_id: String,
    pub current_score: f64,
    pub pupil_target_level: Option<String>,
}

pub fn load_scores(conn: &Connection) -> Result<Vec<ScoreRow>, ProgressError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.pupil_id, s.subject_id, s.current_score, p.target_level
             FROM pupil_subject_scores s
             JOIN pupils p ON p.id = s.pupil_id
             ORDER BY s.pupil_id, s.subject_id",
        )
        .map_err(db_err)?;
    stmt.query_map([], |r| {
        Ok(ScoreRow {
            id: r.get(0)?,
            pupil_id: r.get(1)?,
            subject_id: r.get(2)?,
            current_score: r.get(3)?,
            pupil_target_level: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

pub fn insert_target(
    conn: &Connection,
    snapshot_id: &str,
    score: &ScoreRow,
    initial_score: f64,
    target_score: f64,
) -> Result<String, ProgressError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO targets(id, snapshot_id, pupil_id, subject_id, pupil_subject_score_id,
                             initial_score, target_score, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            snapshot_id,
            &score.pupil_id,
            &score.subject_id,
            &score.id,
            initial_score,
            target_score,
            &now,
        ),
    )
    .map_err(db_err)?;
    Ok(id)
}
