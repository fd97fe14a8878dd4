//! Competency writes and the aggregate recomputation they trigger.
//!
//! A competency update and the recount of its owning level's percentage run
//! in one SQLite transaction so concurrent edits under the same level never
//! see a half-updated state. A failed step rolls the whole unit back.

use crate::progress::{calculate_score, status_from_percent, ProgressError};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

fn aggregation_err(e: rusqlite::Error) -> ProgressError {
    ProgressError::new("aggregation_failed", e.to_string())
}

/// Creates a competency under a level and recomputes that level's aggregate
/// in the same transaction. Returns the new competency id.
pub fn create_competency(
    conn: &mut Connection,
    level_id: &str,
    capability_fk: &str,
    status: &str,
    adaptation: Option<&str>,
) -> Result<String, ProgressError> {
    let level_exists: Option<String> = conn
        .query_row("SELECT id FROM levels WHERE id = ?", [level_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| ProgressError::new("db_query_failed", e.to_string()))?;
    if level_exists.is_none() {
        return Err(ProgressError::new("not_found", "level not found"));
    }

    let id = Uuid::new_v4().to_string();
    let tx = conn.transaction().map_err(aggregation_err)?;
    tx.execute(
        "INSERT INTO competencies(id, level_id, capability_fk, status, adaptation)
         VALUES (?, ?, ?, ?, ?)",
        (&id, level_id, capability_fk, status, adaptation),
    )
    .map_err(aggregation_err)?;
    recompute_level_aggregate(&tx, level_id)?;
    tx.commit().map_err(aggregation_err)?;

    refresh_level_score(conn, level_id);
    Ok(id)
}

/// Updates a competency's status/adaptation and recomputes the owning
/// level's aggregate in the same transaction.
pub fn update_competency(
    conn: &mut Connection,
    id: &str,
    status: Option<&str>,
    adaptation: Option<&str>,
) -> Result<(), ProgressError> {
    let level_id: Option<String> = conn
        .query_row("SELECT level_id FROM competencies WHERE id = ?", [id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| ProgressError::new("db_query_failed", e.to_string()))?;
    let Some(level_id) = level_id else {
        return Err(ProgressError::new("not_found", "competency not found"));
    };

    let tx = conn.transaction().map_err(aggregation_err)?;
    if let Some(status) = status {
        tx.execute(
            "UPDATE competencies SET status = ? WHERE id = ?",
            (status, id),
        )
        .map_err(aggregation_err)?;
    }
    if let Some(adaptation) = adaptation {
        tx.execute(
            "UPDATE competencies SET adaptation = ? WHERE id = ?",
            (adaptation, id),
        )
        .map_err(aggregation_err)?;
    }
    recompute_level_aggregate(&tx, &level_id)?;
    tx.commit().map_err(aggregation_err)?;

    refresh_level_score(conn, &level_id);
    Ok(())
}

/// Recounts completed competencies against the module's capability count and
/// writes the level's cached percentage. Fully-assessed levels also get the
/// derived status; a quick-assessed level keeps its pupil-entered status.
/// Levels without a module cannot be scored and are left untouched.
fn recompute_level_aggregate(conn: &Connection, level_id: &str) -> Result<(), ProgressError> {
    let row: Option<(Option<String>, i64)> = conn
        .query_row(
            "SELECT module_id, was_quick_assessed FROM levels WHERE id = ?",
            [level_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(aggregation_err)?;
    let Some((module_id, was_quick_assessed)) = row else {
        return Err(ProgressError::new("not_found", "level not found"));
    };
    let Some(module_id) = module_id else {
        return Ok(());
    };

    let total_capabilities: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM capabilities WHERE module_id = ?",
            [&module_id],
            |r| r.get(0),
        )
        .map_err(aggregation_err)?;
    let completed: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM competencies WHERE level_id = ? AND status = 'complete'",
            [level_id],
            |r| r.get(0),
        )
        .map_err(aggregation_err)?;

    let percent = if total_capabilities > 0 {
        (completed * 100) / total_capabilities
    } else {
        0
    };

    if was_quick_assessed != 0 {
        conn.execute(
            "UPDATE levels SET percent_complete = ? WHERE id = ?",
            (percent, level_id),
        )
        .map_err(aggregation_err)?;
    } else {
        conn.execute(
            "UPDATE levels SET percent_complete = ?, status = ? WHERE id = ?",
            (percent, status_from_percent(percent).as_str(), level_id),
        )
        .map_err(aggregation_err)?;
    }
    Ok(())
}

/// Recomputes the (pupil, subject) score from a level's module and cached
/// percentage and upserts the PupilSubjectScore row. Runs after any level
/// change; failures are logged and swallowed so the triggering operation
/// still succeeds.
pub fn refresh_level_score(conn: &Connection, level_id: &str) {
    let row: Option<(String, String, Option<String>, i64)> = match conn
        .query_row(
            "SELECT pupil_id, subject_id, module_id, percent_complete FROM levels WHERE id = ?",
            [level_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(level_id, error = %e, "score refresh: level read failed");
            return;
        }
    };
    let Some((pupil_id, subject_id, module_id, percent)) = row else {
        return;
    };
    let Some(module_id) = module_id else {
        return;
    };

    let module: Option<(String, i64)> = match conn
        .query_row(
            "SELECT level, ord FROM modules WHERE id = ?",
            [&module_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(level_id, error = %e, "score refresh: module read failed");
            return;
        }
    };
    let Some((track, order)) = module else {
        return;
    };

    let score = calculate_score(&track, order, percent);
    match store::upsert_pupil_subject_score(conn, &pupil_id, &subject_id, score) {
        Ok(_) => {
            tracing::debug!(%pupil_id, %subject_id, score, "pupil subject score upserted");
        }
        Err(e) => {
            tracing::warn!(%pupil_id, %subject_id, error = %e.message, "score upsert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn seed_level(conn: &Connection, quick: bool) -> String {
        conn.execute(
            "INSERT INTO pupils(id, name) VALUES ('p1', 'Ada')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO subjects(id, name, is_core) VALUES ('s1', 'Maths', 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO modules(id, level, ord) VALUES ('m1', 'step', 3)",
            [],
        )
        .unwrap();
        for cap in ["cap-a", "cap-b", "cap-c", "cap-d"] {
            conn.execute(
                "INSERT INTO capabilities(id, module_id) VALUES (?, 'm1')",
                [cap],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO levels(id, pupil_id, subject_id, module_id, status, was_quick_assessed,
                                percent_complete, created_at)
             VALUES ('l1', 'p1', 's1', 'm1', 'emerging', ?, 0, '2026-01-01T00:00:00+00:00')",
            [quick as i64],
        )
        .unwrap();
        "l1".to_string()
    }

    #[test]
    fn create_recomputes_percent_and_status() {
        let mut conn = test_conn();
        let level_id = seed_level(&conn, false);

        create_competency(&mut conn, &level_id, "cap-a", "complete", None).unwrap();
        create_competency(&mut conn, &level_id, "cap-b", "complete", None).unwrap();
        create_competency(&mut conn, &level_id, "cap-c", "complete", None).unwrap();

        let (percent, status): (i64, String) = conn
            .query_row(
                "SELECT percent_complete, status FROM levels WHERE id = ?",
                [&level_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(percent, 75);
        assert_eq!(status, "secure");
    }

    #[test]
    fn update_to_complete_reaches_one_hundred() {
        let mut conn = test_conn();
        let level_id = seed_level(&conn, false);
        for cap in ["cap-a", "cap-b", "cap-c"] {
            create_competency(&mut conn, &level_id, cap, "complete", None).unwrap();
        }
        let last = create_competency(&mut conn, &level_id, "cap-d", "developing", None).unwrap();
        update_competency(&mut conn, &last, Some("complete"), None).unwrap();

        let (percent, status): (i64, String) = conn
            .query_row(
                "SELECT percent_complete, status FROM levels WHERE id = ?",
                [&level_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(percent, 100);
        assert_eq!(status, "complete");
    }

    #[test]
    fn quick_assessed_status_survives_recompute() {
        let mut conn = test_conn();
        let level_id = seed_level(&conn, true);
        conn.execute("UPDATE levels SET status = 'secure' WHERE id = 'l1'", [])
            .unwrap();

        create_competency(&mut conn, &level_id, "cap-a", "complete", None).unwrap();

        let (percent, status): (i64, String) = conn
            .query_row(
                "SELECT percent_complete, status FROM levels WHERE id = ?",
                [&level_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(percent, 25);
        assert_eq!(status, "secure", "pupil-entered status is authoritative");
    }

    #[test]
    fn missing_competency_is_not_found() {
        let mut conn = test_conn();
        seed_level(&conn, false);
        let err = update_competency(&mut conn, "nope", Some("complete"), None).unwrap_err();
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn refresh_upserts_one_score_row_per_pair() {
        let mut conn = test_conn();
        let level_id = seed_level(&conn, false);
        create_competency(&mut conn, &level_id, "cap-a", "complete", None).unwrap();
        create_competency(&mut conn, &level_id, "cap-b", "complete", None).unwrap();

        let (count, score): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(current_score) FROM pupil_subject_scores",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(score, 3.5); // step 3 at 50%
    }
}
