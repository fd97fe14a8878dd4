use crate::ipc::{db_conn, engine_err, err, ok, optional_str, AppState, Request};
use crate::snapshot;
use serde_json::json;
use uuid::Uuid;

fn handle_snapshots_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = optional_str(req, "name");

    let snapshot_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO snapshots(id, name, created_at) VALUES (?, ?, ?)",
        (&snapshot_id, &name, &created_at),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    match snapshot::on_snapshot_created(conn, &snapshot_id) {
        Ok(stats) => ok(
            &req.id,
            json!({
                "snapshotId": snapshot_id,
                "scoresCreated": stats.scores_created,
                "targetsCreated": stats.targets_created,
            }),
        ),
        Err(e) => engine_err(req, e),
    }
}

fn handle_scores_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match crate::store::load_scores(conn) {
        Ok(scores) => {
            let rows: Vec<_> = scores
                .iter()
                .map(|s| {
                    json!({
                        "id": s.id,
                        "pupilId": s.pupil_id,
                        "subjectId": s.subject_id,
                        "currentScore": s.current_score,
                    })
                })
                .collect();
            ok(&req.id, json!({ "scores": rows }))
        }
        Err(e) => engine_err(req, e),
    }
}

fn handle_targets_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snapshot_id = optional_str(req, "snapshotId");

    let sql = "SELECT id, snapshot_id, pupil_id, subject_id, initial_score, target_score
               FROM targets
               WHERE (?1 IS NULL OR snapshot_id = ?1)
               ORDER BY pupil_id, subject_id";
    let mut stmt = match conn.prepare(sql) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&snapshot_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "snapshotId": r.get::<_, String>(1)?,
                "pupilId": r.get::<_, String>(2)?,
                "subjectId": r.get::<_, String>(3)?,
                "initialScore": r.get::<_, f64>(4)?,
                "targetScore": r.get::<_, f64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(targets) => ok(&req.id, json!({ "targets": targets })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "snapshots.create" => Some(handle_snapshots_create(state, req)),
        "scores.list" => Some(handle_scores_list(state, req)),
        "targets.list" => Some(handle_targets_list(state, req)),
        _ => None,
    }
}
