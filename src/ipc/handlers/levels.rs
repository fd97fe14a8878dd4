use crate::competency;
use crate::ipc::{db_conn, err, ok, optional_bool, optional_str, required_str, AppState, Request};
use crate::progress::LevelStatus;
use serde_json::json;
use uuid::Uuid;

fn parse_status(req: &Request) -> Result<Option<LevelStatus>, serde_json::Value> {
    match optional_str(req, "status") {
        None => Ok(None),
        Some(raw) => LevelStatus::parse(&raw).map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "status must be one of: emerging, developing, secure, complete, notstarted",
                Some(json!({ "status": raw })),
            )
        }),
    }
}

fn handle_levels_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pupil_id = match required_str(req, "pupilId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let module_id = optional_str(req, "moduleId");
    let status = match parse_status(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let was_quick_assessed = optional_bool(req, "wasQuickAssessed");

    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO levels(id, pupil_id, subject_id, module_id, status, was_quick_assessed,
                            percent_complete, created_at)
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &id,
            &pupil_id,
            &subject_id,
            &module_id,
            status.map(|s| s.as_str()),
            was_quick_assessed as i64,
            &created_at,
        ),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    competency::refresh_level_score(conn, &id);
    ok(&req.id, json!({ "levelId": id }))
}

fn handle_levels_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match parse_status(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let percent_complete = req.params.get("percentComplete").and_then(|v| v.as_i64());
    if let Some(p) = percent_complete {
        if !(0..=100).contains(&p) {
            return err(&req.id, "bad_params", "percentComplete must be 0-100", None);
        }
    }
    let module_id = optional_str(req, "moduleId");

    if let Some(status) = status {
        if let Err(e) = conn.execute(
            "UPDATE levels SET status = ? WHERE id = ?",
            (status.as_str(), &id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    if let Some(percent) = percent_complete {
        if let Err(e) = conn.execute(
            "UPDATE levels SET percent_complete = ? WHERE id = ?",
            (percent, &id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    if let Some(module_id) = module_id {
        if let Err(e) = conn.execute(
            "UPDATE levels SET module_id = ? WHERE id = ?",
            (&module_id, &id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }

    competency::refresh_level_score(conn, &id);
    ok(&req.id, json!({ "levelId": id }))
}

fn handle_levels_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pupil_id = optional_str(req, "pupilId");
    let subject_id = optional_str(req, "subjectId");

    match crate::store::load_levels_with_modules(conn) {
        Ok(levels) => {
            let filtered: Vec<_> = levels
                .into_iter()
                .filter(|l| pupil_id.as_deref().map(|p| l.pupil_id == p).unwrap_or(true))
                .filter(|l| {
                    subject_id
                        .as_deref()
                        .map(|s| l.subject_id == s)
                        .unwrap_or(true)
                })
                .collect();
            ok(&req.id, json!({ "levels": filtered }))
        }
        Err(e) => crate::ipc::engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "levels.create" => Some(handle_levels_create(state, req)),
        "levels.update" => Some(handle_levels_update(state, req)),
        "levels.list" => Some(handle_levels_list(state, req)),
        _ => None,
    }
}
