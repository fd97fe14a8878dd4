use crate::competency;
use crate::ipc::{engine_err, err, ok, optional_str, required_str, AppState, Request};
use serde_json::json;

fn handle_competencies_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let level_id = match required_str(req, "levelId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let capability_fk = match required_str(req, "capabilityFk") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let adaptation = optional_str(req, "adaptation");

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match competency::create_competency(
        conn,
        &level_id,
        &capability_fk,
        &status,
        adaptation.as_deref(),
    ) {
        Ok(id) => ok(&req.id, json!({ "competencyId": id })),
        Err(e) => engine_err(req, e),
    }
}

fn handle_competencies_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = optional_str(req, "status");
    let adaptation = optional_str(req, "adaptation");

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match competency::update_competency(conn, &id, status.as_deref(), adaptation.as_deref()) {
        Ok(()) => ok(&req.id, json!({ "competencyId": id })),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "competencies.create" => Some(handle_competencies_create(state, req)),
        "competencies.update" => Some(handle_competencies_update(state, req)),
        _ => None,
    }
}
