use crate::ipc::{db_conn, engine_err, ok, required_str, AppState, Request};
use crate::reports;
use serde_json::json;

fn handle_reports_pupil(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pupil_id = match required_str(req, "pupilId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match reports::pupil_report(conn, &pupil_id) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => engine_err(req, e),
    }
}

fn handle_reports_group(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let org_id = match required_str(req, "orgId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match reports::group_report(conn, &group_id, &org_id) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.pupil" => Some(handle_reports_pupil(state, req)),
        "reports.group" => Some(handle_reports_group(state, req)),
        _ => None,
    }
}
