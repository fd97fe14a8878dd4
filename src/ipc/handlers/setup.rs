use crate::ipc::{db_conn, err, ok, optional_bool, optional_str, required_str, AppState, Request};
use crate::store;
use serde_json::json;
use uuid::Uuid;

/// URL slug for a subject name: lowercased, runs of non-alphanumerics
/// collapsed to single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

fn handle_pupils_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target_level = optional_str(req, "targetLevel");
    if let Some(t) = target_level.as_deref() {
        if !matches!(t, "small" | "medium" | "large") {
            return err(
                &req.id,
                "bad_params",
                "targetLevel must be one of: small, medium, large",
                Some(json!({ "targetLevel": t })),
            );
        }
    }

    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO pupils(id, name, target_level) VALUES (?, ?, ?)",
        (&id, &name, &target_level),
    ) {
        Ok(_) => ok(&req.id, json!({ "pupilId": id })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_pupils_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::load_pupils(conn) {
        Ok(pupils) => ok(&req.id, json!({ "pupils": pupils })),
        Err(e) => crate::ipc::engine_err(req, e),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_core = optional_bool(req, "isCore");
    let is_rainbow_award = optional_bool(req, "isRainbowAward");
    let is_child_of = optional_str(req, "isChildOf");

    let id = Uuid::new_v4().to_string();
    let slug = slugify(&name);
    match conn.execute(
        "INSERT INTO subjects(id, name, slug, is_core, is_child_of, is_rainbow_award)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &slug,
            is_core as i64,
            &is_child_of,
            is_rainbow_award as i64,
        ),
    ) {
        Ok(_) => ok(&req.id, json!({ "subjectId": id, "slug": slug })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::load_subjects(conn) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => crate::ipc::engine_err(req, e),
    }
}

fn handle_modules_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let level = match required_str(req, "level") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let order = match req.params.get("order").and_then(|v| v.as_i64()) {
        Some(v) if v >= 0 => v,
        _ => return err(&req.id, "bad_params", "order must be a non-negative integer", None),
    };
    let capability_names: Vec<String> = req
        .params
        .get("capabilities")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let module_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO modules(id, level, ord) VALUES (?, ?, ?)",
        (&module_id, &level, order),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    let mut capability_ids = Vec::with_capacity(capability_names.len());
    for (i, cap_name) in capability_names.iter().enumerate() {
        let cap_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO capabilities(id, module_id, name, sort_order) VALUES (?, ?, ?, ?)",
            (&cap_id, &module_id, cap_name, i as i64),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
        capability_ids.push(cap_id);
    }

    ok(
        &req.id,
        json!({ "moduleId": module_id, "capabilityIds": capability_ids }),
    )
}

fn handle_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let org_id = optional_str(req, "orgId");
    let pupil_ids: Vec<String> = req
        .params
        .get("pupilIds")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO groups(id, name, org_id) VALUES (?, ?, ?)",
        (&group_id, &name, &org_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    for (i, pupil_id) in pupil_ids.iter().enumerate() {
        if let Err(e) = conn.execute(
            "INSERT INTO group_members(group_id, pupil_id, sort_order) VALUES (?, ?, ?)",
            (&group_id, pupil_id, i as i64),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "groupId": group_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "pupils.create" => Some(handle_pupils_create(state, req)),
        "pupils.list" => Some(handle_pupils_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "modules.create" => Some(handle_modules_create(state, req)),
        "groups.create" => Some(handle_groups_create(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn slugs_are_lowercase_and_hyphenated() {
        assert_eq!(slugify("Maths"), "maths");
        assert_eq!(slugify("Shape and Space"), "shape-and-space");
        assert_eq!(slugify("  PE / Games!  "), "pe-games");
    }
}
