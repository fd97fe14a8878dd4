use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_hexagonsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn hexagonsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Session {
    fn open(prefix: &str) -> Session {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut session = Session {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        let path = workspace.to_string_lossy().to_string();
        session.call_ok("workspace.select", json!({ "path": path }));
        session
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn call_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn create_id(&mut self, method: &str, params: serde_json::Value, key: &str) -> String {
        self.call_ok(method, params)
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| panic!("{} missing {}", method, key))
            .to_string()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn pupil_and_group_reports_align_with_the_subject_catalog() {
    let mut s = Session::open("hexagons-reports-pipeline");

    let ada = s.create_id("pupils.create", json!({ "name": "Ada" }), "pupilId");
    let grace = s.create_id("pupils.create", json!({ "name": "Grace" }), "pupilId");

    let numeracy = s.create_id(
        "subjects.create",
        json!({ "name": "Numeracy", "isCore": true, "isChildOf": "Maths" }),
        "subjectId",
    );
    let _shape = s.create_id(
        "subjects.create",
        json!({ "name": "Shape and Space", "isChildOf": "Maths" }),
        "subjectId",
    );
    let _art = s.create_id("subjects.create", json!({ "name": "Art" }), "subjectId");
    let _gold = s.create_id(
        "subjects.create",
        json!({ "name": "Gold Award", "isRainbowAward": true }),
        "subjectId",
    );

    let module = s.call_ok(
        "modules.create",
        json!({ "level": "step", "order": 2, "capabilities": ["a", "b", "c", "d"] }),
    );
    let module_id = module.get("moduleId").and_then(|v| v.as_str()).unwrap().to_string();
    let capability_ids: Vec<String> = module
        .get("capabilityIds")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();

    let level_id = s.create_id(
        "levels.create",
        json!({
            "pupilId": ada,
            "subjectId": numeracy,
            "moduleId": module_id,
            "status": "emerging"
        }),
        "levelId",
    );
    for capability in capability_ids.iter().take(2) {
        s.call_ok(
            "competencies.create",
            json!({ "levelId": level_id, "capabilityFk": capability, "status": "complete" }),
        );
    }

    let report = s.call_ok("reports.pupil", json!({ "pupilId": ada }));

    let group_names: Vec<String> = report
        .get("groupedSubjects")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|g| g.get("name").and_then(|v| v.as_str()).unwrap().to_string())
        .collect();
    assert_eq!(
        group_names,
        vec!["Maths", "Remaining subjects", "Rainbow Awards"]
    );

    let subject_reports = report
        .get("subjectReports")
        .and_then(|v| v.as_array())
        .unwrap();
    assert_eq!(subject_reports.len(), 4);

    // Flattened order: Maths children (core child first), then the buckets.
    let first = &subject_reports[0];
    assert_eq!(
        first
            .get("subject")
            .and_then(|s| s.get("name"))
            .and_then(|v| v.as_str()),
        Some("Numeracy")
    );
    // Step 2 at 2 of 4 capabilities complete.
    assert_eq!(first.get("score").and_then(|v| v.as_str()), Some("2.50"));

    // Untouched subjects report zero.
    for other in &subject_reports[1..] {
        assert_eq!(other.get("score").and_then(|v| v.as_str()), Some("0"));
    }

    let group_id = s.create_id(
        "groups.create",
        json!({ "name": "Class 4B", "orgId": "org-1", "pupilIds": [ada, grace] }),
        "groupId",
    );

    let group_report = s.call_ok(
        "reports.group",
        json!({ "groupId": group_id, "orgId": "org-1" }),
    );
    let member_names: Vec<String> = group_report
        .get("pupils")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|p| p.get("name").and_then(|v| v.as_str()).unwrap().to_string())
        .collect();
    assert_eq!(member_names, vec!["Ada", "Grace"]);

    let mismatch = s.call(
        "reports.group",
        json!({ "groupId": group_id, "orgId": "org-2" }),
    );
    assert_eq!(mismatch.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        mismatch
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("org_mismatch")
    );
}

#[test]
fn quick_assessed_levels_report_from_their_coarse_status() {
    let mut s = Session::open("hexagons-reports-quick");

    let pupil = s.create_id("pupils.create", json!({ "name": "Ada" }), "pupilId");
    let subject = s.create_id("subjects.create", json!({ "name": "Reading" }), "subjectId");
    let module_id = s.create_id(
        "modules.create",
        json!({ "level": "stage", "order": 1, "capabilities": [] }),
        "moduleId",
    );
    s.create_id(
        "levels.create",
        json!({
            "pupilId": pupil,
            "subjectId": subject,
            "moduleId": module_id,
            "status": "secure",
            "wasQuickAssessed": true
        }),
        "levelId",
    );

    let report = s.call_ok("reports.pupil", json!({ "pupilId": pupil }));
    let subject_reports = report
        .get("subjectReports")
        .and_then(|v| v.as_array())
        .unwrap();
    // Stage 1 normalizes to 7; secure maps to 75%.
    assert_eq!(
        subject_reports[0].get("score").and_then(|v| v.as_str()),
        Some("7.75")
    );
}

#[test]
fn unknown_pupil_report_is_not_found() {
    let mut s = Session::open("hexagons-reports-notfound");
    let resp = s.call("reports.pupil", json!({ "pupilId": "ghost" }));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_found")
    );
}
