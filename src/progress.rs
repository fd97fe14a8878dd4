use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const TRACK_STEP: &str = "step";
pub const TRACK_STAGE: &str = "stage";
pub const TRACK_BAND: &str = "band";
pub const TRACK_PHASE: &str = "phase";
pub const TRACK_AWARD: &str = "award";

pub const COMPETENCY_COMPLETE: &str = "complete";

/// Number of modules in the "step" track; "stage" orders sit above it
/// on the linearized 1-12 scale.
pub const STEP_TRACK_SPAN: i64 = 6;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ProgressError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelStatus {
    Emerging,
    Developing,
    Secure,
    Complete,
    NotStarted,
}

impl LevelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelStatus::Emerging => "emerging",
            LevelStatus::Developing => "developing",
            LevelStatus::Secure => "secure",
            LevelStatus::Complete => "complete",
            LevelStatus::NotStarted => "notstarted",
        }
    }

    pub fn parse(s: &str) -> Option<LevelStatus> {
        match s {
            "emerging" => Some(LevelStatus::Emerging),
            "developing" => Some(LevelStatus::Developing),
            "secure" => Some(LevelStatus::Secure),
            "complete" => Some(LevelStatus::Complete),
            "notstarted" => Some(LevelStatus::NotStarted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub is_core: bool,
    pub is_child_of: Option<String>,
    pub is_rainbow_award: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    /// Curriculum track: "step", "stage", "band", "phase" or "award".
    pub level: String,
    pub order: i64,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competency {
    pub id: String,
    pub status: String,
    pub capability_fk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: String,
    pub pupil_id: String,
    pub subject_id: String,
    pub module: Option<Module>,
    pub status: Option<LevelStatus>,
    pub was_quick_assessed: bool,
    pub percent_complete: i64,
    pub competencies: Vec<Competency>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pupil {
    pub id: String,
    pub name: String,
    pub target_level: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub org_id: Option<String>,
    pub pupils: Vec<Pupil>,
}

/// Maps a (track, order) pair onto the single 1-12 scale used for
/// cross-track comparison. "stage" orders sit above the step track.
pub fn normalised_module_number(module_level: &str, module_order: i64) -> i64 {
    if module_level == TRACK_STAGE {
        module_order + STEP_TRACK_SPAN
    } else {
        module_order
    }
}

/// One comparable decimal per level: normalized number plus the percent as
/// hundredths. A level at 100% rounds up to the next whole number.
///
/// Computed over integer hundredths with a single division so the result
/// compares exactly against decimal literals (3.45 == score("step", 3, 45)).
pub fn calculate_score(module_level: &str, module_order: i64, percent_complete: i64) -> f64 {
    let n = normalised_module_number(module_level, module_order);
    if percent_complete == 100 {
        (n + 1) as f64
    } else {
        (n * 100 + percent_complete) as f64 / 100.0
    }
}

/// Human-facing score label: "{n}.{percent}", or the next whole number at
/// 100%. Distinct from `calculate_score`; "7.5" here means 7 + 5%, and report
/// consumers expect that rendering.
pub fn module_label(module_level: &str, module_order: i64, percent_complete: i64) -> String {
    let n = normalised_module_number(module_level, module_order);
    if percent_complete == 100 {
        (n + 1).to_string()
    } else {
        format!("{}.{}", n, percent_complete)
    }
}

/// Two-decimal rounding used for target scores: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Coarse percent for quick-assessed levels, derived from the pupil-entered
/// status instead of per-competency tallying.
pub fn percent_from_status(status: LevelStatus) -> i64 {
    match status {
        LevelStatus::Emerging => 25,
        LevelStatus::Developing => 60,
        LevelStatus::Secure => 75,
        _ => 100,
    }
}

/// Percent-to-status bands. The >75 and >60 branches both resolve to secure;
/// the split is deliberate and must not be collapsed.
pub fn status_from_percent(percent: i64) -> LevelStatus {
    if percent == 100 {
        LevelStatus::Complete
    } else if percent > 75 {
        LevelStatus::Secure
    } else if percent > 60 {
        LevelStatus::Secure
    } else if percent > 25 {
        LevelStatus::Developing
    } else if percent >= 0 {
        LevelStatus::Emerging
    } else {
        LevelStatus::NotStarted
    }
}

/// Competency records whose capability belongs to the module's capability
/// list. Competencies pointing at capabilities from other modules are ignored.
pub fn matched_competencies<'a>(
    competencies: &'a [Competency],
    capabilities: &[String],
) -> Vec<&'a Competency> {
    let caps: HashSet<&str> = capabilities.iter().map(String::as_str).collect();
    competencies
        .iter()
        .filter(|c| caps.contains(c.capability_fk.as_str()))
        .collect()
}

/// Floor of complete-matched over the module's capability count, as 0-100.
/// Zero when either collection is empty.
pub fn percent_complete(competencies: &[Competency], capabilities: &[String]) -> i64 {
    if competencies.is_empty() || capabilities.is_empty() {
        return 0;
    }
    let complete = matched_competencies(competencies, capabilities)
        .iter()
        .filter(|c| c.status == COMPETENCY_COMPLETE)
        .count();
    ((complete * 100) / capabilities.len()) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub percent_complete: i64,
    pub status: LevelStatus,
}

/// Percent/status for one level. Quick-assessed levels take their percent from
/// the coarse status and keep that status; fully-assessed levels count
/// competencies against the module's capabilities and derive the status from
/// the percent. None when the level has no module (cannot be scored) or a
/// quick-assessed level has no status yet.
pub fn evaluate_level(level: &Level) -> Option<Evaluation> {
    let module = level.module.as_ref()?;
    if level.was_quick_assessed {
        let status = level.status?;
        return Some(Evaluation {
            percent_complete: percent_from_status(status),
            status,
        });
    }
    let percent = percent_complete(&level.competencies, &module.capabilities);
    Some(Evaluation {
        percent_complete: percent,
        status: status_from_percent(percent),
    })
}

fn track_first<'a>(mut levels: Vec<&'a Level>, track: &str) -> Vec<&'a Level> {
    levels.sort_by_key(|l| l.module.as_ref().map(|m| m.level != track).unwrap_or(true));
    levels
}

/// Deterministic multi-key ordering of one pupil+subject's levels: ascending
/// module order, then stable matches-first partitions for award, phase, band,
/// stage and step. The last partition dominates, so the cumulative order is
/// step, stage, band, phase, award, with module order as the innermost
/// tiebreak. Levels without a module cannot be ranked and are dropped.
pub fn sort_levels(levels: &[Level]) -> Vec<&Level> {
    let mut sorted: Vec<&Level> = levels.iter().filter(|l| l.module.is_some()).collect();
    sorted.sort_by_key(|l| l.module.as_ref().map(|m| m.order).unwrap_or(0));
    for track in [TRACK_AWARD, TRACK_PHASE, TRACK_BAND, TRACK_STAGE, TRACK_STEP] {
        sorted = track_first(sorted, track);
    }
    sorted
}

/// The most advanced level with any recorded activity, or None when nothing
/// has a status yet.
pub fn current_level(levels: &[Level]) -> Option<&Level> {
    sort_levels(levels)
        .into_iter()
        .filter(|l| l.status.is_some())
        .last()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGroup {
    pub name: String,
    pub is_core: bool,
    pub subjects: Vec<Subject>,
}

/// Partitions the subject catalog into parent/child groups plus the two
/// synthetic buckets, and flattens the result into one ordered list.
///
/// Parent groups are named by `isChildOf` references; children sort core-first
/// and the group inherits the first child's core flag. Unparented subjects
/// split into "Rainbow Awards" and "Remaining subjects". Parents sort
/// alphabetically, the buckets append after them, and a final stable
/// core-first pass orders the whole sequence.
pub fn sort_subjects(subjects: &[Subject]) -> (Vec<SubjectGroup>, Vec<Subject>) {
    let normal: Vec<&Subject> = subjects.iter().filter(|s| s.is_child_of.is_none()).collect();

    let mut parent_names: Vec<&str> = Vec::new();
    for s in subjects {
        if let Some(parent) = s.is_child_of.as_deref() {
            if !parent_names.contains(&parent) {
                parent_names.push(parent);
            }
        }
    }

    let mut groups: Vec<SubjectGroup> = parent_names
        .iter()
        .map(|parent| {
            let mut children: Vec<Subject> = subjects
                .iter()
                .filter(|s| s.is_child_of.as_deref() == Some(*parent))
                .cloned()
                .collect();
            children.sort_by_key(|s| !s.is_core);
            SubjectGroup {
                name: parent.to_string(),
                is_core: children.first().map(|s| s.is_core).unwrap_or(false),
                subjects: children,
            }
        })
        .collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));

    let remaining = SubjectGroup {
        name: "Remaining subjects".to_string(),
        is_core: false,
        subjects: normal
            .iter()
            .filter(|s| !s.is_rainbow_award)
            .map(|s| (*s).clone())
            .collect(),
    };
    let rainbow = SubjectGroup {
        name: "Rainbow Awards".to_string(),
        is_core: false,
        subjects: normal
            .iter()
            .filter(|s| s.is_rainbow_award)
            .map(|s| (*s).clone())
            .collect(),
    };
    groups.push(remaining);
    groups.push(rainbow);

    groups.sort_by_key(|g| !g.is_core);

    let flattened: Vec<Subject> = groups
        .iter()
        .flat_map(|g| g.subjects.iter().cloned())
        .collect();
    (groups, flattened)
}
