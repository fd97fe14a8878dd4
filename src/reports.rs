//! Per-pupil and per-group subject reports.
//!
//! Report building is read-only apart from the evaluation cache write-back on
//! levels, which is best-effort: a failed write-back is logged and the
//! in-memory result still flows into the report.

use crate::progress::{
    current_level, evaluate_level, module_label, sort_subjects, Level, ProgressError, Subject,
    SubjectGroup,
};
use crate::store;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub id: String,
    pub subject: Subject,
    pub score: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PupilReport {
    pub id: String,
    pub name: String,
    pub grouped_subjects: Vec<SubjectGroup>,
    pub subject_reports: Vec<SubjectReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub id: String,
    pub name: String,
    pub grouped_subjects: Vec<SubjectGroup>,
    pub pupils: Vec<PupilReport>,
}

/// Builds one pupil's subject-by-subject report from a pre-loaded level set.
pub fn build_pupil_report(
    conn: &Connection,
    pupil_id: &str,
    grouped_subjects: &[SubjectGroup],
    flattened_subjects: &[Subject],
    levels_with_modules: &[Level],
) -> Result<PupilReport, ProgressError> {
    let pupil = store::load_pupil(conn, pupil_id)?
        .ok_or_else(|| ProgressError::new("not_found", "pupil not found"))?;
    tracing::debug!(pupil = %pupil.name, "generating pupil report");

    let mut subject_reports = Vec::with_capacity(flattened_subjects.len());
    for subject in flattened_subjects {
        let candidates: Vec<Level> = levels_with_modules
            .iter()
            .filter(|level| level.subject_id == subject.id && level.pupil_id == pupil.id)
            .filter(|level| {
                level
                    .module
                    .as_ref()
                    .map(|m| m.order > 0 && !m.level.is_empty())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let score = match current_level(&candidates) {
            Some(level) => score_label(conn, level),
            None => "0".to_string(),
        };
        subject_reports.push(SubjectReport {
            id: subject.id.clone(),
            subject: subject.clone(),
            score,
        });
    }

    Ok(PupilReport {
        id: pupil.id,
        name: pupil.name,
        grouped_subjects: grouped_subjects.to_vec(),
        subject_reports,
    })
}

fn score_label(conn: &Connection, level: &Level) -> String {
    let Some(module) = level.module.as_ref() else {
        return "0".to_string();
    };
    let Some(evaluation) = evaluate_level(level) else {
        return "0".to_string();
    };
    // Cache write-back; the report keeps the in-memory result either way.
    if let Err(e) =
        store::write_level_evaluation(conn, &level.id, evaluation.percent_complete, evaluation.status)
    {
        tracing::warn!(level_id = %level.id, error = %e.message, "level cache write-back failed");
    }
    module_label(&module.level, module.order, evaluation.percent_complete)
}

/// Report for a single pupil across the full subject catalog.
pub fn pupil_report(conn: &Connection, pupil_id: &str) -> Result<PupilReport, ProgressError> {
    let subjects = store::load_subjects(conn)?;
    let (grouped_subjects, flattened_subjects) = sort_subjects(&subjects);
    let levels = store::load_levels_with_modules(conn)?;
    build_pupil_report(conn, pupil_id, &grouped_subjects, &flattened_subjects, &levels)
}

/// Reports for every member of a group, in member order. Fails when the group
/// is unknown or belongs to a different organisation.
pub fn group_report(
    conn: &Connection,
    group_id: &str,
    org_id: &str,
) -> Result<GroupReport, ProgressError> {
    let group = store::load_group(conn, group_id)?
        .ok_or_else(|| ProgressError::new("not_found", "group not found"))?;
    if let Some(group_org) = group.org_id.as_deref() {
        if group_org != org_id {
            return Err(ProgressError::new(
                "org_mismatch",
                "incorrect organisation for this group",
            ));
        }
    }

    let subjects = store::load_subjects(conn)?;
    let (grouped_subjects, flattened_subjects) = sort_subjects(&subjects);
    let levels = store::load_levels_with_modules(conn)?;

    let mut pupils = Vec::with_capacity(group.pupils.len());
    for pupil in &group.pupils {
        pupils.push(build_pupil_report(
            conn,
            &pupil.id,
            &grouped_subjects,
            &flattened_subjects,
            &levels,
        )?);
    }

    Ok(GroupReport {
        id: group.id,
        name: group.name,
        grouped_subjects,
        pupils,
    })
}
