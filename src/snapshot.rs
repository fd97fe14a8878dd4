//! Snapshot-triggered bulk upsert: one PupilSubjectScore per (pupil, subject)
//! pair across the whole catalog, then one target per score.
//!
//! Idempotence comes from a single up-front existence check: pairs that
//! already hold a score are never re-created. Creation runs in batches and an
//! individual failure is logged without aborting the rest of the run.

use crate::progress::{calculate_score, round_off_2_decimals, Level, ProgressError};
use crate::store::{self, ScoreRow};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

const BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    pub scores_created: usize,
    pub targets_created: usize,
}

/// Target increment for a pupil's target-level setting.
pub fn target_increment(target_level: Option<&str>) -> f64 {
    match target_level {
        Some("small") => 0.2,
        Some("medium") => 0.4,
        Some("large") => 0.4,
        _ => 0.4,
    }
}

/// Score for one (pupil, subject) pair at snapshot time: the pair's most
/// recently created level, scored from its module and cached percentage.
/// Zero when the pair has no levels or the newest level has no module.
fn pair_score(levels: &mut Vec<&Level>) -> f64 {
    if levels.is_empty() {
        return 0.0;
    }
    levels.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let newest = levels[0];
    match newest.module.as_ref() {
        Some(module) => calculate_score(&module.level, module.order, newest.percent_complete),
        None => 0.0,
    }
}

pub fn on_snapshot_created(
    conn: &Connection,
    snapshot_id: &str,
) -> Result<SnapshotStats, ProgressError> {
    let pupils = store::load_pupils(conn)?;
    let subjects = store::load_subjects(conn)?;
    let existing = store::load_scores(conn)?;
    tracing::info!(
        snapshot_id,
        pupils = pupils.len(),
        subjects = subjects.len(),
        "snapshot: computing pupil subject scores"
    );

    let existing_pairs: HashSet<(String, String)> = existing
        .iter()
        .map(|s| (s.pupil_id.clone(), s.subject_id.clone()))
        .collect();

    let all_levels = store::load_levels_with_modules(conn)?;
    let mut levels_by_pair: HashMap<(String, String), Vec<&Level>> = HashMap::new();
    for level in &all_levels {
        levels_by_pair
            .entry((level.pupil_id.clone(), level.subject_id.clone()))
            .or_default()
            .push(level);
    }

    let target_level_by_pupil: HashMap<&str, Option<&str>> = pupils
        .iter()
        .map(|p| (p.id.as_str(), p.target_level.as_deref()))
        .collect();

    // Pass one: fill in the missing pairs of the cross-product.
    let mut to_create: Vec<(String, String, f64)> = Vec::new();
    for pupil in &pupils {
        for subject in &subjects {
            let key = (pupil.id.clone(), subject.id.clone());
            if existing_pairs.contains(&key) {
                continue;
            }
            let score = levels_by_pair
                .get_mut(&key)
                .map(pair_score)
                .unwrap_or(0.0);
            to_create.push((key.0, key.1, score));
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut created: Vec<ScoreRow> = Vec::new();
    for batch in to_create.chunks(BATCH_SIZE) {
        for (pupil_id, subject_id, score) in batch {
            let id = Uuid::new_v4().to_string();
            let inserted = conn.execute(
                "INSERT INTO pupil_subject_scores(id, pupil_id, subject_id, current_score, published_at)
                 VALUES (?, ?, ?, ?, ?)",
                (&id, pupil_id, subject_id, score, &now),
            );
            match inserted {
                Ok(_) => created.push(ScoreRow {
                    id,
                    pupil_id: pupil_id.clone(),
                    subject_id: subject_id.clone(),
                    current_score: *score,
                    pupil_target_level: target_level_by_pupil
                        .get(pupil_id.as_str())
                        .and_then(|t| t.map(|t| t.to_string())),
                }),
                Err(e) => {
                    tracing::warn!(%pupil_id, %subject_id, error = %e, "score create failed");
                }
            }
        }
    }
    tracing::info!(snapshot_id, created = created.len(), "snapshot: scores created");

    // Pass two: one target per score, existing and newly created alike.
    let mut targets_created = 0usize;
    let all_scores: Vec<&ScoreRow> = existing.iter().chain(created.iter()).collect();
    for batch in all_scores.chunks(BATCH_SIZE) {
        for score in batch {
            let increment = target_increment(score.pupil_target_level.as_deref());
            let target_score = round_off_2_decimals(score.current_score + increment);
            match store::insert_target(conn, snapshot_id, score, score.current_score, target_score)
            {
                Ok(_) => targets_created += 1,
                Err(e) => {
                    tracing::warn!(
                        pupil_id = %score.pupil_id,
                        subject_id = %score.subject_id,
                        error = %e.message,
                        "target create failed"
                    );
                }
            }
        }
    }
    tracing::info!(snapshot_id, targets_created, "snapshot: targets created");

    Ok(SnapshotStats {
        scores_created: created.len(),
        targets_created,
    })
}
