use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::FeedbackError;
use crate::db::{
    get_feedback_for_version, get_patient, get_template, insert_feedback, update_template_stats, DatabaseError,
};
use crate::models::enums::QualityBand;
use crate::models::{FeedbackRecord, TemplateStatistics};

/// Attempts at the optimistic statistics update before giving up.
pub const MAX_STATS_ATTEMPTS: usize = 10;

/// What a reviewer submitted about one summary.
#[derive(Debug, Clone)]
pub struct FeedbackInput {
    pub patient_id: Uuid,
    pub rating: u8,
    pub corrections: Option<String>,
}

/// Result of recording feedback: the stored record's identity plus the
/// template statistics after the update, when the summary had a template.
#[derive(Debug, Clone, Serialize)]
pub struct UpdatedMetrics {
    pub feedback_id: Uuid,
    pub quality: QualityBand,
    pub prompt_version: Option<String>,
    pub statistics: Option<TemplateStatistics>,
}

/// Running mean after folding in one more sample.
pub fn incremental_mean(current: f64, count: i64, sample: f64) -> f64 {
    let n = (count + 1) as f64;
    current + (sample - current) / n
}

/// Fold one rating into `current`.
pub fn fold_statistics(current: &TemplateStatistics, rating: u8, cost_usd: f64) -> TemplateStatistics {
    TemplateStatistics {
        version: current.version.clone(),
        avg_rating: incremental_mean(current.avg_rating, current.usage_count, rating as f64),
        avg_cost: incremental_mean(current.avg_cost, current.usage_count, cost_usd),
        usage_count: current.usage_count + 1,
    }
}

/// Append the feedback and fold it into its template's statistics.
///
/// The feedback row and the statistics write commit together. A revision
/// conflict rolls both back and the fold is redone on fresh statistics.
pub fn record_feedback(conn: &Connection, input: &FeedbackInput) -> Result<UpdatedMetrics, FeedbackError> {
    if !(1..=5).contains(&input.rating) {
        return Err(FeedbackError::InvalidRating(input.rating));
    }
    let patient = get_patient(conn, &input.patient_id)?.ok_or(FeedbackError::PatientNotFound(input.patient_id))?;

    let record = FeedbackRecord {
        id: Uuid::new_v4(),
        patient_id: patient.id,
        rating: input.rating,
        corrections: input.corrections.clone().filter(|c| !c.trim().is_empty()),
        quality: QualityBand::from_rating(input.rating),
        prompt_version: patient.prompt_version.clone(),
        cost_usd: patient.cost_usd,
        created_at: chrono::Local::now().naive_local(),
    };

    let Some(version) = record.prompt_version.clone() else {
        insert_feedback(conn, &record)?;
        tracing::info!(patient_id = %record.patient_id, rating = record.rating, "Feedback recorded without template");
        return Ok(metrics(&record, None));
    };

    for attempt in 1..=MAX_STATS_ATTEMPTS {
        let Some(template) = get_template(conn, &version)? else {
            insert_feedback(conn, &record)?;
            tracing::warn!(version = %version, "Feedback references an unknown template");
            return Ok(metrics(&record, None));
        };

        let current = TemplateStatistics {
            version: template.version.clone(),
            avg_rating: template.avg_rating,
            avg_cost: template.avg_cost,
            usage_count: template.usage_count,
        };
        let updated = fold_statistics(&current, record.rating, record.cost_usd);

        // Write first so the transaction takes the write lock before the
        // compare-and-swap reads the revision.
        let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
        insert_feedback(&tx, &record)?;
        match update_template_stats(&tx, &updated, template.revision) {
            Ok(()) => {
                tx.commit().map_err(DatabaseError::from)?;
                tracing::info!(
                    version = %version,
                    rating = record.rating,
                    usage_count = updated.usage_count,
                    "Feedback recorded"
                );
                return Ok(metrics(&record, Some(updated)));
            }
            Err(DatabaseError::RevisionConflict { .. }) => {
                drop(tx);
                tracing::debug!(version = %version, attempt, "Template statistics conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(FeedbackError::Contention { version })
}

fn metrics(record: &FeedbackRecord, statistics: Option<TemplateStatistics>) -> UpdatedMetrics {
    UpdatedMetrics {
        feedback_id: record.id,
        quality: record.quality,
        prompt_version: record.prompt_version.clone(),
        statistics,
    }
}

/// Statistics for `version` recomputed from every feedback record as plain
/// arithmetic means.
pub fn replay_statistics(conn: &Connection, version: &str) -> Result<TemplateStatistics, DatabaseError> {
    let records = get_feedback_for_version(conn, version)?;
    let count = records.len();
    let (avg_rating, avg_cost) = if count == 0 {
        (0.0, 0.0)
    } else {
        let ratings: f64 = records.iter().map(|r| r.rating as f64).sum();
        let costs: f64 = records.iter().map(|r| r.cost_usd).sum();
        (ratings / count as f64, costs / count as f64)
    };
    Ok(TemplateStatistics {
        version: version.to_string(),
        avg_rating,
        avg_cost,
        usage_count: count as i64,
    })
}

/// Overwrite a template's statistics with the replayed values.
pub fn rebuild_statistics(conn: &Connection, version: &str) -> Result<TemplateStatistics, FeedbackError> {
    for _ in 0..MAX_STATS_ATTEMPTS {
        let template = get_template(conn, version)?.ok_or_else(|| DatabaseError::NotFound {
            entity_type: "prompt_template".into(),
            id: version.to_string(),
        })?;
        let replayed = replay_statistics(conn, version)?;
        match update_template_stats(conn, &replayed, template.revision) {
            Ok(()) => return Ok(replayed),
            Err(DatabaseError::RevisionConflict { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(FeedbackError::Contention {
        version: version.to_string(),
    })
}
