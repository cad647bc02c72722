use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::patient::{format_datetime, parse_datetime};
use crate::db::DatabaseError;
use crate::models::enums::QualityBand;
use crate::models::*;

const FEEDBACK_COLUMNS: &str =
    "id, patient_id, rating, corrections, quality, prompt_version, cost_usd, created_at";

pub fn insert_feedback(conn: &Connection, record: &FeedbackRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO feedback (id, patient_id, rating, corrections, quality, prompt_version,
         cost_usd, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id.to_string(),
            record.patient_id.to_string(),
            record.rating as i64,
            record.corrections,
            record.quality.as_str(),
            record.prompt_version,
            record.cost_usd,
            format_datetime(&record.created_at),
        ],
    )?;
    Ok(())
}

/// Every feedback record tagged with `version`, oldest first.
pub fn get_feedback_for_version(conn: &Connection, version: &str) -> Result<Vec<FeedbackRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE prompt_version = ?1
         ORDER BY created_at ASC"
    );
    query_feedback(conn, &sql, params![version])
}

/// Feedback on or after `since`, oldest first.
pub fn get_feedback_since(conn: &Connection, since: &NaiveDateTime) -> Result<Vec<FeedbackRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE created_at >= ?1
         ORDER BY created_at ASC"
    );
    query_feedback(conn, &sql, params![format_datetime(since)])
}

pub fn get_feedback_for_patient(conn: &Connection, patient_id: &Uuid) -> Result<Vec<FeedbackRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {FEEDBACK_COLUMNS} FROM feedback WHERE patient_id = ?1
         ORDER BY created_at ASC"
    );
    query_feedback(conn, &sql, params![patient_id.to_string()])
}

fn query_feedback(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<FeedbackRecord>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, f64>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, patient_id, rating, corrections, quality, prompt_version, cost_usd, created_at) = row?;
        records.push(FeedbackRecord {
            id: Uuid::parse_str(&id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            patient_id: Uuid::parse_str(&patient_id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            rating: u8::try_from(rating)
                .map_err(|e| DatabaseError::ConstraintViolation(format!("rating: {e}")))?,
            corrections,
            quality: QualityBand::from_str(&quality)?,
            prompt_version,
            cost_usd,
            created_at: parse_datetime(&created_at)?,
        });
    }
    Ok(records)
}
