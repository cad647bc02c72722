use chrono::NaiveDate;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::patient::{format_datetime, parse_datetime};
use crate::db::DatabaseError;
use crate::models::PerformanceSnapshot;

pub fn insert_snapshot(conn: &Connection, snapshot: &PerformanceSnapshot) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO performance_snapshots (id, date, total_processed, avg_accuracy, avg_cost,
         avg_duration_ms, dominant_prompt_version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            snapshot.id.to_string(),
            snapshot.date.to_string(),
            snapshot.total_processed,
            snapshot.avg_accuracy,
            snapshot.avg_cost,
            snapshot.avg_duration_ms,
            snapshot.dominant_prompt_version,
            format_datetime(&snapshot.created_at),
        ],
    )?;
    Ok(())
}

/// Latest snapshots, newest first.
pub fn get_recent_snapshots(conn: &Connection, limit: usize) -> Result<Vec<PerformanceSnapshot>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, date, total_processed, avg_accuracy, avg_cost, avg_duration_ms,
         dominant_prompt_version, created_at
         FROM performance_snapshots ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, f64>(4)?,
            row.get::<_, f64>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut snapshots = Vec::new();
    for row in rows {
        let (id, date, total_processed, avg_accuracy, avg_cost, avg_duration_ms, dominant, created_at) = row?;
        snapshots.push(PerformanceSnapshot {
            id: Uuid::parse_str(&id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| DatabaseError::ConstraintViolation(format!("snapshot date: {e}")))?,
            total_processed,
            avg_accuracy,
            avg_cost,
            avg_duration_ms,
            dominant_prompt_version: dominant,
            created_at: parse_datetime(&created_at)?,
        });
    }
    Ok(snapshots)
}
