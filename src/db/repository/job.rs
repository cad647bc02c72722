use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::patient::format_datetime;
use crate::db::DatabaseError;
use crate::models::enums::{JobStatus, SelectionPolicy};

/// A claimed unit of work: generate the summary for one patient record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub id: i64,
    pub patient_id: Uuid,
    pub policy: Option<SelectionPolicy>,
    pub attempts: i64,
}

pub fn enqueue_job(
    conn: &Connection,
    patient_id: &Uuid,
    policy: Option<SelectionPolicy>,
) -> Result<i64, DatabaseError> {
    let now = chrono::Local::now().naive_local();
    conn.execute(
        "INSERT INTO processing_jobs (patient_id, policy, status, enqueued_at)
         VALUES (?1, ?2, 'queued', ?3)",
        params![patient_id.to_string(), policy.map(|p| p.as_str()), format_datetime(&now)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Atomically move the oldest queued job to `running`. Concurrent workers never
/// receive the same job.
pub fn claim_next_job(conn: &Connection) -> Result<Option<ProcessingJob>, DatabaseError> {
    let now = chrono::Local::now().naive_local();
    let row = conn
        .query_row(
            "UPDATE processing_jobs
             SET status = 'running', attempts = attempts + 1, started_at = ?1
             WHERE id = (SELECT id FROM processing_jobs WHERE status = 'queued' ORDER BY id LIMIT 1)
             RETURNING id, patient_id, policy, attempts",
            params![format_datetime(&now)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((id, patient_id, policy, attempts)) = row else {
        return Ok(None);
    };
    Ok(Some(ProcessingJob {
        id,
        patient_id: Uuid::parse_str(&patient_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        policy: policy.as_deref().map(SelectionPolicy::from_str).transpose()?,
        attempts,
    }))
}

pub fn finish_job(conn: &Connection, id: i64, status: JobStatus, error: Option<&str>) -> Result<(), DatabaseError> {
    let now = chrono::Local::now().naive_local();
    conn.execute(
        "UPDATE processing_jobs SET status = ?1, last_error = ?2, finished_at = ?3 WHERE id = ?4",
        params![status.as_str(), error, format_datetime(&now), id],
    )?;
    Ok(())
}

/// Jobs left `running` by a crashed worker go back to the queue.
pub fn requeue_stale_jobs(conn: &Connection) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE processing_jobs SET status = 'queued', started_at = NULL WHERE status = 'running'",
        [],
    )?;
    Ok(changed)
}

pub fn count_jobs_by_status(conn: &Connection, status: JobStatus) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM processing_jobs WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::patient::insert_patient;
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::DocumentSource;
    use crate::models::{PatientRecord, PatientTokens};

    fn patient(conn: &Connection) -> Uuid {
        let record = PatientRecord::pending(PatientTokens::default(), DocumentSource::Batch, None);
        insert_patient(conn, &record).unwrap();
        record.id
    }

    #[test]
    fn claims_in_fifo_order_once() {
        let conn = open_memory_database().unwrap();
        let a = patient(&conn);
        let b = patient(&conn);
        enqueue_job(&conn, &a, None).unwrap();
        enqueue_job(&conn, &b, Some(SelectionPolicy::AbTest)).unwrap();

        let first = claim_next_job(&conn).unwrap().unwrap();
        assert_eq!(first.patient_id, a);
        assert_eq!(first.attempts, 1);
        let second = claim_next_job(&conn).unwrap().unwrap();
        assert_eq!(second.patient_id, b);
        assert_eq!(second.policy, Some(SelectionPolicy::AbTest));
        assert!(claim_next_job(&conn).unwrap().is_none());
        assert_eq!(count_jobs_by_status(&conn, JobStatus::Running).unwrap(), 2);
    }

    #[test]
    fn finish_and_requeue() {
        let conn = open_memory_database().unwrap();
        let a = patient(&conn);
        let b = patient(&conn);
        enqueue_job(&conn, &a, None).unwrap();
        enqueue_job(&conn, &b, None).unwrap();

        let done = claim_next_job(&conn).unwrap().unwrap();
        finish_job(&conn, done.id, JobStatus::Done, None).unwrap();
        claim_next_job(&conn).unwrap().unwrap();

        assert_eq!(requeue_stale_jobs(&conn).unwrap(), 1);
        assert_eq!(count_jobs_by_status(&conn, JobStatus::Queued).unwrap(), 1);
        assert_eq!(count_jobs_by_status(&conn, JobStatus::Done).unwrap(), 1);
    }
}
