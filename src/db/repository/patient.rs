use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S%.f";

const PATIENT_COLUMNS: &str = "id, name_token, ssn_token, dob_token, address_token,
    condition, department, priority, lab_results, redacted_text, source, filename,
    ai_summary, prompt_version, strategy, input_tokens, output_tokens, cost_usd,
    duration_ms, status, processed, failure_class, failure_hint, revision,
    created_at, processed_at";

pub fn insert_patient(conn: &Connection, record: &PatientRecord) -> Result<(), DatabaseError> {
    let labs = serde_json::to_string(&record.lab_results)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    conn.execute(
        "INSERT INTO patients (id, name_token, ssn_token, dob_token, address_token,
         condition, department, priority, lab_results, redacted_text, source, filename,
         ai_summary, prompt_version, strategy, input_tokens, output_tokens, cost_usd,
         duration_ms, status, processed, failure_class, failure_hint, revision,
         created_at, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
        params![
            record.id.to_string(),
            record.tokens.name,
            record.tokens.ssn,
            record.tokens.dob,
            record.tokens.address,
            record.condition,
            record.department,
            record.priority.as_str(),
            labs,
            record.redacted_text,
            record.source.as_str(),
            record.filename,
            record.ai_summary,
            record.prompt_version,
            record.strategy,
            record.input_tokens,
            record.output_tokens,
            record.cost_usd,
            record.duration_ms,
            record.status.as_str(),
            record.processed as i32,
            record.failure_class.map(|c| c.as_str()),
            record.failure_hint,
            record.revision,
            record.created_at.format(DATETIME_FMT).to_string(),
            record.processed_at.map(|d| d.format(DATETIME_FMT).to_string()),
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<PatientRecord>, DatabaseError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], patient_row_from_rusqlite)
        .optional()?;
    row.map(patient_from_row).transpose()
}

/// Fetch or fail with `NotFound`.
pub fn require_patient(conn: &Connection, id: &Uuid) -> Result<PatientRecord, DatabaseError> {
    get_patient(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "patient".into(),
        id: id.to_string(),
    })
}

/// Most recently processed records, newest first.
pub fn get_recent_processed(conn: &Connection, limit: usize) -> Result<Vec<PatientRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE processed = 1
         ORDER BY processed_at DESC, created_at DESC LIMIT ?1"
    );
    query_patients(conn, &sql, params![limit as i64])
}

/// Processed records on or after `since`, oldest first.
pub fn get_processed_since(
    conn: &Connection,
    since: &NaiveDateTime,
) -> Result<Vec<PatientRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE processed = 1 AND processed_at >= ?1
         ORDER BY processed_at ASC"
    );
    query_patients(conn, &sql, params![since.format(DATETIME_FMT).to_string()])
}

/// Write a successful generation onto the record.
pub fn record_summary(
    conn: &Connection,
    id: &Uuid,
    outcome: &SummaryOutcome,
) -> Result<(), DatabaseError> {
    let now = chrono::Local::now().naive_local();
    let changed = conn.execute(
        "UPDATE patients SET ai_summary = ?1, prompt_version = ?2, strategy = ?3,
         input_tokens = ?4, output_tokens = ?5, cost_usd = ?6, duration_ms = ?7,
         status = 'processed', processed = 1, failure_class = NULL, failure_hint = NULL,
         processed_at = ?8, revision = revision + 1
         WHERE id = ?9",
        params![
            outcome.summary,
            outcome.prompt_version,
            outcome.strategy,
            outcome.input_tokens,
            outcome.output_tokens,
            outcome.cost_usd,
            outcome.duration_ms,
            now.format(DATETIME_FMT).to_string(),
            id.to_string(),
        ],
    )?;
    ensure_changed(changed, id)
}

/// Terminal failure: status `failed` with its classification and a masked hint.
pub fn record_failure(
    conn: &Connection,
    id: &Uuid,
    class: FailureClass,
    hint: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE patients SET status = 'failed', processed = 0, failure_class = ?1,
         failure_hint = ?2, revision = revision + 1
         WHERE id = ?3",
        params![class.as_str(), hint, id.to_string()],
    )?;
    ensure_changed(changed, id)
}

/// Reset a record to `pending` ahead of a reprocess. The previous summary and
/// its metrics are cleared so a failed rerun carries nothing stale.
pub fn reset_for_reprocess(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE patients SET status = 'pending', processed = 0, ai_summary = NULL,
         prompt_version = NULL, strategy = NULL, input_tokens = 0, output_tokens = 0,
         cost_usd = 0, duration_ms = 0, processed_at = NULL,
         failure_class = NULL, failure_hint = NULL, revision = revision + 1
         WHERE id = ?1 AND status != 'review_required'",
        params![id.to_string()],
    )?;
    if changed == 0 {
        let existing = require_patient(conn, id)?;
        return Err(DatabaseError::ConstraintViolation(format!(
            "patient {} is {} and cannot be reprocessed",
            existing.id, existing.status
        )));
    }
    Ok(())
}

pub fn count_patients_by_status(conn: &Connection, status: PatientStatus) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn ensure_changed(changed: usize, id: &Uuid) -> Result<(), DatabaseError> {
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn query_patients(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PatientRecord>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, patient_row_from_rusqlite)?;

    let mut patients = Vec::new();
    for row in rows {
        patients.push(patient_from_row(row?)?);
    }
    Ok(patients)
}

// Internal row type for PatientRecord mapping
struct PatientRow {
    id: String,
    name_token: Option<String>,
    ssn_token: Option<String>,
    dob_token: Option<String>,
    address_token: Option<String>,
    condition: Option<String>,
    department: Option<String>,
    priority: String,
    lab_results: String,
    redacted_text: Option<String>,
    source: String,
    filename: Option<String>,
    ai_summary: Option<String>,
    prompt_version: Option<String>,
    strategy: Option<String>,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
    duration_ms: i64,
    status: String,
    processed: i32,
    failure_class: Option<String>,
    failure_hint: Option<String>,
    revision: i64,
    created_at: String,
    processed_at: Option<String>,
}

fn patient_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<PatientRow, rusqlite::Error> {
    Ok(PatientRow {
        id: row.get(0)?,
        name_token: row.get(1)?,
        ssn_token: row.get(2)?,
        dob_token: row.get(3)?,
        address_token: row.get(4)?,
        condition: row.get(5)?,
        department: row.get(6)?,
        priority: row.get(7)?,
        lab_results: row.get(8)?,
        redacted_text: row.get(9)?,
        source: row.get(10)?,
        filename: row.get(11)?,
        ai_summary: row.get(12)?,
        prompt_version: row.get(13)?,
        strategy: row.get(14)?,
        input_tokens: row.get(15)?,
        output_tokens: row.get(16)?,
        cost_usd: row.get(17)?,
        duration_ms: row.get(18)?,
        status: row.get(19)?,
        processed: row.get(20)?,
        failure_class: row.get(21)?,
        failure_hint: row.get(22)?,
        revision: row.get(23)?,
        created_at: row.get(24)?,
        processed_at: row.get(25)?,
    })
}

pub(crate) fn parse_datetime(value: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(value, DATETIME_FMT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp {value}: {e}")))
}

pub(crate) fn format_datetime(value: &NaiveDateTime) -> String {
    value.format(DATETIME_FMT).to_string()
}

fn patient_from_row(row: PatientRow) -> Result<PatientRecord, DatabaseError> {
    Ok(PatientRecord {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        tokens: PatientTokens {
            name: row.name_token,
            ssn: row.ssn_token,
            dob: row.dob_token,
            address: row.address_token,
        },
        condition: row.condition,
        department: row.department,
        priority: Priority::from_str(&row.priority)?,
        lab_results: serde_json::from_str(&row.lab_results).unwrap_or_default(),
        redacted_text: row.redacted_text,
        source: DocumentSource::from_str(&row.source)?,
        filename: row.filename,
        ai_summary: row.ai_summary,
        prompt_version: row.prompt_version,
        strategy: row.strategy,
        input_tokens: row.input_tokens,
        output_tokens: row.output_tokens,
        cost_usd: row.cost_usd,
        duration_ms: row.duration_ms,
        status: PatientStatus::from_str(&row.status)?,
        processed: row.processed != 0,
        failure_class: row.failure_class.as_deref().map(FailureClass::from_str).transpose()?,
        failure_hint: row.failure_hint,
        revision: row.revision,
        created_at: parse_datetime(&row.created_at)?,
        processed_at: row.processed_at.as_deref().map(parse_datetime).transpose()?,
    })
}
