use rusqlite::{params, Connection, OptionalExtension};

use super::patient::{format_datetime, parse_datetime};
use crate::db::DatabaseError;
use crate::models::*;

const TEMPLATE_COLUMNS: &str = "version, description, template, temperature, max_tokens,
    avg_rating, avg_cost, usage_count, active, ab_eligible, last_used, created_at, revision";

/// Insert a template unless its version already exists. Returns true when inserted.
pub fn insert_template_if_absent(conn: &Connection, template: &PromptTemplate) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO prompt_templates (version, description, template, temperature,
         max_tokens, avg_rating, avg_cost, usage_count, active, ab_eligible, last_used,
         created_at, revision)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            template.version,
            template.description,
            template.template,
            template.parameters.temperature as f64,
            template.parameters.max_tokens as i64,
            template.avg_rating,
            template.avg_cost,
            template.usage_count,
            template.active as i32,
            template.ab_eligible as i32,
            template.last_used.as_ref().map(format_datetime),
            format_datetime(&template.created_at),
            template.revision,
        ],
    )?;
    Ok(changed > 0)
}

pub fn get_template(conn: &Connection, version: &str) -> Result<Option<PromptTemplate>, DatabaseError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE version = ?1");
    let row = conn
        .query_row(&sql, params![version], template_row_from_rusqlite)
        .optional()?;
    row.map(template_from_row).transpose()
}

pub fn list_templates(conn: &Connection) -> Result<Vec<PromptTemplate>, DatabaseError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates ORDER BY created_at ASC, version ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], template_row_from_rusqlite)?;

    let mut templates = Vec::new();
    for row in rows {
        templates.push(template_from_row(row?)?);
    }
    Ok(templates)
}

/// Compare-and-swap the running statistics. Fails with `RevisionConflict` when
/// another writer bumped the revision since `expected_revision` was read.
pub fn update_template_stats(
    conn: &Connection,
    stats: &TemplateStatistics,
    expected_revision: i64,
) -> Result<(), DatabaseError> {
    let now = chrono::Local::now().naive_local();
    let changed = conn.execute(
        "UPDATE prompt_templates SET avg_rating = ?1, avg_cost = ?2, usage_count = ?3,
         last_used = ?4, revision = revision + 1
         WHERE version = ?5 AND revision = ?6",
        params![
            stats.avg_rating,
            stats.avg_cost,
            stats.usage_count,
            format_datetime(&now),
            stats.version,
            expected_revision,
        ],
    )?;
    if changed == 0 {
        return match get_template(conn, &stats.version)? {
            Some(_) => Err(DatabaseError::RevisionConflict {
                entity_type: "prompt_template".into(),
                id: stats.version.clone(),
            }),
            None => Err(DatabaseError::NotFound {
                entity_type: "prompt_template".into(),
                id: stats.version.clone(),
            }),
        };
    }
    Ok(())
}

/// Make `version` the single active template.
pub fn set_active_template(conn: &Connection, version: &str) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    let exists: i64 = tx.query_row(
        "SELECT COUNT(*) FROM prompt_templates WHERE version = ?1",
        params![version],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "prompt_template".into(),
            id: version.to_string(),
        });
    }
    tx.execute(
        "UPDATE prompt_templates SET active = (version = ?1), revision = revision + 1",
        params![version],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn get_active_template(conn: &Connection) -> Result<Option<PromptTemplate>, DatabaseError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE active = 1 LIMIT 1");
    let row = conn
        .query_row(&sql, [], template_row_from_rusqlite)
        .optional()?;
    row.map(template_from_row).transpose()
}

struct TemplateRow {
    version: String,
    description: String,
    template: String,
    temperature: f64,
    max_tokens: i64,
    avg_rating: f64,
    avg_cost: f64,
    usage_count: i64,
    active: i32,
    ab_eligible: i32,
    last_used: Option<String>,
    created_at: String,
    revision: i64,
}

fn template_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<TemplateRow, rusqlite::Error> {
    Ok(TemplateRow {
        version: row.get(0)?,
        description: row.get(1)?,
        template: row.get(2)?,
        temperature: row.get(3)?,
        max_tokens: row.get(4)?,
        avg_rating: row.get(5)?,
        avg_cost: row.get(6)?,
        usage_count: row.get(7)?,
        active: row.get(8)?,
        ab_eligible: row.get(9)?,
        last_used: row.get(10)?,
        created_at: row.get(11)?,
        revision: row.get(12)?,
    })
}

fn template_from_row(row: TemplateRow) -> Result<PromptTemplate, DatabaseError> {
    Ok(PromptTemplate {
        version: row.version,
        description: row.description,
        template: row.template,
        parameters: ModelParameters {
            temperature: row.temperature as f32,
            max_tokens: u32::try_from(row.max_tokens)
                .map_err(|e| DatabaseError::ConstraintViolation(format!("max_tokens: {e}")))?,
        },
        avg_rating: row.avg_rating,
        avg_cost: row.avg_cost,
        usage_count: row.usage_count,
        active: row.active != 0,
        ab_eligible: row.ab_eligible != 0,
        last_used: row.last_used.as_deref().map(parse_datetime).transpose()?,
        created_at: parse_datetime(&row.created_at)?,
        revision: row.revision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn template(version: &str, active: bool) -> PromptTemplate {
        PromptTemplate {
            version: version.into(),
            description: format!("template {version}"),
            template: "Summarize {condition} for {name}.".into(),
            parameters: ModelParameters::default(),
            avg_rating: 0.0,
            avg_cost: 0.0,
            usage_count: 0,
            active,
            ab_eligible: true,
            last_used: None,
            created_at: chrono::Local::now().naive_local(),
            revision: 0,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let conn = open_memory_database().unwrap();
        assert!(insert_template_if_absent(&conn, &template("v1.0", true)).unwrap());
        assert!(!insert_template_if_absent(&conn, &template("v1.0", false)).unwrap());
        let loaded = get_template(&conn, "v1.0").unwrap().unwrap();
        assert!(loaded.active);
        assert_eq!(list_templates(&conn).unwrap().len(), 1);
    }

    #[test]
    fn stats_update_checks_revision() {
        let conn = open_memory_database().unwrap();
        insert_template_if_absent(&conn, &template("v1.0", true)).unwrap();
        let stats = TemplateStatistics {
            version: "v1.0".into(),
            avg_rating: 4.0,
            avg_cost: 0.002,
            usage_count: 1,
        };
        update_template_stats(&conn, &stats, 0).unwrap();

        let err = update_template_stats(&conn, &stats, 0).unwrap_err();
        assert!(matches!(err, DatabaseError::RevisionConflict { .. }));

        let loaded = get_template(&conn, "v1.0").unwrap().unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.usage_count, 1);
        assert!(loaded.last_used.is_some());
    }

    #[test]
    fn stats_update_on_unknown_version_is_not_found() {
        let conn = open_memory_database().unwrap();
        let stats = TemplateStatistics {
            version: "v9.0".into(),
            avg_rating: 1.0,
            avg_cost: 0.0,
            usage_count: 1,
        };
        assert!(matches!(
            update_template_stats(&conn, &stats, 0),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn set_active_leaves_exactly_one() {
        let conn = open_memory_database().unwrap();
        insert_template_if_absent(&conn, &template("v1.0", true)).unwrap();
        insert_template_if_absent(&conn, &template("v2.0", false)).unwrap();

        set_active_template(&conn, "v2.0").unwrap();
        let active: Vec<_> = list_templates(&conn)
            .unwrap()
            .into_iter()
            .filter(|t| t.active)
            .map(|t| t.version)
            .collect();
        assert_eq!(active, vec!["v2.0".to_string()]);
        assert_eq!(get_active_template(&conn).unwrap().unwrap().version, "v2.0");
    }

    #[test]
    fn set_active_unknown_version_fails() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            set_active_template(&conn, "v7.0"),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
