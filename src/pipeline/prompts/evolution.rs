use rusqlite::Connection;
use serde::Serialize;

use super::selector::best_performing;
use super::PromptError;
use crate::config::EvolutionThresholds;
use crate::db::{list_templates, set_active_template};

/// Outcome of one evolution pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EvolutionReport {
    /// Fewer than two templates have ratings.
    ContinueTesting { rated_templates: usize },
    /// `version` now holds the single active slot.
    Promoted {
        version: String,
        avg_rating: f64,
        usage_count: i64,
        already_active: bool,
    },
    /// Rated templates perform too similarly to call a winner.
    ContinueAbTesting { rating_spread: f64 },
    /// A leader exists but has not met the promotion thresholds yet.
    Analyze {
        best_version: String,
        best_rating: f64,
        rating_spread: f64,
    },
}

/// Promote the best rated template when it clears both thresholds.
pub fn evolve(conn: &Connection, thresholds: &EvolutionThresholds) -> Result<EvolutionReport, PromptError> {
    let templates = list_templates(conn)?;
    let rated: Vec<_> = templates.iter().filter(|t| t.is_rated()).cloned().collect();
    if rated.len() < 2 {
        return Ok(EvolutionReport::ContinueTesting {
            rated_templates: rated.len(),
        });
    }

    let Some(best) = best_performing(&rated, 1) else {
        return Ok(EvolutionReport::ContinueTesting {
            rated_templates: rated.len(),
        });
    };

    if best.avg_rating >= thresholds.promote_min_rating && best.usage_count >= thresholds.promote_min_usage {
        let already_active = best.active;
        if !already_active {
            set_active_template(conn, &best.version)?;
        }
        tracing::info!(
            version = %best.version,
            avg_rating = best.avg_rating,
            usage_count = best.usage_count,
            already_active,
            "Prompt template promoted"
        );
        return Ok(EvolutionReport::Promoted {
            version: best.version.clone(),
            avg_rating: best.avg_rating,
            usage_count: best.usage_count,
            already_active,
        });
    }

    let max = rated.iter().map(|t| t.avg_rating).fold(f64::MIN, f64::max);
    let min = rated.iter().map(|t| t.avg_rating).fold(f64::MAX, f64::min);
    let rating_spread = max - min;

    if rating_spread < thresholds.min_rating_spread {
        return Ok(EvolutionReport::ContinueAbTesting { rating_spread });
    }

    Ok(EvolutionReport::Analyze {
        best_version: best.version.clone(),
        best_rating: best.avg_rating,
        rating_spread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_active_template, get_template, open_memory_database, update_template_stats};
    use crate::models::TemplateStatistics;
    use crate::pipeline::prompts::seed_catalog;

    fn thresholds() -> EvolutionThresholds {
        EvolutionThresholds {
            promote_min_rating: 4.0,
            promote_min_usage: 10,
            min_rating_spread: 0.5,
        }
    }

    fn rate(conn: &Connection, version: &str, avg_rating: f64, usage_count: i64) {
        let current = get_template(conn, version).unwrap().unwrap();
        update_template_stats(
            conn,
            &TemplateStatistics {
                version: version.into(),
                avg_rating,
                avg_cost: 0.01,
                usage_count,
            },
            current.revision,
        )
        .unwrap();
    }

    fn store() -> Connection {
        let conn = open_memory_database().unwrap();
        seed_catalog(&conn).unwrap();
        conn
    }

    #[test]
    fn needs_two_rated_templates() {
        let conn = store();
        rate(&conn, "v2.0", 4.9, 50);
        assert_eq!(
            evolve(&conn, &thresholds()).unwrap(),
            EvolutionReport::ContinueTesting { rated_templates: 1 }
        );
    }

    #[test]
    fn promotes_strong_leader() {
        let conn = store();
        rate(&conn, "v1.0", 3.1, 12);
        rate(&conn, "v3.0", 4.4, 10);

        let report = evolve(&conn, &thresholds()).unwrap();
        assert!(matches!(report, EvolutionReport::Promoted { ref version, already_active: false, .. } if version == "v3.0"));
        assert_eq!(get_active_template(&conn).unwrap().unwrap().version, "v3.0");
    }

    #[test]
    fn similar_templates_keep_testing() {
        let conn = store();
        rate(&conn, "v1.0", 3.6, 4);
        rate(&conn, "v2.0", 3.9, 4);
        assert!(matches!(
            evolve(&conn, &thresholds()).unwrap(),
            EvolutionReport::ContinueAbTesting { .. }
        ));
        assert_eq!(get_active_template(&conn).unwrap().unwrap().version, "v1.0");
    }

    #[test]
    fn leader_below_usage_threshold_is_analyzed() {
        let conn = store();
        rate(&conn, "v1.0", 2.5, 4);
        rate(&conn, "v2.0", 4.7, 6);
        match evolve(&conn, &thresholds()).unwrap() {
            EvolutionReport::Analyze { best_version, .. } => assert_eq!(best_version, "v2.0"),
            other => panic!("unexpected report: {other:?}"),
        }
    }
}
