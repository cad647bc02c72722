use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::config::InsightSettings;
use crate::db::{get_feedback_since, get_recent_processed, DatabaseError};
use crate::models::enums::QualityBand;
use crate::models::FeedbackRecord;
use crate::pipeline::generation::GENERAL_DEPARTMENT;

// ═══════════════════════════════════════════
// Feedback statistics
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingTrend {
    InsufficientData,
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityDistribution {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

impl QualityDistribution {
    fn add(&mut self, band: QualityBand) {
        match band {
            QualityBand::Excellent => self.excellent += 1,
            QualityBand::Good => self.good += 1,
            QualityBand::Fair => self.fair += 1,
            QualityBand::Poor => self.poor += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackStats {
    pub total_feedback: usize,
    pub avg_rating: f64,
    pub trend: RatingTrend,
    pub quality_distribution: QualityDistribution,
    pub period_days: i64,
    pub interpretation: String,
}

/// Compare the later half of a chronological rating series with the earlier
/// half. An odd middle rating belongs to the later half.
pub fn half_split_trend(chronological: &[u8]) -> RatingTrend {
    let mid = chronological.len() / 2;
    if mid == 0 {
        return RatingTrend::InsufficientData;
    }
    let avg = |rs: &[u8]| rs.iter().map(|r| *r as f64).sum::<f64>() / rs.len() as f64;
    let earlier = avg(&chronological[..mid]);
    let later = avg(&chronological[mid..]);

    if (later - earlier).abs() < f64::EPSILON {
        RatingTrend::Stable
    } else if later > earlier {
        RatingTrend::Improving
    } else {
        RatingTrend::Declining
    }
}

/// Ratings over the last `days` days.
pub fn feedback_stats(conn: &Connection, days: i64) -> Result<FeedbackStats, DatabaseError> {
    let since = chrono::Local::now().naive_local() - chrono::Duration::days(days.max(0));
    let records = get_feedback_since(conn, &since)?;
    Ok(summarize_feedback(&records, days))
}

fn summarize_feedback(records: &[FeedbackRecord], days: i64) -> FeedbackStats {
    let ratings: Vec<u8> = records.iter().map(|r| r.rating).collect();
    let total = ratings.len();
    let avg_rating = if total == 0 {
        0.0
    } else {
        let mean = ratings.iter().map(|r| *r as f64).sum::<f64>() / total as f64;
        (mean * 100.0).round() / 100.0
    };

    let mut quality_distribution = QualityDistribution::default();
    for record in records {
        quality_distribution.add(record.quality);
    }

    let trend = half_split_trend(&ratings);
    FeedbackStats {
        total_feedback: total,
        avg_rating,
        trend,
        quality_distribution,
        period_days: days,
        interpretation: interpret(total, avg_rating, trend),
    }
}

fn interpret(total: usize, avg_rating: f64, trend: RatingTrend) -> String {
    if total == 0 {
        return "No feedback yet. Submit ratings to start the learning loop.".into();
    }
    let quality = match avg_rating {
        r if r >= 4.5 => "excellent",
        r if r >= 3.5 => "good",
        r if r >= 2.5 => "fair",
        _ => "in need of improvement",
    };
    let direction = match trend {
        RatingTrend::Improving => " Ratings are improving.",
        RatingTrend::Stable => " Ratings are stable.",
        RatingTrend::Declining => " Ratings are declining.",
        RatingTrend::InsufficientData => "",
    };
    format!("Summary quality is {quality} (average rating {avg_rating:.2}/5).{direction}")
}

// ═══════════════════════════════════════════
// Department patterns
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentStats {
    pub count: usize,
    pub avg_cost: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub department: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DepartmentInsights {
    InsufficientData { processed: usize, required: usize },
    Analyzed {
        sample_size: usize,
        departments: BTreeMap<String, DepartmentStats>,
        recommendations: Vec<Recommendation>,
    },
}

/// Per-department cost and duration over recently processed records, with a
/// cost recommendation for each department above the alert threshold.
pub fn learn_from_patterns(conn: &Connection, settings: &InsightSettings) -> Result<DepartmentInsights, DatabaseError> {
    let records = get_recent_processed(conn, settings.lookback)?;
    if records.len() < settings.min_sample {
        return Ok(DepartmentInsights::InsufficientData {
            processed: records.len(),
            required: settings.min_sample,
        });
    }

    let mut totals: BTreeMap<String, (usize, f64, f64)> = BTreeMap::new();
    for record in &records {
        let department = record.department.clone().unwrap_or_else(|| GENERAL_DEPARTMENT.to_string());
        let entry = totals.entry(department).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += record.cost_usd;
        entry.2 += record.duration_ms as f64;
    }

    let departments: BTreeMap<String, DepartmentStats> = totals
        .into_iter()
        .map(|(name, (count, cost, duration))| {
            let stats = DepartmentStats {
                count,
                avg_cost: cost / count as f64,
                avg_duration_ms: duration / count as f64,
            };
            (name, stats)
        })
        .collect();

    let recommendations = departments
        .iter()
        .filter(|(_, stats)| stats.avg_cost > settings.cost_alert_usd)
        .map(|(name, stats)| Recommendation {
            department: name.clone(),
            message: format!(
                "{name} has a high average cost (${:.4}). Consider a shorter prompt.",
                stats.avg_cost
            ),
        })
        .collect::<Vec<_>>();

    tracing::info!(
        sample_size = records.len(),
        departments = departments.len(),
        recommendations = recommendations.len(),
        "Department patterns analyzed"
    );

    Ok(DepartmentInsights::Analyzed {
        sample_size: records.len(),
        departments,
        recommendations,
    })
}
