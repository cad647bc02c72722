use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::TrendWindows;
use crate::db::{
    get_feedback_for_patient, get_feedback_since, get_processed_since, get_recent_processed, get_recent_snapshots,
    insert_snapshot, DatabaseError,
};
use crate::models::{version_key, PatientRecord, PerformanceSnapshot};

/// Snapshots included as data points in a trend report.
const TREND_DATA_POINTS: usize = 30;

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub accuracy: Option<f64>,
    pub cost: f64,
    pub duration_ms: f64,
}

/// Recent window against the baseline window before it. Positive numbers
/// are improvements: faster, cheaper, better rated.
#[derive(Debug, Clone, Serialize)]
pub struct ImprovementTrend {
    pub recent_count: usize,
    pub baseline_count: usize,
    pub speed_improvement_pct: f64,
    pub cost_reduction_pct: f64,
    pub accuracy_improvement_pct: f64,
    pub data_points: Vec<TrendPoint>,
}

/// Split newest-first records into (recent, baseline).
///
/// With enough history each window gets its configured size. With less, the
/// available records are split in proportion to the window sizes, keeping at
/// least one record on each side; a single record has no baseline.
pub fn split_windows<'a>(
    newest_first: &'a [PatientRecord],
    windows: &TrendWindows,
) -> (&'a [PatientRecord], &'a [PatientRecord]) {
    let n = newest_first.len();
    let recent = windows.recent.max(1);
    let baseline = windows.baseline.max(1);

    if n <= 1 {
        return (newest_first, &[]);
    }
    if n >= recent + baseline {
        return (&newest_first[..recent], &newest_first[recent..recent + baseline]);
    }
    let recent_len = (n * recent / (recent + baseline)).clamp(1, n - 1);
    newest_first.split_at(recent_len)
}

/// Percentage change from `baseline` to `recent`, signed so that positive is
/// better. Zero when there is no baseline to compare against.
pub fn improvement_pct(baseline: Option<f64>, recent: Option<f64>, lower_is_better: bool) -> f64 {
    match (baseline, recent) {
        (Some(base), Some(now)) if base > 0.0 => {
            let change = if lower_is_better { base - now } else { now - base };
            round2(change / base * 100.0)
        }
        _ => 0.0,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn window_accuracy(conn: &Connection, records: &[PatientRecord]) -> Result<Option<f64>, DatabaseError> {
    let mut ratings = Vec::new();
    for record in records {
        ratings.extend(get_feedback_for_patient(conn, &record.id)?.iter().map(|f| f.rating as f64));
    }
    Ok(mean(ratings.into_iter()))
}

/// Speed, cost and accuracy trend over the most recent processed records.
pub fn improvement_trend(conn: &Connection, windows: &TrendWindows) -> Result<ImprovementTrend, DatabaseError> {
    let records = get_recent_processed(conn, windows.recent.max(1) + windows.baseline.max(1))?;
    let (recent, baseline) = split_windows(&records, windows);

    let duration = |rs: &[PatientRecord]| mean(rs.iter().map(|r| r.duration_ms as f64));
    let cost = |rs: &[PatientRecord]| mean(rs.iter().map(|r| r.cost_usd));

    let mut data_points: Vec<TrendPoint> = get_recent_snapshots(conn, TREND_DATA_POINTS)?
        .into_iter()
        .map(|s| TrendPoint {
            date: s.date,
            accuracy: s.avg_accuracy,
            cost: s.avg_cost,
            duration_ms: s.avg_duration_ms,
        })
        .collect();
    data_points.reverse();

    Ok(ImprovementTrend {
        recent_count: recent.len(),
        baseline_count: baseline.len(),
        speed_improvement_pct: improvement_pct(duration(baseline), duration(recent), true),
        cost_reduction_pct: improvement_pct(cost(baseline), cost(recent), true),
        accuracy_improvement_pct: improvement_pct(
            window_accuracy(conn, baseline)?,
            window_accuracy(conn, recent)?,
            false,
        ),
        data_points,
    })
}

/// Roll up everything processed since midnight into a stored snapshot.
pub fn record_snapshot(conn: &Connection) -> Result<PerformanceSnapshot, DatabaseError> {
    let now = chrono::Local::now().naive_local();
    let today = now.date();
    let midnight = today.and_hms_opt(0, 0, 0).unwrap_or(now);

    let records = get_processed_since(conn, &midnight)?;
    let ratings = get_feedback_since(conn, &midnight)?;

    let snapshot = PerformanceSnapshot {
        id: Uuid::new_v4(),
        date: today,
        total_processed: records.len() as i64,
        avg_accuracy: mean(ratings.iter().map(|f| f.rating as f64)),
        avg_cost: mean(records.iter().map(|r| r.cost_usd)).unwrap_or(0.0),
        avg_duration_ms: mean(records.iter().map(|r| r.duration_ms as f64)).unwrap_or(0.0),
        dominant_prompt_version: dominant_version(&records),
        created_at: now,
    };
    insert_snapshot(conn, &snapshot)?;
    tracing::info!(date = %snapshot.date, total_processed = snapshot.total_processed, "Performance snapshot recorded");
    Ok(snapshot)
}

/// Most used prompt version; ties go to the higher version.
fn dominant_version(records: &[PatientRecord]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for version in records.iter().filter_map(|r| r.prompt_version.as_deref()) {
        *counts.entry(version).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(va, ca), (vb, cb)| ca.cmp(cb).then_with(|| version_key(va).cmp(&version_key(vb))))
        .map(|(v, _)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_patient, open_memory_database, record_summary};
    use crate::models::enums::DocumentSource;
    use crate::models::{PatientTokens, SummaryOutcome};
    use crate::pipeline::feedback::{record_feedback, FeedbackInput};
    use crate::pipeline::prompts::seed_catalog;

    const WINDOWS: TrendWindows = TrendWindows { recent: 2, baseline: 2 };

    fn processed(conn: &Connection, version: &str, cost: f64, duration_ms: i64) -> Uuid {
        let record = PatientRecord::pending(PatientTokens::default(), DocumentSource::Batch, None);
        insert_patient(conn, &record).unwrap();
        record_summary(
            conn,
            &record.id,
            &SummaryOutcome {
                summary: "Summary.".into(),
                prompt_version: version.into(),
                strategy: "vault_function".into(),
                input_tokens: 100,
                output_tokens: 50,
                cost_usd: cost,
                duration_ms,
            },
        )
        .unwrap();
        // processed_at carries sub-second precision; keep insertion order distinct.
        std::thread::sleep(std::time::Duration::from_millis(2));
        record.id
    }

    fn rate(conn: &Connection, id: Uuid, rating: u8) {
        record_feedback(
            conn,
            &FeedbackInput {
                patient_id: id,
                rating,
                corrections: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn empty_history_reports_zero() {
        let conn = open_memory_database().unwrap();
        let trend = improvement_trend(&conn, &WINDOWS).unwrap();
        assert_eq!(trend.recent_count, 0);
        assert_eq!(trend.speed_improvement_pct, 0.0);
        assert_eq!(trend.cost_reduction_pct, 0.0);
    }

    #[test]
    fn single_record_reports_zero() {
        let conn = open_memory_database().unwrap();
        seed_catalog(&conn).unwrap();
        processed(&conn, "v1.0", 0.01, 2000);
        let trend = improvement_trend(&conn, &TrendWindows { recent: 10, baseline: 10 }).unwrap();
        assert_eq!(trend.recent_count, 1);
        assert_eq!(trend.baseline_count, 0);
        assert_eq!(trend.speed_improvement_pct, 0.0);
        assert_eq!(trend.accuracy_improvement_pct, 0.0);
    }

    #[test]
    fn short_history_uses_all_records() {
        let conn = open_memory_database().unwrap();
        seed_catalog(&conn).unwrap();
        processed(&conn, "v1.0", 0.02, 4000);
        processed(&conn, "v1.0", 0.01, 2000);
        processed(&conn, "v1.0", 0.01, 2000);
        let trend = improvement_trend(&conn, &TrendWindows { recent: 10, baseline: 10 }).unwrap();
        assert_eq!(trend.recent_count + trend.baseline_count, 3);
    }

    #[test]
    fn faster_and_cheaper_recent_window() {
        let conn = open_memory_database().unwrap();
        seed_catalog(&conn).unwrap();
        // Baseline (older): 4000 ms, $0.02, rated 3.
        for _ in 0..2 {
            let id = processed(&conn, "v1.0", 0.02, 4000);
            rate(&conn, id, 3);
        }
        // Recent: 3000 ms, $0.01, rated 4.
        for _ in 0..2 {
            let id = processed(&conn, "v2.0", 0.01, 3000);
            rate(&conn, id, 4);
        }

        let trend = improvement_trend(&conn, &WINDOWS).unwrap();
        assert_eq!(trend.recent_count, 2);
        assert_eq!(trend.baseline_count, 2);
        assert!((trend.speed_improvement_pct - 25.0).abs() < 1e-9);
        assert!((trend.cost_reduction_pct - 50.0).abs() < 1e-9);
        assert!((trend.accuracy_improvement_pct - 33.33).abs() < 1e-9);
    }

    #[test]
    fn proportional_split() {
        let records: Vec<PatientRecord> = (0..5)
            .map(|_| PatientRecord::pending(PatientTokens::default(), DocumentSource::Manual, None))
            .collect();
        let (recent, baseline) = split_windows(&records, &TrendWindows { recent: 10, baseline: 10 });
        assert_eq!((recent.len(), baseline.len()), (2, 3));
        let (recent, baseline) = split_windows(&records, &TrendWindows { recent: 1, baseline: 3 });
        assert_eq!((recent.len(), baseline.len()), (1, 3));
    }

    #[test]
    fn improvement_without_baseline_is_zero() {
        assert_eq!(improvement_pct(None, Some(1.0), true), 0.0);
        assert_eq!(improvement_pct(Some(0.0), Some(1.0), true), 0.0);
        assert_eq!(improvement_pct(Some(2.0), Some(3.0), false), 50.0);
    }

    #[test]
    fn snapshot_rolls_up_today() {
        let conn = open_memory_database().unwrap();
        seed_catalog(&conn).unwrap();
        let a = processed(&conn, "v2.0", 0.01, 1000);
        processed(&conn, "v2.0", 0.03, 3000);
        processed(&conn, "v1.0", 0.02, 2000);
        rate(&conn, a, 5);

        let snapshot = record_snapshot(&conn).unwrap();
        assert_eq!(snapshot.total_processed, 3);
        assert!((snapshot.avg_cost - 0.02).abs() < 1e-12);
        assert!((snapshot.avg_duration_ms - 2000.0).abs() < 1e-9);
        assert_eq!(snapshot.avg_accuracy, Some(5.0));
        assert_eq!(snapshot.dominant_prompt_version.as_deref(), Some("v2.0"));

        let trend = improvement_trend(&conn, &WINDOWS).unwrap();
        assert_eq!(trend.data_points.len(), 1);
    }
}
