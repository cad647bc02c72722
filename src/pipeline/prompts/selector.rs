use std::cmp::Ordering;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::Connection;

use super::PromptError;
use crate::config::SelectionSettings;
use crate::db::list_templates;
use crate::models::enums::SelectionPolicy;
use crate::models::{PromptPerformance, PromptTemplate};

/// Higher average rating first, then lower average cost, then most recently
/// used. Unrated templates sort after rated ones, newest first.
fn ranking_order(a: &PromptTemplate, b: &PromptTemplate) -> Ordering {
    b.is_rated()
        .cmp(&a.is_rated())
        .then_with(|| b.avg_rating.total_cmp(&a.avg_rating))
        .then_with(|| a.avg_cost.total_cmp(&b.avg_cost))
        .then_with(|| b.last_used.cmp(&a.last_used))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.version_key().cmp(&a.version_key()))
}

/// Best rated template with at least `min_ratings` ratings. With none rated,
/// the most recently created template.
pub fn best_performing(templates: &[PromptTemplate], min_ratings: i64) -> Option<&PromptTemplate> {
    let min_ratings = min_ratings.max(1);
    let rated = templates
        .iter()
        .filter(|t| t.usage_count >= min_ratings)
        .min_by(|a, b| ranking_order(a, b));
    rated.or_else(|| {
        templates
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.version_key().cmp(&b.version_key())))
    })
}

/// Uniform choice among templates flagged for A/B testing.
pub fn ab_test<'a>(templates: &'a [PromptTemplate], rng: &mut StdRng) -> Option<&'a PromptTemplate> {
    let eligible: Vec<&PromptTemplate> = templates.iter().filter(|t| t.ab_eligible).collect();
    eligible.choose(rng).copied()
}

/// Highest version number.
pub fn latest(templates: &[PromptTemplate]) -> Option<&PromptTemplate> {
    templates.iter().max_by(|a, b| a.version_key().cmp(&b.version_key()))
}

/// Every template in ranking order, rank starting at 1.
pub fn rank_templates(mut templates: Vec<PromptTemplate>) -> Vec<PromptPerformance> {
    templates.sort_by(ranking_order);
    templates
        .into_iter()
        .enumerate()
        .map(|(i, t)| PromptPerformance {
            rank: i + 1,
            version: t.version,
            description: t.description,
            avg_rating: t.avg_rating,
            avg_cost: t.avg_cost,
            usage_count: t.usage_count,
            active: t.active,
            ab_eligible: t.ab_eligible,
            last_used: t.last_used,
        })
        .collect()
}

/// Chooses a template per request. Reads the store on every call and never
/// writes to it; the only state held is the A/B random source.
pub struct PromptSelector {
    min_ratings: i64,
    rng: Mutex<StdRng>,
}

impl PromptSelector {
    pub fn new(settings: &SelectionSettings) -> Self {
        let rng = match settings.ab_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            min_ratings: settings.min_ratings,
            rng: Mutex::new(rng),
        }
    }

    pub fn select(&self, conn: &Connection, policy: SelectionPolicy) -> Result<PromptTemplate, PromptError> {
        self.select_excluding(conn, policy, &[])
    }

    /// Select while skipping `excluded` versions, used when a template turned
    /// out to be structurally broken.
    pub fn select_excluding(
        &self,
        conn: &Connection,
        policy: SelectionPolicy,
        excluded: &[String],
    ) -> Result<PromptTemplate, PromptError> {
        let templates: Vec<PromptTemplate> = list_templates(conn)?
            .into_iter()
            .filter(|t| !excluded.contains(&t.version))
            .collect();
        self.choose(&templates, policy)
            .cloned()
            .ok_or(PromptError::NoCandidates { policy })
    }

    fn choose<'a>(&self, templates: &'a [PromptTemplate], policy: SelectionPolicy) -> Option<&'a PromptTemplate> {
        match policy {
            SelectionPolicy::BestPerforming => best_performing(templates, self.min_ratings),
            SelectionPolicy::Latest => latest(templates),
            SelectionPolicy::AbTest => {
                let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                ab_test(templates, &mut rng).or_else(|| {
                    tracing::debug!("No template eligible for A/B testing, using best performing");
                    best_performing(templates, self.min_ratings)
                })
            }
        }
    }
}
