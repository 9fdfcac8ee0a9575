//! Progressive relaxation of search criteria.
//!
//! When the exact query finds too few units, constraints are loosened one
//! category at a time in a fixed order. Every visited level is reported in the
//! trace; only levels whose category was actually present in the criteria
//! re-run the planner and appear in `relaxed_filters`.

use crate::index::document::IndexDocument;
use crate::search::criteria::SearchCriteria;
use crate::search::error::SearchResult;
use crate::search::planner::{PlanOutcome, QueryPlanner, StageCount};
use crate::search::request::MAX_RADIUS_KM;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tracing::debug;

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelaxationLevel {
    #[default]
    Exact,
    RelaxDates,
    RelaxPrice,
    RelaxRating,
    RelaxAmenities,
    RelaxRadius,
    RelaxUnitType,
    Exhausted,
}

impl RelaxationLevel {
    pub const ORDER: [RelaxationLevel; 8] = [
        RelaxationLevel::Exact,
        RelaxationLevel::RelaxDates,
        RelaxationLevel::RelaxPrice,
        RelaxationLevel::RelaxRating,
        RelaxationLevel::RelaxAmenities,
        RelaxationLevel::RelaxRadius,
        RelaxationLevel::RelaxUnitType,
        RelaxationLevel::Exhausted,
    ];

    pub fn next(self) -> Option<RelaxationLevel> {
        let position = Self::ORDER.iter().position(|level| *level == self)?;
        Self::ORDER.get(position + 1).copied()
    }

    /// Name reported in `relaxed_filters`
    pub fn filter_name(self) -> Option<&'static str> {
        match self {
            RelaxationLevel::RelaxDates => Some("dates"),
            RelaxationLevel::RelaxPrice => Some("price"),
            RelaxationLevel::RelaxRating => Some("rating"),
            RelaxationLevel::RelaxAmenities => Some("amenities"),
            RelaxationLevel::RelaxRadius => Some("radius"),
            RelaxationLevel::RelaxUnitType => Some("unit_type"),
            RelaxationLevel::Exact | RelaxationLevel::Exhausted => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelaxationOutcome {
    pub documents: Vec<IndexDocument>,
    pub level: RelaxationLevel,
    pub relaxed_filters: Vec<String>,
    pub trace: Vec<RelaxationLevel>,
    pub actual_criteria: SearchCriteria,
    pub stage_counts: Vec<StageCount>,
    pub user_message: Option<String>,
    pub suggested_actions: Vec<String>,
}

/// Walks the relaxation levels until enough units are found
#[derive(Clone)]
pub struct RelaxationEngine {
    planner: QueryPlanner,
    price_tolerance: f64,
    radius_multiplier: f64,
}

impl RelaxationEngine {
    pub fn new(planner: QueryPlanner, price_tolerance: f64, radius_multiplier: f64) -> Self {
        Self {
            planner,
            price_tolerance,
            radius_multiplier,
        }
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    /// Loosen the category of `level` in place; `false` when it was absent
    pub fn relax(&self, level: RelaxationLevel, criteria: &mut SearchCriteria) -> bool {
        match level {
            RelaxationLevel::RelaxDates => criteria.dates.take().is_some(),
            RelaxationLevel::RelaxPrice => match criteria.price {
                Some(band) => {
                    criteria.price = Some(band.widened(self.price_tolerance));
                    true
                }
                None => false,
            },
            RelaxationLevel::RelaxRating => {
                let present = criteria.has_rating();
                criteria.min_star_rating = None;
                criteria.min_average_rating = None;
                present
            }
            RelaxationLevel::RelaxAmenities => {
                let present = criteria.has_amenities();
                criteria.amenity_ids.clear();
                criteria.service_ids.clear();
                present
            }
            RelaxationLevel::RelaxRadius => match criteria.geo.as_mut() {
                Some(geo) => match geo.radius_km {
                    Some(radius) => {
                        geo.radius_km = Some((radius * self.radius_multiplier).min(MAX_RADIUS_KM));
                        true
                    }
                    None => false,
                },
                None => false,
            },
            RelaxationLevel::RelaxUnitType => criteria.unit_type_id.take().is_some(),
            RelaxationLevel::Exact | RelaxationLevel::Exhausted => false,
        }
    }

    /// Run the planner, relaxing until at least `threshold` units are found
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        threshold: usize,
        enabled: bool,
    ) -> SearchResult<RelaxationOutcome> {
        let mut current = criteria.clone();
        let mut level = RelaxationLevel::Exact;
        let mut trace = vec![level];
        let mut relaxed_filters: Vec<String> = Vec::new();
        let mut outcome: PlanOutcome = self.planner.execute(&current).await?;

        while enabled && outcome.len() < threshold {
            let Some(next) = level.next() else { break };
            level = next;
            trace.push(level);
            if level == RelaxationLevel::Exhausted {
                break;
            }
            if !self.relax(level, &mut current) {
                continue;
            }
            if let Some(name) = level.filter_name() {
                relaxed_filters.push(name.to_string());
            }
            outcome = self.planner.execute(&current).await?;
            debug!(
                level = %level,
                candidates = outcome.len(),
                threshold,
                "Relaxed search criteria"
            );
        }

        let (user_message, suggested_actions) = explain(level, &relaxed_filters, outcome.len());

        Ok(RelaxationOutcome {
            documents: outcome.documents,
            level,
            relaxed_filters,
            trace,
            actual_criteria: current,
            stage_counts: outcome.stage_counts,
            user_message,
            suggested_actions,
        })
    }
}

fn explain(level: RelaxationLevel, relaxed: &[String], found: usize) -> (Option<String>, Vec<String>) {
    let suggestions: Vec<String> = relaxed
        .iter()
        .map(|filter| {
            match filter.as_str() {
                "dates" => "Try different dates",
                "price" => "Widen your price range",
                "rating" => "Lower the minimum rating",
                "amenities" => "Require fewer amenities or services",
                "radius" => "Search a larger area",
                "unit_type" => "Consider other unit types",
                _ => "Adjust your filters",
            }
            .to_string()
        })
        .collect();

    match level {
        RelaxationLevel::Exact => (None, Vec::new()),
        RelaxationLevel::Exhausted if found == 0 => {
            let mut actions = suggestions;
            actions.push("Search in another city".to_string());
            (
                Some("No units match your search, even after relaxing every filter".to_string()),
                actions,
            )
        }
        RelaxationLevel::Exhausted if relaxed.is_empty() => (
            Some(format!("Only {} units match your search", found)),
            vec!["Remove some filters".to_string()],
        ),
        RelaxationLevel::Exhausted => (
            Some(format!(
                "Only {} units found after relaxing: {}",
                found,
                relaxed.join(", ")
            )),
            suggestions,
        ),
        _ => (
            Some(format!(
                "No exact matches; showing results with relaxed filters: {}",
                relaxed.join(", ")
            )),
            suggestions,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SecondaryIndexManager;
    use crate::search::criteria::{GeoFilter, PriceBand, StayDates};
    use crate::state::create_in_memory_store;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use uuid::Uuid;

    fn engine() -> RelaxationEngine {
        let index = Arc::new(SecondaryIndexManager::new(create_in_memory_store(), 0.5));
        RelaxationEngine::new(QueryPlanner::new(index), 0.5, 2.0)
    }

    #[test]
    fn test_order_is_linear() {
        let mut level = RelaxationLevel::Exact;
        let mut visited = vec![level];
        while let Some(next) = level.next() {
            visited.push(next);
            level = next;
        }
        assert_eq!(visited, RelaxationLevel::ORDER.to_vec());
        assert_eq!(RelaxationLevel::RelaxUnitType.to_string(), "relax_unit_type");
    }

    #[test]
    fn test_relax_loosens_one_category() {
        let engine = engine();
        let mut criteria = SearchCriteria {
            dates: Some(StayDates {
                check_in: NaiveDate::from_ymd_opt(2025, 1, 12).unwrap(),
                check_out: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            }),
            price: Some(PriceBand { min: Some(50.0), max: Some(80.0) }),
            geo: Some(GeoFilter { latitude: 12.8, longitude: 45.0, radius_km: Some(10.0) }),
            unit_type_id: Some(Uuid::new_v4()),
            ..Default::default()
        };

        assert!(engine.relax(RelaxationLevel::RelaxDates, &mut criteria));
        assert!(criteria.dates.is_none());
        assert!(criteria.price.is_some());

        assert!(engine.relax(RelaxationLevel::RelaxPrice, &mut criteria));
        assert_eq!(criteria.price, Some(PriceBand { min: Some(25.0), max: Some(120.0) }));

        assert!(!engine.relax(RelaxationLevel::RelaxRating, &mut criteria));
        assert!(!engine.relax(RelaxationLevel::RelaxAmenities, &mut criteria));

        assert!(engine.relax(RelaxationLevel::RelaxRadius, &mut criteria));
        assert_eq!(criteria.radius_km(), Some(20.0));

        assert!(engine.relax(RelaxationLevel::RelaxUnitType, &mut criteria));
        assert!(criteria.unit_type_id.is_none());
    }

    #[tokio::test]
    async fn test_empty_index_exhausts_without_relaxing_absent_filters() {
        let engine = engine();
        let criteria = SearchCriteria {
            min_star_rating: Some(4),
            ..Default::default()
        };

        let outcome = engine.search(&criteria, 1, true).await.unwrap();
        assert_eq!(outcome.level, RelaxationLevel::Exhausted);
        assert_eq!(outcome.relaxed_filters, vec!["rating".to_string()]);
        assert_eq!(outcome.trace, RelaxationLevel::ORDER.to_vec());
        assert!(outcome.user_message.is_some());
        assert!(!outcome.suggested_actions.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_relaxation_stays_exact() {
        let engine = engine();
        let criteria = SearchCriteria {
            min_star_rating: Some(4),
            ..Default::default()
        };

        let outcome = engine.search(&criteria, 1, false).await.unwrap();
        assert_eq!(outcome.level, RelaxationLevel::Exact);
        assert_eq!(outcome.trace, vec![RelaxationLevel::Exact]);
        assert!(outcome.relaxed_filters.is_empty());
        assert_eq!(outcome.actual_criteria, criteria);
    }
}
