//! Staged query execution.
//!
//! Stages run cheapest first. Set and sorted-set stages work on document keys
//! only; documents are loaded lazily the first time a stage needs them.

use crate::index::document::IndexDocument;
use crate::index::periods::AvailabilityPeriodIndex;
use crate::index::{geo, keys, SecondaryIndexManager};
use crate::metrics::SEARCH_STAGE_CANDIDATES;
use crate::search::criteria::SearchCriteria;
use crate::search::error::SearchResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strum::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Discrete,
    Dates,
    Ranges,
    Amenities,
    DynamicFields,
    Geo,
    Text,
}

/// Candidates left after a stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageCount {
    pub stage: Stage,
    pub candidates: usize,
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Surviving documents in key order
    pub documents: Vec<IndexDocument>,
    pub stage_counts: Vec<StageCount>,
}

impl PlanOutcome {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

struct Candidates {
    keys: BTreeSet<String>,
    documents: Option<BTreeMap<String, IndexDocument>>,
}

impl Candidates {
    fn len(&self) -> usize {
        self.keys.len()
    }

    fn retain_keys(&mut self, allowed: &BTreeSet<String>) {
        self.keys.retain(|key| allowed.contains(key));
        if let Some(documents) = &mut self.documents {
            documents.retain(|key, _| allowed.contains(key));
        }
    }

    async fn load(&mut self, index: &SecondaryIndexManager) -> SearchResult<&mut BTreeMap<String, IndexDocument>> {
        if self.documents.is_none() {
            let keys: Vec<String> = self.keys.iter().cloned().collect();
            let loaded: BTreeMap<String, IndexDocument> = index
                .get_many(&keys)
                .await?
                .into_iter()
                .map(|doc| (doc.key.clone(), doc))
                .collect();
            // Deleted between stages
            self.keys.retain(|key| loaded.contains_key(key));
            self.documents = Some(loaded);
        }
        Ok(self.documents.get_or_insert_with(BTreeMap::new))
    }

    async fn retain_documents(
        &mut self,
        index: &SecondaryIndexManager,
        mut keep: impl FnMut(&IndexDocument) -> bool,
    ) -> SearchResult<()> {
        let documents = self.load(index).await?;
        documents.retain(|_, doc| keep(doc));
        let surviving: BTreeSet<String> = documents.keys().cloned().collect();
        self.keys = surviving;
        Ok(())
    }
}

/// Runs the staged filter pipeline for one set of criteria
#[derive(Clone)]
pub struct QueryPlanner {
    index: Arc<SecondaryIndexManager>,
}

impl QueryPlanner {
    pub fn new(index: Arc<SecondaryIndexManager>) -> Self {
        Self { index }
    }

    pub async fn execute(&self, criteria: &SearchCriteria) -> SearchResult<PlanOutcome> {
        let store = self.index.store();
        let mut stage_counts = Vec::with_capacity(7);
        let mut record = |stage: Stage, candidates: usize| {
            SEARCH_STAGE_CANDIDATES
                .with_label_values(&[stage.as_ref()])
                .observe(candidates as f64);
            stage_counts.push(StageCount { stage, candidates });
        };

        // 1. Discrete membership
        let mut sets = vec![keys::ALL.to_string(), keys::APPROVED.to_string()];
        if let Some(city) = &criteria.city_key {
            sets.push(keys::city(city));
        }
        if let Some(id) = &criteria.unit_type_id {
            sets.push(keys::unit_type(id));
        }
        if let Some(id) = &criteria.property_type_id {
            sets.push(keys::property_type(id));
        }
        let mut candidates = Candidates {
            keys: store.intersect(&sets).await?,
            documents: None,
        };
        record(Stage::Discrete, candidates.len());

        // 2. Date availability
        if let Some(dates) = criteria.dates {
            if !candidates.keys.is_empty() {
                candidates
                    .retain_documents(&self.index, |doc| {
                        AvailabilityPeriodIndex::new(&doc.periods).is_available(
                            dates.check_in,
                            dates.check_out,
                            criteria.exclude_booking_id,
                        )
                    })
                    .await?;
            }
        }
        record(Stage::Dates, candidates.len());

        // 3. Continuous ranges
        let mut ranges: Vec<(&str, f64, f64)> = Vec::new();
        if let Some(price) = criteria.price {
            // Overlap of [price_min, price_max] with the requested band
            if let Some(max) = price.max {
                ranges.push((keys::PRICE_MIN, f64::NEG_INFINITY, max));
            }
            if let Some(min) = price.min {
                ranges.push((keys::PRICE_MAX, min, f64::INFINITY));
            }
        }
        if let Some(stars) = criteria.min_star_rating {
            ranges.push((keys::STAR_RATING, f64::from(stars), f64::INFINITY));
        }
        if let Some(rating) = criteria.min_average_rating {
            ranges.push((keys::AVERAGE_RATING, rating, f64::INFINITY));
        }
        if let Some(adults) = criteria.adults {
            ranges.push((keys::MAX_ADULTS, f64::from(adults), f64::INFINITY));
        }
        if let Some(children) = criteria.children {
            ranges.push((keys::MAX_CHILDREN, f64::from(children), f64::INFINITY));
        }
        if let Some(guests) = criteria.guests {
            ranges.push((keys::MAX_GUESTS, f64::from(guests), f64::INFINITY));
        }
        for (zset, min, max) in ranges {
            if candidates.keys.is_empty() {
                break;
            }
            let allowed = store.range_by_score(zset, min, max).await?;
            candidates.retain_keys(&allowed);
        }
        record(Stage::Ranges, candidates.len());

        // 4. Amenities and services (AND)
        let required: Vec<String> = criteria
            .amenity_ids
            .iter()
            .map(keys::amenity)
            .chain(criteria.service_ids.iter().map(keys::service))
            .collect();
        if !required.is_empty() && !candidates.keys.is_empty() {
            let allowed = store.intersect(&required).await?;
            candidates.retain_keys(&allowed);
        }
        record(Stage::Amenities, candidates.len());

        // 5. Dynamic fields
        if !criteria.dynamic_filters.is_empty() && !candidates.keys.is_empty() {
            let registry: Vec<String> = criteria.dynamic_filters.keys().map(|name| keys::field(name)).collect();
            let allowed = store.intersect(&registry).await?;
            candidates.retain_keys(&allowed);
            candidates
                .retain_documents(&self.index, |doc| {
                    criteria.dynamic_filters.iter().all(|(name, filter)| {
                        doc.dynamic_fields
                            .get(name)
                            .filter(|field| field.is_searchable)
                            .map_or(false, |field| filter.matches(&field.value, field.field_type))
                    })
                })
                .await?;
        }
        record(Stage::DynamicFields, candidates.len());

        // 6. Geo radius
        if let Some(filter) = criteria.geo {
            if let (Some(radius), false) = (filter.radius_km, candidates.keys.is_empty()) {
                if let Some(cells) = geo::cells_within(
                    filter.latitude,
                    filter.longitude,
                    radius,
                    self.index.geo_cell_degrees(),
                ) {
                    let names: Vec<String> = cells
                        .into_iter()
                        .map(|(lat, lon)| keys::geo_cell(lat, lon))
                        .collect();
                    let allowed = store.union(&names).await?;
                    candidates.retain_keys(&allowed);
                }
                candidates
                    .retain_documents(&self.index, |doc| {
                        geo::haversine_km(
                            filter.latitude,
                            filter.longitude,
                            doc.location.latitude,
                            doc.location.longitude,
                        ) <= radius
                    })
                    .await?;
            }
        }
        record(Stage::Geo, candidates.len());

        // 7. Free text: every token must hit a keyword exactly or as a substring
        if !criteria.text_tokens.is_empty() && !candidates.keys.is_empty() {
            let mut exact: Vec<BTreeSet<String>> = Vec::with_capacity(criteria.text_tokens.len());
            for token in &criteria.text_tokens {
                exact.push(store.members(&keys::keyword(token)).await?);
            }
            let tokens = &criteria.text_tokens;
            candidates
                .retain_documents(&self.index, |doc| {
                    tokens.iter().zip(&exact).all(|(token, hits)| {
                        hits.contains(&doc.key)
                            || doc.keywords.iter().any(|keyword| keyword.contains(token.as_str()))
                    })
                })
                .await?;
        }
        record(Stage::Text, candidates.len());

        let documents = match candidates.documents {
            Some(documents) => documents.into_values().collect(),
            None => {
                let keys: Vec<String> = candidates.keys.into_iter().collect();
                self.index.get_many(&keys).await?
            }
        };

        Ok(PlanOutcome {
            documents,
            stage_counts,
        })
    }
}
