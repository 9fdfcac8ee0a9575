//! Normalized, relaxable form of a search request

use crate::index::keywords::{normalize_city, tokenize};
use crate::models::FieldType;
use crate::search::error::{SearchError, SearchResult};
use crate::search::request::SearchRequest;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A parsed dynamic-field filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DynamicFilter {
    /// `value`: case-insensitive equality
    Exact { value: String },
    /// `min..max`, either side optional
    Range { min: Option<f64>, max: Option<f64> },
    /// `~text`: case-insensitive substring
    Contains { text: String },
}

impl DynamicFilter {
    pub fn parse(raw: &str) -> SearchResult<Self> {
        let raw = raw.trim();
        if let Some(text) = raw.strip_prefix('~') {
            let text = text.trim();
            if text.is_empty() {
                return Err(SearchError::Validation("'~' filter needs text".to_string()));
            }
            return Ok(DynamicFilter::Contains {
                text: text.to_lowercase(),
            });
        }

        if let Some((min, max)) = raw.split_once("..") {
            let bound = |side: &str| -> SearchResult<Option<f64>> {
                let side = side.trim();
                if side.is_empty() {
                    return Ok(None);
                }
                side.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(Some)
                    .ok_or_else(|| {
                        SearchError::Validation(format!("'{}' is not a number in range filter '{}'", side, raw))
                    })
            };
            let (min, max) = (bound(min)?, bound(max)?);
            return match (min, max) {
                (None, None) => Err(SearchError::Validation(format!(
                    "range filter '{}' needs at least one bound",
                    raw
                ))),
                (Some(lo), Some(hi)) if lo > hi => Err(SearchError::Validation(format!(
                    "range filter '{}' is inverted",
                    raw
                ))),
                _ => Ok(DynamicFilter::Range { min, max }),
            };
        }

        if raw.is_empty() {
            return Err(SearchError::Validation(
                "dynamic filter value must not be empty".to_string(),
            ));
        }
        Ok(DynamicFilter::Exact {
            value: raw.to_lowercase(),
        })
    }

    /// Reject operator/type combinations that can never match
    pub fn check_type(&self, name: &str, field_type: FieldType) -> SearchResult<()> {
        if matches!(self, DynamicFilter::Range { .. })
            && !(field_type.is_numeric() || field_type == FieldType::Date)
        {
            return Err(SearchError::Validation(format!(
                "range filter on '{}' requires a numeric or date field, found {}",
                name, field_type
            )));
        }
        Ok(())
    }

    /// Evaluate against a stored value of the declared type
    pub fn matches(&self, value: &str, field_type: FieldType) -> bool {
        match self {
            DynamicFilter::Exact { value: wanted } => match field_type {
                FieldType::Number | FieldType::Currency => {
                    match (value.trim().parse::<f64>(), wanted.parse::<f64>()) {
                        (Ok(a), Ok(b)) => (a - b).abs() < 1e-9,
                        _ => false,
                    }
                }
                FieldType::Boolean => matches!(
                    (parse_bool(value), parse_bool(wanted)),
                    (Some(a), Some(b)) if a == b
                ),
                _ => value.trim().to_lowercase() == *wanted,
            },
            DynamicFilter::Range { min, max } => {
                let actual = match field_type {
                    FieldType::Date => value
                        .trim()
                        .parse::<NaiveDate>()
                        .ok()
                        .map(|d| d.num_days_from_ce() as f64),
                    _ => value.trim().parse::<f64>().ok(),
                };
                match actual {
                    Some(actual) => {
                        min.map_or(true, |min| actual >= min) && max.map_or(true, |max| actual <= max)
                    }
                    None => false,
                }
            }
            DynamicFilter::Contains { text } => value.to_lowercase().contains(text.as_str()),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StayDates {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayDates {
    pub fn nights(&self) -> u32 {
        (self.check_out - self.check_in).num_days().max(0) as u32
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceBand {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceBand {
    pub fn contains(&self, price: f64) -> bool {
        self.min.map_or(true, |min| price >= min) && self.max.map_or(true, |max| price <= max)
    }

    /// Widen by `tolerance` on both sides
    pub fn widened(&self, tolerance: f64) -> Self {
        Self {
            min: self.min.map(|min| (min * (1.0 - tolerance)).max(0.0)),
            max: self.max.map(|max| max * (1.0 + tolerance)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoFilter {
    pub latitude: f64,
    pub longitude: f64,
    /// `None` when coordinates only drive distance display and sorting
    pub radius_km: Option<f64>,
}

/// The constraints a query actually runs with.
///
/// Relaxation mutates a copy of this; the response echoes the final copy as
/// `actual_criteria`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchCriteria {
    pub text: Option<String>,
    pub text_tokens: Vec<String>,
    pub city_key: Option<String>,
    pub property_type_id: Option<Uuid>,
    pub unit_type_id: Option<Uuid>,
    pub dates: Option<StayDates>,
    pub exclude_booking_id: Option<Uuid>,
    pub adults: Option<u32>,
    pub children: Option<u32>,
    pub guests: Option<u32>,
    pub price: Option<PriceBand>,
    pub preferred_currency: Option<String>,
    pub min_star_rating: Option<u8>,
    pub min_average_rating: Option<f64>,
    pub amenity_ids: Vec<Uuid>,
    pub service_ids: Vec<Uuid>,
    pub dynamic_filters: BTreeMap<String, DynamicFilter>,
    pub geo: Option<GeoFilter>,
}

impl SearchCriteria {
    /// Normalize a request that already passed [`SearchRequest::check`]
    pub fn from_request(request: &SearchRequest) -> SearchResult<Self> {
        let dynamic_filters = request
            .dynamic_filters
            .iter()
            .map(|(name, raw)| Ok((name.trim().to_string(), DynamicFilter::parse(raw)?)))
            .collect::<SearchResult<BTreeMap<_, _>>>()?;

        let text = request
            .text
            .as_ref()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let text_tokens = text.as_deref().map(tokenize).unwrap_or_default();

        let dates = match (request.check_in, request.check_out) {
            (Some(check_in), Some(check_out)) => Some(StayDates {
                check_in,
                check_out,
            }),
            _ => None,
        };

        let price = (request.min_price.is_some() || request.max_price.is_some()).then_some(PriceBand {
            min: request.min_price,
            max: request.max_price,
        });

        let geo = match (request.latitude, request.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoFilter {
                latitude,
                longitude,
                radius_km: request.radius_km,
            }),
            _ => None,
        };

        let guests = request.guests.or_else(|| match (request.adults, request.children) {
            (None, None) => None,
            (adults, children) => Some(adults.unwrap_or(0) + children.unwrap_or(0)),
        });

        let mut amenity_ids = request.amenity_ids.clone();
        amenity_ids.sort();
        amenity_ids.dedup();
        let mut service_ids = request.service_ids.clone();
        service_ids.sort();
        service_ids.dedup();

        Ok(Self {
            text,
            text_tokens,
            city_key: request
                .city
                .as_deref()
                .map(normalize_city)
                .filter(|c| !c.is_empty()),
            property_type_id: request.property_type_id,
            unit_type_id: request.unit_type_id,
            dates,
            exclude_booking_id: request.exclude_booking_id,
            adults: request.adults.filter(|a| *a > 0),
            children: request.children.filter(|c| *c > 0),
            guests: guests.filter(|g| *g > 0),
            price,
            preferred_currency: request.preferred_currency.as_ref().map(|c| c.to_uppercase()),
            min_star_rating: request.min_star_rating,
            min_average_rating: request.min_average_rating,
            amenity_ids,
            service_ids,
            dynamic_filters,
            geo,
        })
    }

    pub fn has_dates(&self) -> bool {
        self.dates.is_some()
    }

    pub fn has_price(&self) -> bool {
        self.price.is_some()
    }

    pub fn has_rating(&self) -> bool {
        self.min_star_rating.is_some() || self.min_average_rating.is_some()
    }

    pub fn has_amenities(&self) -> bool {
        !self.amenity_ids.is_empty() || !self.service_ids.is_empty()
    }

    pub fn radius_km(&self) -> Option<f64> {
        self.geo.and_then(|geo| geo.radius_km)
    }

    pub fn has_unit_type(&self) -> bool {
        self.unit_type_id.is_some()
    }
}
