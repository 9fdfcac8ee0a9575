//! Search request as received from clients

use crate::search::error::{SearchError, SearchResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

pub const MAX_PAGE_SIZE: u32 = 100;
/// Half the Earth's circumference
pub const MAX_RADIUS_KM: f64 = 20_000.0;

/// Result ordering
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SortBy {
    /// Featured first, then by rating
    #[default]
    Relevance,
    PriceAsc,
    PriceDesc,
    Rating,
    Distance,
    Newest,
    Popular,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SearchRequest {
    #[validate(length(max = 200))]
    pub text: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub city: Option<String>,

    pub property_type_id: Option<Uuid>,
    pub unit_type_id: Option<Uuid>,

    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    /// Treat this booking's own period as free (modifying an existing booking)
    pub exclude_booking_id: Option<Uuid>,

    #[validate(range(max = 100))]
    pub adults: Option<u32>,
    #[validate(range(max = 100))]
    pub children: Option<u32>,
    #[validate(range(min = 1, max = 200))]
    pub guests: Option<u32>,

    #[validate(range(min = 0.0))]
    pub min_price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub max_price: Option<f64>,
    #[validate(length(equal = 3))]
    pub preferred_currency: Option<String>,

    #[validate(range(min = 1, max = 5))]
    pub min_star_rating: Option<u8>,
    #[validate(range(min = 0.0, max = 5.0))]
    pub min_average_rating: Option<f64>,

    #[serde(default)]
    pub amenity_ids: Vec<Uuid>,
    #[serde(default)]
    pub service_ids: Vec<Uuid>,

    /// Field name to `value`, `min..max` or `~text`
    #[serde(default)]
    pub dynamic_filters: BTreeMap<String, String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,

    #[serde(default)]
    pub sort_by: SortBy,

    #[serde(default = "default_page")]
    #[validate(range(min = 1))]
    pub page: u32,
    /// Defaults to the configured page size
    #[validate(range(min = 1, max = 100))]
    pub page_size: Option<u32>,

    #[serde(default)]
    pub group_by_property: bool,
    #[validate(range(min = 1))]
    pub max_units_per_property: Option<u32>,

    /// Overrides the configured minimum before relaxation kicks in
    pub min_results: Option<usize>,
    #[serde(default = "default_true")]
    pub enable_relaxation: bool,
    /// Overrides the configured query timeout
    #[validate(range(min = 1, max = 60000))]
    pub timeout_ms: Option<u64>,
}

fn default_page() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            text: None,
            city: None,
            property_type_id: None,
            unit_type_id: None,
            check_in: None,
            check_out: None,
            exclude_booking_id: None,
            adults: None,
            children: None,
            guests: None,
            min_price: None,
            max_price: None,
            preferred_currency: None,
            min_star_rating: None,
            min_average_rating: None,
            amenity_ids: Vec::new(),
            service_ids: Vec::new(),
            dynamic_filters: BTreeMap::new(),
            latitude: None,
            longitude: None,
            radius_km: None,
            sort_by: SortBy::default(),
            page: default_page(),
            page_size: None,
            group_by_property: false,
            max_units_per_property: None,
            min_results: None,
            enable_relaxation: true,
            timeout_ms: None,
        }
    }
}

impl SearchRequest {
    /// Field-level and cross-field validation; never touches the index
    pub fn check(&self) -> SearchResult<()> {
        self.validate()?;

        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) if check_in >= check_out => {
                return Err(SearchError::Validation(format!(
                    "check_in {} must be before check_out {}",
                    check_in, check_out
                )));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(SearchError::Validation(
                    "check_in and check_out must be given together".to_string(),
                ));
            }
            _ => {}
        }

        if self.latitude.is_some() != self.longitude.is_some() {
            return Err(SearchError::Validation(
                "latitude and longitude must be given together".to_string(),
            ));
        }
        if let Some(radius) = self.radius_km {
            if self.latitude.is_none() {
                return Err(SearchError::Validation(
                    "radius_km requires latitude and longitude".to_string(),
                ));
            }
            if !radius.is_finite() || radius <= 0.0 || radius > MAX_RADIUS_KM {
                return Err(SearchError::Validation(format!(
                    "radius_km must be within (0, {}]",
                    MAX_RADIUS_KM
                )));
            }
        }
        if self.sort_by == SortBy::Distance && self.latitude.is_none() {
            return Err(SearchError::Validation(
                "distance sort requires latitude and longitude".to_string(),
            ));
        }

        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(SearchError::Validation(format!(
                    "min_price {} exceeds max_price {}",
                    min, max
                )));
            }
        }

        if self.dynamic_filters.keys().any(|name| name.trim().is_empty()) {
            return Err(SearchError::Validation(
                "dynamic filter names must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn page_size_or(&self, default_page_size: u32) -> u32 {
        self.page_size
            .unwrap_or(default_page_size)
            .clamp(1, MAX_PAGE_SIZE)
    }
}
