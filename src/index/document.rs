//! The denormalized per-unit search record

use crate::models::{
    Amenity, CancellationPolicy, FieldType, Image, PeriodStatus, PricingMethod, PricingRule,
    ServiceOffering,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Inclusive price bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn single(price: f64) -> Self {
        Self {
            min: price,
            max: price,
        }
    }

    /// Widen to include `price`
    pub fn include(&mut self, price: f64) {
        self.min = self.min.min(price);
        self.max = self.max.max(price);
    }

    pub fn overlaps(&self, min: Option<f64>, max: Option<f64>) -> bool {
        let above_min = min.map_or(true, |min| self.max >= min);
        let below_max = max.map_or(true, |max| self.min <= max);
        above_min && below_max
    }
}

/// Cached price figures derived from the pricing rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingSummary {
    pub currency: String,
    pub daily: PriceRange,
    pub weekly: PriceRange,
    pub monthly: PriceRange,
    pub average_per_night: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitFacts {
    pub name: String,
    pub unit_type_id: Uuid,
    pub unit_type_name: String,
    pub base_price: f64,
    pub currency: String,
    pub max_adults: u32,
    pub max_children: u32,
    pub max_guests: u32,
    pub discount_percentage: f64,
    pub pricing_method: PricingMethod,
    pub cancellation: CancellationPolicy,
    pub listed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyFacts {
    pub name: String,
    pub property_type_id: Uuid,
    pub property_type_name: String,
    pub owner_id: Uuid,
    pub star_rating: u8,
    pub average_rating: f64,
    pub is_approved: bool,
    pub is_featured: bool,
    pub view_count: u64,
    pub booking_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationFacts {
    pub address: String,
    pub city: String,
    /// Normalized form used for exact-match filtering
    pub city_key: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A tagged half-open date range `[start, end)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: PeriodStatus,
    pub booking_id: Option<Uuid>,
    /// Occupied entries under the winning one: booking ids, `None` for blocks
    #[serde(default)]
    pub shadowed: Vec<Option<Uuid>>,
}

impl Period {
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start < end && self.end > start
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Whether the period stops being occupied once `booking_id` is ignored
    pub fn freed_by(&self, booking_id: Uuid) -> bool {
        self.booking_id == Some(booking_id)
            && self.shadowed.iter().all(|held| *held == Some(booking_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilitySummary {
    pub horizon_start: NaiveDate,
    pub horizon_end: NaiveDate,
    pub next_available_date: Option<NaiveDate>,
    pub available_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicField {
    pub value: String,
    pub display_name: String,
    pub field_type: FieldType,
    pub category: Option<String>,
    pub is_searchable: bool,
    pub is_primary_filter: bool,
    pub show_in_cards: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub indexed_at: DateTime<Utc>,
    /// Newest update time of the source entities
    pub last_updated: DateTime<Utc>,
    pub version: u64,
    pub is_indexed: bool,
    /// SHA-256 of the document with metadata blanked
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDocument {
    pub key: String,
    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub unit: UnitFacts,
    pub property: PropertyFacts,
    pub location: LocationFacts,
    /// Sorted by start, non-overlapping
    pub periods: Vec<Period>,
    pub availability: AvailabilitySummary,
    pub pricing_rules: Vec<PricingRule>,
    pub pricing: PricingSummary,
    pub dynamic_fields: BTreeMap<String, DynamicField>,
    pub amenities: Vec<Amenity>,
    pub services: Vec<ServiceOffering>,
    pub images: Vec<Image>,
    pub keywords: Vec<String>,
    pub metadata: DocumentMetadata,
}

impl IndexDocument {
    /// Composite key `property:{propertyId}:unit:{unitId}`
    pub fn key_for(property_id: Uuid, unit_id: Uuid) -> String {
        format!("property:{}:unit:{}", property_id, unit_id)
    }

    /// Inverse of [`IndexDocument::key_for`]
    pub fn parse_key(key: &str) -> Option<(Uuid, Uuid)> {
        let mut parts = key.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("property"), Some(property_id), Some("unit"), Some(unit_id), None) => {
                Some((property_id.parse().ok()?, unit_id.parse().ok()?))
            }
            _ => None,
        }
    }

    /// Hash over the content and source update time; equal hashes mean an upsert is a no-op
    pub fn compute_content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut content = self.clone();
        content.metadata = DocumentMetadata {
            indexed_at: DateTime::<Utc>::default(),
            last_updated: DateTime::<Utc>::default(),
            version: 0,
            is_indexed: false,
            content_hash: String::new(),
        };
        // Serializing plain data with string map keys cannot fail
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        hasher.update(&bytes);
        hasher.update(self.metadata.last_updated.timestamp_millis().to_be_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn main_image(&self) -> Option<&Image> {
        self.images
            .iter()
            .find(|image| image.is_main)
            .or_else(|| self.images.first())
    }

    pub fn has_amenity(&self, id: &Uuid) -> bool {
        self.amenities.iter().any(|amenity| &amenity.id == id)
    }

    pub fn has_service(&self, id: &Uuid) -> bool {
        self.services.iter().any(|service| &service.id == id)
    }

    /// Dynamic fields marked for display on result cards, in name order
    pub fn card_fields(&self) -> impl Iterator<Item = (&String, &DynamicField)> {
        self.dynamic_fields
            .iter()
            .filter(|(_, field)| field.show_in_cards)
    }
}
