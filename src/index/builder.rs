//! Builds an [`IndexDocument`] from an authoritative unit snapshot.
//!
//! The builder is a pure function of its inputs: it never reads or writes the
//! index. Version and indexed flag are assigned by the secondary index manager
//! when the document is written.

use crate::error::AppError;
use crate::index::document::{
    AvailabilitySummary, DocumentMetadata, DynamicField, IndexDocument, LocationFacts,
    PropertyFacts, UnitFacts,
};
use crate::index::keywords::{keyword_set, normalize_city};
use crate::index::periods::{horizon_end, merge_calendar, AvailabilityPeriodIndex};
use crate::index::pricing::PriceCalculator;
use crate::models::{Amenity, Image, UnitSnapshot};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Reasons a document cannot be assembled
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("unit {unit_id} references missing property {property_id}")]
    MissingProperty { unit_id: Uuid, property_id: Uuid },

    #[error("unit {unit_id} belongs to property {expected} but the snapshot carries {actual}")]
    PropertyMismatch {
        unit_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("unit {unit_id} is priced in {unit_currency} but pricing rule {rule_id} uses {rule_currency}")]
    InconsistentCurrency {
        unit_id: Uuid,
        rule_id: Uuid,
        unit_currency: String,
        rule_currency: String,
    },

    #[error("invalid date range in {context}: {start} is not before {end}")]
    InvalidDateRange {
        context: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("invalid coordinates ({latitude}, {longitude}) on property {property_id}")]
    InvalidCoordinates {
        property_id: Uuid,
        latitude: f64,
        longitude: f64,
    },

    #[error("invalid price {price} on unit {unit_id}")]
    InvalidPrice { unit_id: Uuid, price: f64 },
}

impl From<BuildError> for AppError {
    fn from(err: BuildError) -> Self {
        AppError::Build(err.to_string())
    }
}

/// Assembles index documents
#[derive(Debug, Clone, Copy)]
pub struct DocumentBuilder {
    horizon_days: u32,
}

impl DocumentBuilder {
    pub fn new(horizon_days: u32) -> Self {
        Self { horizon_days }
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Build the document for `snapshot` as of the calendar day `as_of`
    pub fn build(
        &self,
        snapshot: &UnitSnapshot,
        as_of: NaiveDate,
        indexed_at: DateTime<Utc>,
    ) -> Result<IndexDocument, BuildError> {
        let unit = &snapshot.unit;
        let property = snapshot
            .property
            .as_ref()
            .ok_or(BuildError::MissingProperty {
                unit_id: unit.id,
                property_id: unit.property_id,
            })?;

        self.validate(snapshot)?;

        let horizon_end = horizon_end(as_of, self.horizon_days);
        let periods = merge_calendar(&snapshot.calendar, as_of, horizon_end);
        let calendar = AvailabilityPeriodIndex::new(&periods);
        let availability = AvailabilitySummary {
            horizon_start: as_of,
            horizon_end,
            next_available_date: calendar.next_available_date(as_of, horizon_end),
            available_days: calendar.available_days(as_of, horizon_end),
        };

        let mut pricing_rules = snapshot.pricing_rules.clone();
        pricing_rules.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.id.cmp(&b.id)));
        let pricing = PriceCalculator::new(unit.base_price, unit.discount_percentage, &pricing_rules)
            .summarize(&unit.currency, as_of, self.horizon_days);

        let dynamic_fields: BTreeMap<String, DynamicField> = unit
            .dynamic_fields
            .iter()
            .map(|field| {
                (
                    field.name.clone(),
                    DynamicField {
                        value: field.value.clone(),
                        display_name: field.display_name.clone(),
                        field_type: field.field_type,
                        category: field.category.clone(),
                        is_searchable: field.is_searchable,
                        is_primary_filter: field.is_primary_filter,
                        show_in_cards: field.show_in_cards,
                    },
                )
            })
            .collect();

        let keywords = keyword_set(
            [
                unit.name.as_str(),
                unit.unit_type_name.as_str(),
                property.name.as_str(),
                property.property_type_name.as_str(),
                property.city.as_str(),
            ]
            .into_iter()
            .chain(
                dynamic_fields
                    .values()
                    .filter(|field| field.is_primary_filter)
                    .map(|field| field.value.as_str()),
            ),
        );

        let mut services = property.services.clone();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services.dedup_by(|a, b| a.id == b.id);

        let mut document = IndexDocument {
            key: IndexDocument::key_for(property.id, unit.id),
            property_id: property.id,
            unit_id: unit.id,
            unit: UnitFacts {
                name: unit.name.clone(),
                unit_type_id: unit.unit_type_id,
                unit_type_name: unit.unit_type_name.clone(),
                base_price: unit.base_price,
                currency: unit.currency.clone(),
                max_adults: unit.max_adults,
                max_children: unit.max_children,
                max_guests: unit.max_adults + unit.max_children,
                discount_percentage: unit.discount_percentage,
                pricing_method: unit.pricing_method,
                cancellation: unit.cancellation.clone(),
                listed_at: unit.created_at,
            },
            property: PropertyFacts {
                name: property.name.clone(),
                property_type_id: property.property_type_id,
                property_type_name: property.property_type_name.clone(),
                owner_id: property.owner_id,
                star_rating: property.star_rating,
                average_rating: property.average_rating,
                is_approved: property.is_approved,
                is_featured: property.is_featured,
                view_count: property.view_count,
                booking_count: property.booking_count,
            },
            location: LocationFacts {
                address: property.address.clone(),
                city: property.city.trim().to_string(),
                city_key: normalize_city(&property.city),
                latitude: property.latitude,
                longitude: property.longitude,
            },
            periods,
            availability,
            pricing_rules,
            pricing,
            dynamic_fields,
            amenities: merge_amenities(&property.amenities, &unit.amenities),
            services,
            images: ordered_images(&unit.images, &property.images),
            keywords,
            metadata: DocumentMetadata {
                indexed_at,
                last_updated: snapshot.source_updated_at(),
                version: 0,
                is_indexed: false,
                content_hash: String::new(),
            },
        };
        document.metadata.content_hash = document.compute_content_hash();

        Ok(document)
    }

    fn validate(&self, snapshot: &UnitSnapshot) -> Result<(), BuildError> {
        let unit = &snapshot.unit;

        if let Some(property) = &snapshot.property {
            if property.id != unit.property_id {
                return Err(BuildError::PropertyMismatch {
                    unit_id: unit.id,
                    expected: unit.property_id,
                    actual: property.id,
                });
            }
            let valid_lat = (-90.0..=90.0).contains(&property.latitude);
            let valid_lon = (-180.0..=180.0).contains(&property.longitude);
            if !valid_lat || !valid_lon {
                return Err(BuildError::InvalidCoordinates {
                    property_id: property.id,
                    latitude: property.latitude,
                    longitude: property.longitude,
                });
            }
        }

        if !unit.base_price.is_finite() || unit.base_price < 0.0 {
            return Err(BuildError::InvalidPrice {
                unit_id: unit.id,
                price: unit.base_price,
            });
        }

        for rule in &snapshot.pricing_rules {
            if !rule.currency.eq_ignore_ascii_case(&unit.currency) {
                return Err(BuildError::InconsistentCurrency {
                    unit_id: unit.id,
                    rule_id: rule.id,
                    unit_currency: unit.currency.clone(),
                    rule_currency: rule.currency.clone(),
                });
            }
            if rule.start_date >= rule.end_date {
                return Err(BuildError::InvalidDateRange {
                    context: format!("pricing rule {}", rule.id),
                    start: rule.start_date,
                    end: rule.end_date,
                });
            }
            if !rule.base_price.is_finite() || rule.base_price < 0.0 {
                return Err(BuildError::InvalidPrice {
                    unit_id: unit.id,
                    price: rule.base_price,
                });
            }
        }

        for entry in &snapshot.calendar {
            if entry.start_date >= entry.end_date {
                return Err(BuildError::InvalidDateRange {
                    context: format!("calendar entry of unit {}", unit.id),
                    start: entry.start_date,
                    end: entry.end_date,
                });
            }
        }

        Ok(())
    }
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new(365)
    }
}

/// Property-wide amenities plus unit-specific ones, one entry per id
fn merge_amenities(property: &[Amenity], unit: &[Amenity]) -> Vec<Amenity> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Amenity> = unit
        .iter()
        .chain(property.iter())
        .filter(|amenity| seen.insert(amenity.id))
        .cloned()
        .collect();
    merged.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    merged
}

/// Unit images first, each group in display order
fn ordered_images(unit: &[Image], property: &[Image]) -> Vec<Image> {
    let mut unit_images = unit.to_vec();
    unit_images.sort_by_key(|image| image.display_order);
    let mut property_images = property.to_vec();
    property_images.sort_by_key(|image| image.display_order);
    unit_images.extend(property_images);
    unit_images
}
