//! Authoritative catalog entities as handed to the index by the relational side.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// How a unit's base price is quoted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PricingMethod {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

/// Status of a calendar period
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PeriodStatus {
    Available,
    Booked,
    Blocked,
}

impl PeriodStatus {
    /// Higher wins when periods overlap
    pub fn precedence(&self) -> u8 {
        match self {
            PeriodStatus::Available => 0,
            PeriodStatus::Blocked => 1,
            PeriodStatus::Booked => 2,
        }
    }

    pub fn is_occupied(&self) -> bool {
        !matches!(self, PeriodStatus::Available)
    }
}

/// Declared type of a dynamic field; drives query-time comparison
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Currency,
    Boolean,
    Select,
    Date,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::Currency)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CancellationPolicy {
    pub allows_cancellation: bool,
    pub free_cancellation_days: Option<u32>,
    pub refundable: bool,
}

/// A raw calendar entry from the booking side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEntry {
    pub start_date: NaiveDate,
    /// Exclusive
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
    pub booking_id: Option<Uuid>,
    pub note: Option<String>,
}

impl CalendarEntry {
    pub fn booked(start: NaiveDate, end: NaiveDate, booking_id: Uuid) -> Self {
        Self {
            start_date: start,
            end_date: end,
            status: PeriodStatus::Booked,
            booking_id: Some(booking_id),
            note: None,
        }
    }

    pub fn blocked(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start_date: start,
            end_date: end,
            status: PeriodStatus::Blocked,
            booking_id: None,
            note: None,
        }
    }
}

/// A seasonal or promotional price for a date range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingRule {
    pub id: Uuid,
    pub start_date: NaiveDate,
    /// Exclusive
    pub end_date: NaiveDate,
    pub base_price: f64,
    pub weekend_price: Option<f64>,
    pub weekly_price: Option<f64>,
    pub monthly_price: Option<f64>,
    pub currency: String,
    pub season: Option<String>,
    pub min_stay: Option<u32>,
    pub max_stay: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Amenity {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub extra_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceOffering {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub extra_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub url: String,
    pub caption: Option<String>,
    pub is_main: bool,
    pub display_order: u32,
}

/// Value of an owner-defined attribute on a unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicFieldValue {
    pub name: String,
    pub display_name: String,
    pub value: String,
    pub field_type: FieldType,
    pub category: Option<String>,
    pub is_searchable: bool,
    pub is_primary_filter: bool,
    pub show_in_cards: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Property {
    pub id: Uuid,
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
    pub address: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub amenities: Vec<Amenity>,
    #[serde(default)]
    pub services: Vec<ServiceOffering>,
    #[serde(default)]
    pub images: Vec<Image>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub id: Uuid,
    pub property_id: Uuid,
    pub name: String,
    pub unit_type_id: Uuid,
    pub unit_type_name: String,
    pub base_price: f64,
    pub currency: String,
    pub max_adults: u32,
    pub max_children: u32,
    #[serde(default)]
    pub discount_percentage: f64,
    #[serde(default)]
    pub pricing_method: PricingMethod,
    #[serde(default)]
    pub cancellation: CancellationPolicy,
    pub is_active: bool,
    #[serde(default)]
    pub amenities: Vec<Amenity>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub dynamic_fields: Vec<DynamicFieldValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the document builder needs for one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit: Unit,
    pub property: Option<Property>,
    #[serde(default)]
    pub pricing_rules: Vec<PricingRule>,
    #[serde(default)]
    pub calendar: Vec<CalendarEntry>,
}

impl UnitSnapshot {
    /// Newest update time across the entities in the snapshot
    pub fn source_updated_at(&self) -> DateTime<Utc> {
        match &self.property {
            Some(property) => property.updated_at.max(self.unit.updated_at),
            None => self.unit.updated_at,
        }
    }
}
