//! Names of the auxiliary index structures.
//!
//! Every set and sorted set holds document keys as members. Store backends add
//! their own namespace (and prefix) on top of these names.

use crate::models::FieldType;
use uuid::Uuid;

/// Every live document
pub const ALL: &str = "all";
pub const APPROVED: &str = "approved";
pub const FEATURED: &str = "featured";

pub const PRICE_MIN: &str = "price_min";
pub const PRICE_MAX: &str = "price_max";
pub const STAR_RATING: &str = "star_rating";
pub const AVERAGE_RATING: &str = "average_rating";
pub const MAX_ADULTS: &str = "max_adults";
pub const MAX_CHILDREN: &str = "max_children";
pub const MAX_GUESTS: &str = "max_guests";

pub fn city(city_key: &str) -> String {
    format!("city:{}", city_key)
}

pub fn unit_type(id: &Uuid) -> String {
    format!("unit_type:{}", id)
}

pub fn property_type(id: &Uuid) -> String {
    format!("property_type:{}", id)
}

pub fn property(id: &Uuid) -> String {
    format!("property:{}", id)
}

pub fn amenity(id: &Uuid) -> String {
    format!("amenity:{}", id)
}

pub fn service(id: &Uuid) -> String {
    format!("service:{}", id)
}

pub fn geo_cell(lat_cell: i64, lon_cell: i64) -> String {
    format!("geo:{}:{}", lat_cell, lon_cell)
}

pub fn keyword(token: &str) -> String {
    format!("kw:{}", token)
}

/// Registry entry: documents carrying the searchable field `name`
pub fn field(name: &str) -> String {
    format!("field:{}", name)
}

/// Registry entry: documents carrying `name` with declared type `field_type`
pub fn field_type(name: &str, field_type: FieldType) -> String {
    format!("field:{}:{}", name, field_type)
}

/// Dimension an index structure belongs to, used for statistics
pub fn dimension(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}
