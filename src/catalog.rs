//! Authoritative catalog access.
//!
//! The relational side of the platform owns units, properties, pricing rules and
//! calendars. The indexer only ever reads whole snapshots through
//! [`CatalogSource`].

use crate::error::{AppError, Result};
use crate::models::{CalendarEntry, PricingRule, Property, Unit, UnitSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// A unit as listed by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub property_id: Uuid,
    pub unit_id: Uuid,
    /// Newest update time of the unit or its property
    pub updated_at: DateTime<Utc>,
}

/// Read access to the authoritative catalog
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Every active unit
    async fn active_units(&self) -> Result<Vec<UnitRef>>;

    /// Full snapshot of one unit, `None` if the unit no longer exists
    async fn load_snapshot(&self, unit_id: &Uuid) -> Result<Option<UnitSnapshot>>;

    /// Ids of all units (active or not) belonging to a property
    async fn units_of_property(&self, property_id: &Uuid) -> Result<Vec<Uuid>>;
}

/// Unit entry of a seed file; rules and calendar travel with the unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUnit {
    #[serde(flatten)]
    pub unit: Unit,
    #[serde(default)]
    pub pricing_rules: Vec<PricingRule>,
    #[serde(default)]
    pub calendar: Vec<CalendarEntry>,
}

/// JSON seed layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub units: Vec<SeedUnit>,
}

/// In-memory catalog (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    properties: Arc<DashMap<Uuid, Property>>,
    units: Arc<DashMap<Uuid, Unit>>,
    pricing_rules: Arc<DashMap<Uuid, Vec<PricingRule>>>,
    calendars: Arc<DashMap<Uuid, Vec<CalendarEntry>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        let catalog = Self::new();
        for property in seed.properties {
            catalog.upsert_property(property);
        }
        for entry in seed.units {
            let unit_id = entry.unit.id;
            catalog.upsert_unit(entry.unit);
            catalog.set_pricing_rules(unit_id, entry.pricing_rules);
            catalog.set_calendar(unit_id, entry.calendar);
        }
        catalog
    }

    /// Load a seed file
    pub async fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let seed: CatalogSeed = serde_json::from_str(&raw).map_err(|e| {
            AppError::Configuration(format!(
                "Invalid catalog seed {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        tracing::info!(
            path = %path.as_ref().display(),
            properties = seed.properties.len(),
            units = seed.units.len(),
            "Loaded catalog seed"
        );
        Ok(Self::from_seed(seed))
    }

    pub fn upsert_property(&self, property: Property) {
        self.properties.insert(property.id, property);
    }

    pub fn upsert_unit(&self, unit: Unit) {
        self.units.insert(unit.id, unit);
    }

    pub fn remove_unit(&self, unit_id: &Uuid) -> Option<Unit> {
        self.pricing_rules.remove(unit_id);
        self.calendars.remove(unit_id);
        self.units.remove(unit_id).map(|(_, unit)| unit)
    }

    pub fn set_pricing_rules(&self, unit_id: Uuid, rules: Vec<PricingRule>) {
        self.pricing_rules.insert(unit_id, rules);
    }

    pub fn set_calendar(&self, unit_id: Uuid, entries: Vec<CalendarEntry>) {
        self.calendars.insert(unit_id, entries);
    }

    pub fn add_calendar_entry(&self, unit_id: Uuid, entry: CalendarEntry) {
        self.calendars.entry(unit_id).or_default().push(entry);
    }

    /// Drop the calendar entries of a cancelled booking
    pub fn cancel_booking(&self, unit_id: &Uuid, booking_id: &Uuid) -> bool {
        match self.calendars.get_mut(unit_id) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|entry| entry.booking_id.as_ref() != Some(booking_id));
                entries.len() != before
            }
            None => false,
        }
    }

    /// Apply `change` to a stored unit, stamping its update time
    pub fn update_unit(&self, unit_id: &Uuid, change: impl FnOnce(&mut Unit)) -> bool {
        match self.units.get_mut(unit_id) {
            Some(mut unit) => {
                change(&mut *unit);
                unit.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Apply `change` to a stored property, stamping its update time
    pub fn update_property(&self, property_id: &Uuid, change: impl FnOnce(&mut Property)) -> bool {
        match self.properties.get_mut(property_id) {
            Some(mut property) => {
                change(&mut *property);
                property.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn active_units(&self) -> Result<Vec<UnitRef>> {
        let mut refs: Vec<UnitRef> = self
            .units
            .iter()
            .filter(|entry| entry.is_active)
            .map(|entry| {
                let unit = entry.value();
                let property_updated = self
                    .properties
                    .get(&unit.property_id)
                    .map(|property| property.updated_at);
                UnitRef {
                    property_id: unit.property_id,
                    unit_id: unit.id,
                    updated_at: property_updated.map_or(unit.updated_at, |p| p.max(unit.updated_at)),
                }
            })
            .collect();
        refs.sort_by_key(|r| (r.property_id, r.unit_id));
        Ok(refs)
    }

    async fn load_snapshot(&self, unit_id: &Uuid) -> Result<Option<UnitSnapshot>> {
        let Some(unit) = self.units.get(unit_id).map(|entry| entry.clone()) else {
            return Ok(None);
        };
        let property = self
            .properties
            .get(&unit.property_id)
            .map(|entry| entry.clone());
        let pricing_rules = self
            .pricing_rules
            .get(unit_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        let calendar = self
            .calendars
            .get(unit_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();

        Ok(Some(UnitSnapshot {
            unit,
            property,
            pricing_rules,
            calendar,
        }))
    }

    async fn units_of_property(&self, property_id: &Uuid) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .units
            .iter()
            .filter(|entry| &entry.property_id == property_id)
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
