//! Secondary index maintenance.
//!
//! Every document write is turned into one [`WriteBatch`] holding the document
//! and the diff of its auxiliary entries, applied under a version
//! compare-and-swap so the document and its index entries never diverge.

use crate::error::{AppError, Result};
use crate::index::document::IndexDocument;
use crate::index::{geo, keys};
use crate::metrics::INDEX_WRITES_TOTAL;
use crate::models::FieldType;
use crate::state::{ApplyOutcome, IndexStore, WriteBatch};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strum::IntoEnumIterator;

const MAX_CAS_ATTEMPTS: u32 = 8;

/// The auxiliary entries a document contributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexEntries {
    pub sets: BTreeSet<String>,
    pub scores: BTreeMap<String, f64>,
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written { version: u64 },
    /// Content hash matched the stored document
    Unchanged { version: u64 },
}

impl UpsertOutcome {
    pub fn version(&self) -> u64 {
        match self {
            UpsertOutcome::Written { version } | UpsertOutcome::Unchanged { version } => *version,
        }
    }
}

pub struct SecondaryIndexManager {
    store: Arc<dyn IndexStore>,
    geo_cell_degrees: f64,
    generation: AtomicU64,
}

impl SecondaryIndexManager {
    pub fn new(store: Arc<dyn IndexStore>, geo_cell_degrees: f64) -> Self {
        Self {
            store,
            geo_cell_degrees,
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn geo_cell_degrees(&self) -> f64 {
        self.geo_cell_degrees
    }

    /// Bumped after every successful write or delete
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Entries derived from a document
    pub fn entries(&self, doc: &IndexDocument) -> IndexEntries {
        let mut sets = BTreeSet::new();
        sets.insert(keys::ALL.to_string());
        if !doc.location.city_key.is_empty() {
            sets.insert(keys::city(&doc.location.city_key));
        }
        sets.insert(keys::unit_type(&doc.unit.unit_type_id));
        sets.insert(keys::property_type(&doc.property.property_type_id));
        sets.insert(keys::property(&doc.property_id));
        if doc.property.is_approved {
            sets.insert(keys::APPROVED.to_string());
        }
        if doc.property.is_featured {
            sets.insert(keys::FEATURED.to_string());
        }

        let (lat_cell, lon_cell) = geo::cell_of(
            doc.location.latitude,
            doc.location.longitude,
            self.geo_cell_degrees,
        );
        sets.insert(keys::geo_cell(lat_cell, lon_cell));

        sets.extend(doc.amenities.iter().map(|amenity| keys::amenity(&amenity.id)));
        sets.extend(doc.services.iter().map(|service| keys::service(&service.id)));
        sets.extend(doc.keywords.iter().map(|token| keys::keyword(token)));

        for (name, field) in doc.dynamic_fields.iter().filter(|(_, f)| f.is_searchable) {
            sets.insert(keys::field(name));
            sets.insert(keys::field_type(name, field.field_type));
        }

        let scores = BTreeMap::from([
            (keys::PRICE_MIN.to_string(), doc.pricing.daily.min),
            (keys::PRICE_MAX.to_string(), doc.pricing.daily.max),
            (keys::STAR_RATING.to_string(), f64::from(doc.property.star_rating)),
            (keys::AVERAGE_RATING.to_string(), doc.property.average_rating),
            (keys::MAX_ADULTS.to_string(), f64::from(doc.unit.max_adults)),
            (keys::MAX_CHILDREN.to_string(), f64::from(doc.unit.max_children)),
            (keys::MAX_GUESTS.to_string(), f64::from(doc.unit.max_guests)),
        ]);

        IndexEntries { sets, scores }
    }

    fn diff(
        &self,
        key: &str,
        previous: Option<&IndexDocument>,
        next: Option<IndexDocument>,
    ) -> WriteBatch {
        let old = previous.map(|doc| self.entries(doc)).unwrap_or_default();
        let new = next.as_ref().map(|doc| self.entries(doc)).unwrap_or_default();

        WriteBatch {
            key: key.to_string(),
            expected_version: previous.map(|doc| doc.metadata.version),
            set_removes: old.sets.difference(&new.sets).cloned().collect(),
            set_adds: new.sets.difference(&old.sets).cloned().collect(),
            score_removes: old
                .scores
                .keys()
                .filter(|name| !new.scores.contains_key(*name))
                .cloned()
                .collect(),
            score_adds: new
                .scores
                .iter()
                .filter(|(name, score)| old.scores.get(*name) != Some(*score))
                .map(|(name, score)| (name.clone(), *score))
                .collect(),
            document: next,
        }
    }

    /// Write `document` and its entries; last writer wins on conflict
    pub async fn upsert(&self, document: IndexDocument) -> Result<UpsertOutcome> {
        let key = document.key.clone();
        let content_hash = if document.metadata.content_hash.is_empty() {
            document.compute_content_hash()
        } else {
            document.metadata.content_hash.clone()
        };

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let previous = self.store.get_document(&key).await?;
            if let Some(current) = &previous {
                if current.metadata.content_hash == content_hash {
                    INDEX_WRITES_TOTAL.with_label_values(&["unchanged"]).inc();
                    tracing::debug!(key = %key, version = current.metadata.version, "Document unchanged");
                    return Ok(UpsertOutcome::Unchanged {
                        version: current.metadata.version,
                    });
                }
            }

            let version = previous.as_ref().map_or(1, |doc| doc.metadata.version + 1);
            let mut next = document.clone();
            next.metadata.version = version;
            next.metadata.is_indexed = true;
            next.metadata.content_hash = content_hash.clone();

            let batch = self.diff(&key, previous.as_ref(), Some(next));
            match self.store.apply(&batch).await? {
                ApplyOutcome::Applied => {
                    self.generation.fetch_add(1, Ordering::AcqRel);
                    INDEX_WRITES_TOTAL.with_label_values(&["written"]).inc();
                    tracing::debug!(key = %key, version, "Document written");
                    return Ok(UpsertOutcome::Written { version });
                }
                ApplyOutcome::Conflict { current } => {
                    INDEX_WRITES_TOTAL.with_label_values(&["conflict"]).inc();
                    tracing::debug!(key = %key, attempt, ?current, "Concurrent write, retrying");
                }
            }
        }

        Err(AppError::VersionConflict(format!(
            "document {} kept changing after {} attempts",
            key, MAX_CAS_ATTEMPTS
        )))
    }

    /// Remove a document from every structure; `false` if it did not exist
    pub async fn delete(&self, key: &str) -> Result<bool> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(previous) = self.store.get_document(key).await? else {
                return Ok(false);
            };

            let batch = self.diff(key, Some(&previous), None);
            if self.store.apply(&batch).await? == ApplyOutcome::Applied {
                self.generation.fetch_add(1, Ordering::AcqRel);
                INDEX_WRITES_TOTAL.with_label_values(&["deleted"]).inc();
                tracing::debug!(key = %key, "Document deleted");
                return Ok(true);
            }
        }

        Err(AppError::VersionConflict(format!(
            "document {} kept changing while deleting",
            key
        )))
    }

    pub async fn get(&self, key: &str) -> Result<Option<IndexDocument>> {
        self.store.get_document(key).await
    }

    /// Documents for `keys`, silently dropping any deleted in the meantime
    pub async fn get_many(&self, keys: &[String]) -> Result<Vec<IndexDocument>> {
        Ok(self
            .store
            .get_documents(keys)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Declared type of a searchable dynamic field, `None` if no live document
    /// carries it as searchable
    pub async fn registered_field(&self, name: &str) -> Result<Option<FieldType>> {
        if self.store.cardinality(&keys::field(name)).await? == 0 {
            return Ok(None);
        }
        for field_type in FieldType::iter() {
            if self.store.cardinality(&keys::field_type(name, field_type)).await? > 0 {
                return Ok(Some(field_type));
            }
        }
        Ok(None)
    }

    /// Keys of the live documents of a property
    pub async fn property_documents(&self, property_id: &uuid::Uuid) -> Result<BTreeSet<String>> {
        self.store.members(&keys::property(property_id)).await
    }
}
