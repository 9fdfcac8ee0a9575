//! The denormalized unit index.
//!
//! - [`DocumentBuilder`] turns a catalog snapshot into an [`IndexDocument`]
//! - [`SecondaryIndexManager`] writes documents together with their set and
//!   sorted-set entries
//! - [`AvailabilityPeriodIndex`] answers date questions over a document's periods
//! - [`IndexingService`] drives event-based updates, full rebuilds and self-healing

pub mod builder;
pub mod document;
pub mod geo;
pub mod keys;
pub mod keywords;
pub mod periods;
pub mod pricing;
pub mod rebuild;
pub mod secondary;

pub use builder::{BuildError, DocumentBuilder};
pub use document::{
    AvailabilitySummary, DocumentMetadata, DynamicField, IndexDocument, LocationFacts, Period,
    PriceRange, PricingSummary, PropertyFacts, UnitFacts,
};
pub use periods::{merge_calendar, AvailabilityPeriodIndex};
pub use pricing::{PriceCalculator, StayQuote};
pub use rebuild::{
    EventReport, FailedUnit, IndexingService, IndexingStats, JobStatus, RebuildJob,
    ReindexOutcome, StaleUnit,
};
pub use secondary::{IndexEntries, SecondaryIndexManager, UpsertOutcome};
