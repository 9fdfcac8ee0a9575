//! Denormalized property/unit search index.
//!
//! Units of a booking platform are flattened into self-contained documents
//! with secondary set and sorted-set structures for fast filtering, queried
//! through a staged planner with progressive relaxation.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod models;
pub mod search;
pub mod state;

pub use error::{AppError, Result};
