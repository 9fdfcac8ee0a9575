//! Turns matched documents into sorted, optionally grouped, paginated results

use crate::index::document::{IndexDocument, PriceRange};
use crate::index::geo::haversine_km;
use crate::index::periods::AvailabilityPeriodIndex;
use crate::index::pricing::{round_money, PriceCalculator};
use crate::search::criteria::SearchCriteria;
use crate::search::request::SortBy;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// Dynamic field shown on a result card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardField {
    pub name: String,
    pub display_name: String,
    pub value: String,
}

/// A single matched unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitResult {
    /// Document key
    pub key: String,

    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub unit_name: String,
    pub unit_type_id: Uuid,
    pub unit_type_name: String,
    pub property_name: String,
    pub property_type_name: String,
    pub city: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub star_rating: u8,
    pub average_rating: f64,
    pub is_featured: bool,

    /// Currency of every price on this result
    pub currency: String,

    /// Average nightly price for the queried stay, or the cheapest cached nightly price
    pub price_per_night: f64,

    /// Total for the queried stay; `None` without dates
    pub total_price: Option<f64>,

    /// Nights in the queried stay
    pub nights: Option<u32>,

    /// Cached nightly range over the lookahead horizon
    pub price_range: PriceRange,

    /// Distance from the search point in kilometres
    pub distance_km: Option<f64>,

    pub next_available_date: Option<NaiveDate>,
    pub main_image: Option<String>,
    pub max_guests: u32,
    pub card_fields: Vec<CardField>,

    /// Originally requested constraints this unit does not satisfy
    pub filter_mismatches: Vec<String>,

    pub listed_at: DateTime<Utc>,
    pub view_count: u64,
    pub booking_count: u64,
}

/// Matched units of one property
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyGroup {
    pub property_id: Uuid,
    pub property_name: String,
    pub property_type_name: String,
    pub city: String,
    pub address: String,
    pub star_rating: u8,
    pub average_rating: f64,
    pub is_featured: bool,
    pub main_image: Option<String>,
    pub distance_km: Option<f64>,
    pub currency: String,

    /// Cheapest nightly price across all matched units, shown or hidden
    pub min_price: f64,
    pub max_price: f64,

    /// Equals `units.len()`
    pub matched_units_count: usize,

    /// Matched units cut by `max_units_per_property`
    pub hidden_units_count: usize,

    pub units: Vec<UnitResult>,

    /// Originally requested constraints no shown unit satisfies
    pub filter_mismatches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchItem {
    Unit(UnitResult),
    Property(PropertyGroup),
}

/// Presentation options taken from the request
#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    pub sort_by: SortBy,
    pub page: u32,
    pub page_size: u32,
    pub group_by_property: bool,
    pub max_units_per_property: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ResultPage {
    pub items: Vec<SearchItem>,
    /// Items (units or groups) before pagination
    pub total_count: usize,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    /// `actual` is what the query ran with; `original` is what the client asked for
    pub fn aggregate(
        &self,
        documents: &[IndexDocument],
        actual: &SearchCriteria,
        original: &SearchCriteria,
        options: PageOptions,
        today: NaiveDate,
    ) -> ResultPage {
        let mut units: Vec<UnitResult> = documents
            .iter()
            .map(|doc| self.unit_result(doc, actual, original, today))
            .collect();
        units.sort_by(|a, b| compare(options.sort_by, a, b));

        let items: Vec<SearchItem> = if options.group_by_property {
            group(units, options.max_units_per_property)
                .into_iter()
                .map(SearchItem::Property)
                .collect()
        } else {
            units.into_iter().map(SearchItem::Unit).collect()
        };

        let total_count = items.len();
        let page_size = options.page_size.max(1) as usize;
        let total_pages = total_count.div_ceil(page_size) as u32;
        let offset = (options.page.max(1) as usize - 1).saturating_mul(page_size);
        let items = items.into_iter().skip(offset).take(page_size).collect();

        ResultPage {
            items,
            total_count,
            total_pages,
        }
    }

    fn unit_result(
        &self,
        doc: &IndexDocument,
        actual: &SearchCriteria,
        original: &SearchCriteria,
        today: NaiveDate,
    ) -> UnitResult {
        let calculator = PriceCalculator::new(
            doc.unit.base_price,
            doc.unit.discount_percentage,
            &doc.pricing_rules,
        );
        let quote = actual
            .dates
            .map(|dates| calculator.quote(dates.check_in, dates.check_out));
        let price_per_night = match quote {
            Some(quote) if quote.nights > 0 => quote.nightly_average,
            _ => doc.pricing.daily.min,
        };

        let origin = actual.geo.or(original.geo);
        let distance_km = origin.map(|geo| {
            round_money(haversine_km(
                geo.latitude,
                geo.longitude,
                doc.location.latitude,
                doc.location.longitude,
            ))
        });

        let periods = AvailabilityPeriodIndex::new(&doc.periods);
        let from = today.max(doc.availability.horizon_start);
        let next_available_date = periods.next_available_date(from, doc.availability.horizon_end);

        UnitResult {
            key: doc.key.clone(),
            property_id: doc.property_id,
            unit_id: doc.unit_id,
            unit_name: doc.unit.name.clone(),
            unit_type_id: doc.unit.unit_type_id,
            unit_type_name: doc.unit.unit_type_name.clone(),
            property_name: doc.property.name.clone(),
            property_type_name: doc.property.property_type_name.clone(),
            city: doc.location.city.clone(),
            address: doc.location.address.clone(),
            latitude: doc.location.latitude,
            longitude: doc.location.longitude,
            star_rating: doc.property.star_rating,
            average_rating: doc.property.average_rating,
            is_featured: doc.property.is_featured,
            currency: doc.pricing.currency.clone(),
            price_per_night,
            total_price: quote.map(|q| q.total),
            nights: quote.map(|q| q.nights),
            price_range: doc.pricing.daily,
            distance_km,
            next_available_date,
            main_image: doc.main_image().map(|image| image.url.clone()),
            max_guests: doc.unit.max_guests,
            card_fields: doc
                .card_fields()
                .map(|(name, field)| CardField {
                    name: name.clone(),
                    display_name: field.display_name.clone(),
                    value: field.value.clone(),
                })
                .collect(),
            filter_mismatches: mismatches(doc, original, distance_km),
            listed_at: doc.unit.listed_at,
            view_count: doc.property.view_count,
            booking_count: doc.property.booking_count,
        }
    }
}

/// Relaxable constraints of `original` the document fails
fn mismatches(doc: &IndexDocument, original: &SearchCriteria, distance_km: Option<f64>) -> Vec<String> {
    let mut failed = Vec::new();

    if let Some(dates) = original.dates {
        let available = AvailabilityPeriodIndex::new(&doc.periods).is_available(
            dates.check_in,
            dates.check_out,
            original.exclude_booking_id,
        );
        if !available {
            failed.push("dates".to_string());
        }
    }
    if let Some(band) = original.price {
        if !doc.pricing.daily.overlaps(band.min, band.max) {
            failed.push("price".to_string());
        }
    }
    let below_stars = original
        .min_star_rating
        .map_or(false, |min| doc.property.star_rating < min);
    let below_rating = original
        .min_average_rating
        .map_or(false, |min| doc.property.average_rating < min);
    if below_stars || below_rating {
        failed.push("rating".to_string());
    }
    let missing_amenity = original.amenity_ids.iter().any(|id| !doc.has_amenity(id))
        || original.service_ids.iter().any(|id| !doc.has_service(id));
    if missing_amenity {
        failed.push("amenities".to_string());
    }
    if let (Some(radius), Some(distance)) = (original.radius_km(), distance_km) {
        if distance > radius {
            failed.push("radius".to_string());
        }
    }
    if let Some(unit_type_id) = original.unit_type_id {
        if doc.unit.unit_type_id != unit_type_id {
            failed.push("unit_type".to_string());
        }
    }

    failed
}

fn compare(sort_by: SortBy, a: &UnitResult, b: &UnitResult) -> Ordering {
    let primary = match sort_by {
        SortBy::Relevance => b
            .is_featured
            .cmp(&a.is_featured)
            .then_with(|| b.average_rating.total_cmp(&a.average_rating))
            .then_with(|| b.star_rating.cmp(&a.star_rating)),
        SortBy::PriceAsc => a.price_per_night.total_cmp(&b.price_per_night),
        SortBy::PriceDesc => b.price_per_night.total_cmp(&a.price_per_night),
        SortBy::Rating => b
            .average_rating
            .total_cmp(&a.average_rating)
            .then_with(|| b.star_rating.cmp(&a.star_rating)),
        SortBy::Distance => match (a.distance_km, b.distance_km) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        SortBy::Newest => b.listed_at.cmp(&a.listed_at),
        SortBy::Popular => b
            .booking_count
            .cmp(&a.booking_count)
            .then_with(|| b.view_count.cmp(&a.view_count)),
    };
    primary.then_with(|| a.key.cmp(&b.key))
}

/// Roll sorted units into properties, ordered by each property's best unit
fn group(units: Vec<UnitResult>, max_units_per_property: Option<u32>) -> Vec<PropertyGroup> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut by_property: HashMap<Uuid, Vec<UnitResult>> = HashMap::new();
    for unit in units {
        let entry = by_property.entry(unit.property_id).or_default();
        if entry.is_empty() {
            order.push(unit.property_id);
        }
        entry.push(unit);
    }

    let limit = max_units_per_property.map_or(usize::MAX, |limit| limit.max(1) as usize);
    order
        .into_iter()
        .filter_map(|property_id| by_property.remove(&property_id))
        .filter_map(|mut matched| {
            let min_price = matched
                .iter()
                .map(|unit| unit.price_per_night)
                .fold(f64::INFINITY, f64::min);
            let max_price = matched
                .iter()
                .map(|unit| unit.price_per_night)
                .fold(f64::NEG_INFINITY, f64::max);
            let hidden_units_count = matched.len().saturating_sub(limit);
            matched.truncate(limit);

            let first = matched.first()?.clone();
            let filter_mismatches: Vec<String> = first
                .filter_mismatches
                .iter()
                .filter(|name| matched.iter().all(|unit| unit.filter_mismatches.contains(name)))
                .cloned()
                .collect();
            let distance_km = matched
                .iter()
                .filter_map(|unit| unit.distance_km)
                .min_by(|a, b| a.total_cmp(b));
            let main_image = matched.iter().find_map(|unit| unit.main_image.clone());

            Some(PropertyGroup {
                property_id: first.property_id,
                property_name: first.property_name,
                property_type_name: first.property_type_name,
                city: first.city,
                address: first.address,
                star_rating: first.star_rating,
                average_rating: first.average_rating,
                is_featured: first.is_featured,
                main_image,
                distance_km,
                currency: first.currency,
                min_price,
                max_price,
                matched_units_count: matched.len(),
                hidden_units_count,
                units: matched,
                filter_mismatches,
            })
        })
        .collect()
}
