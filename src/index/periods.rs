//! Availability period index
//!
//! A unit's calendar is stored as a sorted list of non-overlapping [`Period`]s.
//! Because the list never overlaps, period ends are sorted too, which lets an
//! overlap query binary-search to the first relevant period and stop as soon as
//! a period starts after the requested check-out.

use crate::index::document::Period;
use crate::models::{CalendarEntry, PeriodStatus};
use chrono::{Duration, NaiveDate};
use uuid::Uuid;

/// Merge raw calendar entries into the canonical period list.
///
/// Occupied entries win over the implicit available default; where occupied
/// entries overlap, booked beats blocked and the earlier-starting entry keeps its
/// booking id. The losing entries stay on the period so that excluding one
/// booking never uncovers another hold. Available gaps are only materialized
/// inside the horizon.
pub fn merge_calendar(
    entries: &[CalendarEntry],
    horizon_start: NaiveDate,
    horizon_end: NaiveDate,
) -> Vec<Period> {
    let occupied: Vec<&CalendarEntry> = entries
        .iter()
        .filter(|entry| entry.status.is_occupied() && entry.start_date < entry.end_date)
        .collect();

    let mut boundaries: Vec<NaiveDate> = Vec::with_capacity(occupied.len() * 2 + 2);
    if horizon_start < horizon_end {
        boundaries.push(horizon_start);
        boundaries.push(horizon_end);
    }
    for entry in &occupied {
        boundaries.push(entry.start_date);
        boundaries.push(entry.end_date);
    }
    boundaries.sort();
    boundaries.dedup();

    let mut periods: Vec<Period> = Vec::new();
    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);

        // Every entry endpoint is a boundary, so an entry covers a segment fully or not at all
        let covering: Vec<&CalendarEntry> = occupied
            .iter()
            .copied()
            .filter(|entry| entry.start_date <= start && entry.end_date >= end)
            .collect();
        let winner = covering.iter().copied().enumerate().max_by(|(_, a), (_, b)| {
            a.status
                .precedence()
                .cmp(&b.status.precedence())
                .then_with(|| b.start_date.cmp(&a.start_date))
                .then_with(|| b.booking_id.cmp(&a.booking_id))
        });

        let segment = match winner {
            Some((position, entry)) => Period {
                start,
                end,
                status: entry.status,
                booking_id: entry.booking_id,
                shadowed: covering
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != position)
                    .map(|(_, held)| held.booking_id)
                    .collect(),
            },
            None if start >= horizon_start && end <= horizon_end => Period {
                start,
                end,
                status: PeriodStatus::Available,
                booking_id: None,
                shadowed: Vec::new(),
            },
            None => continue,
        };

        match periods.last_mut() {
            Some(last)
                if last.end == segment.start
                    && last.status == segment.status
                    && last.booking_id == segment.booking_id
                    && last.shadowed == segment.shadowed =>
            {
                last.end = segment.end;
            }
            _ => periods.push(segment),
        }
    }

    periods
}

/// Read-only view answering availability questions over a sorted period list
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityPeriodIndex<'a> {
    periods: &'a [Period],
}

impl<'a> AvailabilityPeriodIndex<'a> {
    pub fn new(periods: &'a [Period]) -> Self {
        debug_assert!(periods.windows(2).all(|pair| pair[0].end <= pair[1].start));
        Self { periods }
    }

    /// Periods that intersect `[check_in, check_out)`, in order
    pub fn overlapping(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> impl Iterator<Item = &'a Period> + 'a {
        let first = self.periods.partition_point(|period| period.end <= check_in);
        self.periods[first..]
            .iter()
            .take_while(move |period| period.start < check_out)
    }

    /// First booked/blocked period blocking the stay, honouring self-exclusion
    pub fn first_conflict(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude_booking_id: Option<Uuid>,
    ) -> Option<&'a Period> {
        self.overlapping(check_in, check_out).find(|period| {
            period.status.is_occupied()
                && !exclude_booking_id.map_or(false, |booking| period.freed_by(booking))
        })
    }

    pub fn is_available(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude_booking_id: Option<Uuid>,
    ) -> bool {
        check_in < check_out
            && self
                .first_conflict(check_in, check_out, exclude_booking_id)
                .is_none()
    }

    /// Earliest free day in `[from, until)`
    pub fn next_available_date(&self, from: NaiveDate, until: NaiveDate) -> Option<NaiveDate> {
        let mut candidate = from;
        for period in self.overlapping(from, until) {
            if !period.status.is_occupied() {
                continue;
            }
            if period.start > candidate {
                break;
            }
            candidate = candidate.max(period.end);
        }
        (candidate < until).then_some(candidate)
    }

    /// Number of free days in `[start, end)`
    pub fn available_days(&self, start: NaiveDate, end: NaiveDate) -> u32 {
        if start >= end {
            return 0;
        }
        let total = (end - start).num_days();
        let occupied: i64 = self
            .overlapping(start, end)
            .filter(|period| period.status.is_occupied())
            .map(|period| (period.end.min(end) - period.start.max(start)).num_days())
            .sum();
        (total - occupied).max(0) as u32
    }
}

/// Horizon end for a build date
pub fn horizon_end(horizon_start: NaiveDate, horizon_days: u32) -> NaiveDate {
    horizon_start + Duration::days(horizon_days as i64)
}
