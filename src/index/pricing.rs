//! Nightly price resolution from pricing rules

use crate::index::document::{PriceRange, PricingSummary};
use crate::models::PricingRule;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

const WEEK_NIGHTS: u32 = 7;
const MONTH_NIGHTS: u32 = 30;

/// Nights priced at the weekend rate
pub fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Fri | Weekday::Sat)
}

pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Price of a stay over `[check_in, check_out)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StayQuote {
    pub nights: u32,
    pub total: f64,
    pub nightly_average: f64,
}

/// Resolves prices for one unit
#[derive(Debug, Clone, Copy)]
pub struct PriceCalculator<'a> {
    base_price: f64,
    discount_percentage: f64,
    rules: &'a [PricingRule],
}

impl<'a> PriceCalculator<'a> {
    pub fn new(base_price: f64, discount_percentage: f64, rules: &'a [PricingRule]) -> Self {
        Self {
            base_price,
            discount_percentage: discount_percentage.clamp(0.0, 100.0),
            rules,
        }
    }

    /// Most specific rule covering `day`: latest start, then shortest span
    pub fn rule_for(&self, day: NaiveDate) -> Option<&'a PricingRule> {
        self.rules
            .iter()
            .filter(|rule| rule.start_date <= day && day < rule.end_date)
            .max_by(|a, b| {
                a.start_date
                    .cmp(&b.start_date)
                    .then_with(|| b.end_date.cmp(&a.end_date))
                    .then_with(|| b.id.cmp(&a.id))
            })
    }

    /// Price of the night starting on `day` within a stay of `stay_nights`
    pub fn nightly_price(&self, day: NaiveDate, stay_nights: u32) -> f64 {
        let gross = match self.rule_for(day) {
            Some(rule) => {
                if stay_nights >= MONTH_NIGHTS {
                    if let Some(monthly) = rule.monthly_price {
                        return self.discounted(monthly / MONTH_NIGHTS as f64);
                    }
                }
                if stay_nights >= WEEK_NIGHTS {
                    if let Some(weekly) = rule.weekly_price {
                        return self.discounted(weekly / WEEK_NIGHTS as f64);
                    }
                }
                match rule.weekend_price {
                    Some(weekend) if is_weekend(day) => weekend,
                    _ => rule.base_price,
                }
            }
            None => self.base_price,
        };
        self.discounted(gross)
    }

    fn discounted(&self, price: f64) -> f64 {
        price * (1.0 - self.discount_percentage / 100.0)
    }

    pub fn quote(&self, check_in: NaiveDate, check_out: NaiveDate) -> StayQuote {
        let nights = (check_out - check_in).num_days().max(0) as u32;
        let total: f64 = (0..nights)
            .map(|offset| self.nightly_price(check_in + Duration::days(offset as i64), nights))
            .sum();
        StayQuote {
            nights,
            total: round_money(total),
            nightly_average: if nights == 0 {
                0.0
            } else {
                round_money(total / nights as f64)
            },
        }
    }

    /// Cached daily/weekly/monthly ranges over the lookahead horizon
    pub fn summarize(&self, currency: &str, horizon_start: NaiveDate, horizon_days: u32) -> PricingSummary {
        let base = round_money(self.discounted(self.base_price));
        if horizon_days == 0 {
            return PricingSummary {
                currency: currency.to_string(),
                daily: PriceRange::single(base),
                weekly: PriceRange::single(round_money(base * WEEK_NIGHTS as f64)),
                monthly: PriceRange::single(round_money(base * MONTH_NIGHTS as f64)),
                average_per_night: base,
            };
        }

        let mut daily: Option<PriceRange> = None;
        let mut weekly: Option<PriceRange> = None;
        let mut monthly: Option<PriceRange> = None;
        let mut sum = 0.0;

        for offset in 0..horizon_days {
            let day = horizon_start + Duration::days(offset as i64);
            let night = round_money(self.nightly_price(day, 1));
            let week = round_money(self.nightly_price(day, WEEK_NIGHTS) * WEEK_NIGHTS as f64);
            let month = round_money(self.nightly_price(day, MONTH_NIGHTS) * MONTH_NIGHTS as f64);
            sum += night;

            for (slot, price) in [(&mut daily, night), (&mut weekly, week), (&mut monthly, month)] {
                let range = match slot.take() {
                    Some(mut range) => {
                        range.include(price);
                        range
                    }
                    None => PriceRange::single(price),
                };
                *slot = Some(range);
            }
        }

        PricingSummary {
            currency: currency.to_string(),
            daily: daily.unwrap_or_else(|| PriceRange::single(base)),
            weekly: weekly.unwrap_or_else(|| PriceRange::single(base * WEEK_NIGHTS as f64)),
            monthly: monthly.unwrap_or_else(|| PriceRange::single(base * MONTH_NIGHTS as f64)),
            average_per_night: round_money(sum / horizon_days as f64),
        }
    }
}
