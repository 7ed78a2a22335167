//! Billing periods.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A calendar month (UTC), inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl BillingPeriod {
    /// The month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        let next_month_start = if start.month() == 12 {
            NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
        };
        let end = next_month_start
            .map(|next| next - Duration::days(1))
            .unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// The period immediately after this one.
    pub fn next(&self) -> Self {
        Self::containing(self.end + Duration::days(1))
    }

    /// Every day in the period, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format("%Y-%m"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn containing_spans_calendar_month() {
        let period = BillingPeriod::containing(date(2024, 2, 17));
        assert_eq!(period.start(), date(2024, 2, 1));
        assert_eq!(period.end(), date(2024, 2, 29));
        assert_eq!(period.days().count(), 29);
    }

    #[test]
    fn december_rolls_into_next_year() {
        let period = BillingPeriod::containing(date(2023, 12, 5));
        assert_eq!(period.end(), date(2023, 12, 31));
        assert_eq!(period.next().start(), date(2024, 1, 1));
    }

    #[test]
    fn contains_is_inclusive() {
        let period = BillingPeriod::containing(date(2024, 4, 1));
        assert!(period.contains(date(2024, 4, 1)));
        assert!(period.contains(date(2024, 4, 30)));
        assert!(!period.contains(date(2024, 5, 1)));
        assert_eq!(period.to_string(), "2024-04");
    }
}
