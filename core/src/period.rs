//! Reporting period: always the prior full calendar month.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportPeriod {
    pub from: NaiveDate,
    pub to:   NaiveDate,
}

impl ReportPeriod {
    /// The calendar month before the one containing `today`.
    pub fn previous_month(today: NaiveDate) -> Self {
        let first_of_this_month = today.with_day(1).unwrap_or(today);
        let to = first_of_this_month - Duration::days(1);
        let from = to.with_day(1).unwrap_or(to);
        Self { from, to }
    }

    pub fn from_param(&self) -> String {
        self.from.format("%Y-%m-%d").to_string()
    }

    pub fn to_param(&self) -> String {
        self.to.format("%Y-%m-%d").to_string()
    }

    /// e.g. "September 2026"
    pub fn month_name(&self) -> String {
        self.to.format("%B %Y").to_string()
    }

    /// e.g. "202609"
    pub fn yyyymm(&self) -> String {
        self.to.format("%Y%m").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn previous_month_spans_the_full_prior_month() {
        let p = ReportPeriod::previous_month(date(2026, 10, 16));
        assert_eq!(p.from, date(2026, 9, 1));
        assert_eq!(p.to, date(2026, 9, 30));
        assert_eq!(p.month_name(), "September 2026");
        assert_eq!(p.yyyymm(), "202609");
    }

    #[test]
    fn january_rolls_back_to_december_of_prior_year() {
        let p = ReportPeriod::previous_month(date(2027, 1, 1));
        assert_eq!(p.from, date(2026, 12, 1));
        assert_eq!(p.to, date(2026, 12, 31));
    }

    #[test]
    fn leap_february_ends_on_the_29th() {
        let p = ReportPeriod::previous_month(date(2028, 3, 31));
        assert_eq!(p.to, date(2028, 2, 29));
        assert_eq!(p.from_param(), "2028-02-01");
        assert_eq!(p.to_param(), "2028-02-29");
    }
}
