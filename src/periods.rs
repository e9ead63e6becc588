use chrono::{Datelike, NaiveDate};

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june",
    "july", "august", "september", "october", "november", "december",
];
const FIRST_YEAR: i32 = 2015;

/// One monthly listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub url: String,
    pub label: String,
    /// Token a correctly loaded page echoes in its URL or title.
    pub marker: String,
}

/// Newest first: this year's months back to January, then every earlier
/// year December → January, down to the first listed year.
pub fn all_periods(base_url: &str, today: NaiveDate) -> Vec<Period> {
    let base = base_url.trim_end_matches('/');
    let mut periods = Vec::new();

    for m in (1..=today.month() as usize).rev() {
        let month = MONTHS[m - 1];
        periods.push(Period {
            url: format!("{}/period/{}/", base, month),
            label: format!("{} {}", capitalize(month), today.year()),
            marker: month.to_string(),
        });
    }

    for year in (FIRST_YEAR..today.year()).rev() {
        for m in (1..=12).rev() {
            let month = MONTHS[m - 1];
            periods.push(Period {
                url: format!("{}/period/{}-{}/", base, month, year),
                label: format!("{} {}", capitalize(month), year),
                marker: year.to_string(),
            });
        }
    }

    periods
}

/// `start` is 1-indexed, like the CLI flag.
pub fn select(periods: Vec<Period>, start: usize, max: Option<usize>) -> Vec<Period> {
    let skip = start.saturating_sub(1);
    let rest = periods.into_iter().skip(skip);
    match max {
        Some(n) => rest.take(n).collect(),
        None => rest.collect(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
