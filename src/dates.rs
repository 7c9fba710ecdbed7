//! Deterministic date-expression parser shared by the Jira and Salesforce tools.
//!
//! Accepts relative keywords (`today`, `last month`, ...), shorthands
//! (`-3d`, `-2w`, `-1m`, `-1q`, `-1y`), durations (`past 2 quarters`,
//! `updated 3 weeks ago`) and a fixed list of absolute formats. All relative
//! expressions resolve against a caller-supplied "today" so the result is
//! reproducible in tests.
//!
//! Durations count fixed days: a week is 7, a month 30, a quarter 90, and
//! a year 365.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use regex::Regex;
use thiserror::Error;

/// Absolute formats, tried in order. Day-first wins for ambiguous `dd/mm` input.
const KNOWN_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

static SHORTHAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-(\d+)([dwmqy])$").expect("valid shorthand regex"));

/// `[created|updated ...] [last|past|previous] [N] <unit>[s] [ago]`.
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:created|updated|changed|modified)\s+)?(?:(last|past|previous|in the last|in the past)\s+)?(?:(\d+|an?|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve)\s+)?(day|week|month|quarter|year)s?(\s+ago)?$",
    )
    .expect("valid duration regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unrecognized date format: '{input}'")]
pub struct UnrecognizedDate {
    pub input: String,
}

/// A parsed expression: the start date plus, for relative input, the
/// equivalent SOQL date literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDate {
    pub date: NaiveDate,
    pub soql_literal: Option<String>,
}

impl ResolvedDate {
    fn absolute(date: NaiveDate) -> Self {
        Self {
            date,
            soql_literal: None,
        }
    }

    fn relative(date: NaiveDate, literal: impl Into<String>) -> Self {
        Self {
            date,
            soql_literal: Some(literal.into()),
        }
    }

    /// `YYYY-MM-DD`.
    pub fn iso_date(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `YYYY-MM-DDT00:00:00Z`, the SOQL datetime form.
    pub fn iso_datetime(&self) -> String {
        format!("{}T00:00:00Z", self.iso_date())
    }
}

/// Today's date in UTC.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Resolve `input` relative to `today`.
pub fn resolve(input: &str, today: NaiveDate) -> Result<ResolvedDate, UnrecognizedDate> {
    let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

    if let Some(resolved) = keyword(&normalized, today) {
        return Ok(resolved);
    }

    let unrecognized = || UnrecognizedDate {
        input: normalized.clone(),
    };

    if let Some(caps) = SHORTHAND_RE.captures(&normalized) {
        let amount: i64 = caps[1].parse().map_err(|_| unrecognized())?;
        let per_unit = match &caps[2] {
            "d" => 1,
            "w" => 7,
            "m" => 30,
            "q" => 90,
            _ => 365,
        };
        return days_back(amount, per_unit, today).ok_or_else(unrecognized);
    }

    if let Some(caps) = DURATION_RE.captures(&normalized) {
        let anchored = caps.get(1).is_some() || caps.get(4).is_some();
        if !anchored {
            return Err(unrecognized());
        }
        let amount = match caps.get(2).map(|m| m.as_str()) {
            None => 1,
            Some(word) => word_amount(word)
                .or_else(|| word.parse().ok())
                .ok_or_else(unrecognized)?,
        };
        let per_unit = match &caps[3] {
            "day" => 1,
            "week" => 7,
            "month" => 30,
            "quarter" => 90,
            _ => 365,
        };
        return days_back(amount, per_unit, today).ok_or_else(unrecognized);
    }

    KNOWN_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&normalized, fmt).ok())
        .map(ResolvedDate::absolute)
        .ok_or(UnrecognizedDate { input: normalized })
}

/// `amount * per_unit` days before `today`, as a `LAST_N_DAYS` literal.
fn days_back(amount: i64, per_unit: i64, today: NaiveDate) -> Option<ResolvedDate> {
    let date = amount
        .checked_mul(per_unit)
        .and_then(Duration::try_days)
        .and_then(|d| today.checked_sub_signed(d))?;
    let days = (today - date).num_days();
    Some(ResolvedDate::relative(date, format!("LAST_N_DAYS:{days}")))
}

fn word_amount(word: &str) -> Option<i64> {
    let n = match word {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        _ => return None,
    };
    Some(n)
}

fn keyword(input: &str, today: NaiveDate) -> Option<ResolvedDate> {
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let first_of_month = today.with_day(1)?;
    let resolved = match input {
        "today" | "now" => ResolvedDate::relative(today, "TODAY"),
        "yesterday" => ResolvedDate::relative(today.pred_opt()?, "YESTERDAY"),
        "this week" => ResolvedDate::relative(monday, "THIS_WEEK"),
        "last week" => ResolvedDate::relative(monday - Duration::days(7), "LAST_WEEK"),
        "this month" => ResolvedDate::relative(first_of_month, "THIS_MONTH"),
        "last month" => {
            let prev = first_of_month.pred_opt()?.with_day(1)?;
            ResolvedDate::relative(prev, "LAST_MONTH")
        }
        "this quarter" => ResolvedDate::relative(quarter_start(today)?, "THIS_QUARTER"),
        "last quarter" => {
            let prev = quarter_start(today)?.pred_opt()?;
            ResolvedDate::relative(quarter_start(prev)?, "LAST_QUARTER")
        }
        "this year" => ResolvedDate::relative(NaiveDate::from_ymd_opt(today.year(), 1, 1)?, "THIS_YEAR"),
        "last year" => {
            ResolvedDate::relative(NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?, "LAST_YEAR")
        }
        _ => return None,
    };
    Some(resolved)
}

/// First day of the calendar quarter containing `date`.
fn quarter_start(date: NaiveDate) -> Option<NaiveDate> {
    let month = (date.month0() / 3) * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1)
}
