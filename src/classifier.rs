//! Calendar classification of file names.
//!
//! Three name rules are tried in a fixed order, first match wins:
//!
//! 1. a separated date, `YYYY-MM-DD` or `YYYY_MM_DD`
//! 2. a compact date, `YYYYMMDD`, optionally prefixed with `D`
//! 3. the province PDF convention `XX-NN-YYYY-SEQ.pdf` (year only, 2 or 4 digits)
//!
//! Anything the rules cannot place falls back to the file's modified time.

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

static SEPARATED_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-_](\d{2})[-_](\d{2})").expect("valid separated date pattern"));
static COMPACT_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"D?(\d{4})(\d{2})(\d{2})").expect("valid compact date pattern"));
static PROVINCE_PDF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}-\d{2}-(\d{2,4})-\d+\.pdf$").expect("valid province pattern"));
static TRAILING_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+$").expect("valid pattern"));
static LEADING_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_]+").expect("valid pattern"));
static REPEATED_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]{2,}").expect("valid pattern"));

/// Group key used when every extension and date has been stripped away.
pub const NO_NAME_GROUP: &str = "noname";

/// The `(year, month)` a file belongs to.
///
/// `year` is four digits, `month` always `01`..=`12`: a name that only
/// carries a year has its month filled in before a bucket is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CalendarBucket {
    pub year: String,
    pub month: String,
}

impl CalendarBucket {
    fn from_parts(year: i32, month: u32) -> Self {
        Self {
            year: format!("{:04}", year),
            month: format!("{:02}", month),
        }
    }

    fn from_date(date: NaiveDate) -> Self {
        Self::from_parts(date.year(), date.month())
    }
}

/// What a file name says about its date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameDate {
    YearMonth(i32, u32),
    /// Month unresolved; only the province rule produces this.
    Year(i32),
}

fn number<T: std::str::FromStr>(captures: &Captures<'_>, group: usize) -> Option<T> {
    captures.get(group)?.as_str().parse().ok()
}

fn valid_year_month(year: i32, month: u32) -> bool {
    (1900..=2100).contains(&year) && (1..=12).contains(&month)
}

fn date_from_name(file_name: &str) -> Option<NameDate> {
    if let Some(captures) = SEPARATED_DATE.captures(file_name) {
        let year: i32 = number(&captures, 1)?;
        let month: u32 = number(&captures, 2)?;
        if valid_year_month(year, month) {
            return Some(NameDate::YearMonth(year, month));
        }
    }

    if let Some(captures) = COMPACT_DATE.captures(file_name) {
        let year: i32 = number(&captures, 1)?;
        let month: u32 = number(&captures, 2)?;
        let day: u32 = number(&captures, 3)?;
        if valid_year_month(year, month) && (1..=31).contains(&day) {
            return Some(NameDate::YearMonth(year, month));
        }
    }

    if let Some(captures) = PROVINCE_PDF.captures(file_name) {
        let digits = captures.get(1)?.as_str();
        let mut year: i32 = digits.parse().ok()?;
        if digits.len() == 2 {
            year += 2000;
        }
        if (2000..=2100).contains(&year) {
            return Some(NameDate::Year(year));
        }
    }

    None
}

/// Classifies a file into its calendar bucket, using today's local date as
/// the last resort.
pub fn classify(file_name: &str, modified_time: Option<DateTime<Utc>>) -> CalendarBucket {
    classify_at(file_name, modified_time, Local::now().date_naive())
}

/// Same as [`classify`] with an explicit "today" for the no-metadata fallback.
pub fn classify_at(file_name: &str, modified_time: Option<DateTime<Utc>>, today: NaiveDate) -> CalendarBucket {
    let fallback = modified_time
        .map(|time| time.with_timezone(&Local).date_naive())
        .unwrap_or(today);

    match date_from_name(file_name) {
        Some(NameDate::YearMonth(year, month)) => {
            debug!("Date taken from name \"{}\": {:04}/{:02}", file_name, year, month);
            CalendarBucket::from_parts(year, month)
        }
        Some(NameDate::Year(year)) => {
            debug!(
                "\"{}\": year {} from name, month {:02} from fallback date",
                file_name,
                year,
                fallback.month()
            );
            CalendarBucket::from_parts(year, fallback.month())
        }
        None => {
            debug!("\"{}\" has no date in its name, using {}", file_name, fallback);
            CalendarBucket::from_date(fallback)
        }
    }
}

/// Replaces every recognised date shape with a placeholder, so names can be
/// counted by pattern.
pub fn normalize_for_report(file_name: &str) -> String {
    let result = SEPARATED_DATE.replace_all(file_name, "YYYY-MM-DD");
    let result = COMPACT_DATE.replace_all(&result, "YYYYMMDD");
    PROVINCE_PDF
        .replace_all(&result, "XX-NN-YYYY-SEQ.pdf")
        .into_owned()
}

/// Key under which files are archived together: the name with all
/// extensions and embedded dates removed.
pub fn archive_group_key(file_name: &str) -> String {
    let mut stem = file_name;
    while let Some(dot) = stem.rfind('.') {
        stem = &stem[..dot];
    }

    let result = SEPARATED_DATE.replace_all(stem, "");
    let result = COMPACT_DATE.replace_all(&result, "");
    let result = TRAILING_SEPARATORS.replace_all(&result, "");
    let result = LEADING_SEPARATORS.replace_all(&result, "");
    let result = REPEATED_SEPARATORS.replace_all(&result, "-");

    if result.is_empty() {
        NO_NAME_GROUP.to_string()
    } else {
        result.into_owned()
    }
}

/// The full `YYYYMMDD` date embedded in a name by the separated or compact rule.
pub fn compact_date(file_name: &str) -> Option<String> {
    let full_date = |captures: Captures<'_>| -> Option<String> {
        let year: i32 = number(&captures, 1)?;
        let month: u32 = number(&captures, 2)?;
        let day: u32 = number(&captures, 3)?;
        (valid_year_month(year, month) && (1..=31).contains(&day))
            .then(|| format!("{}{}{}", &captures[1], &captures[2], &captures[3]))
    };

    SEPARATED_DATE
        .captures(file_name)
        .and_then(full_date)
        .or_else(|| COMPACT_DATE.captures(file_name).and_then(full_date))
}
