// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Natural-language search filters
//!
//! Pulls date ranges ("last week", "previous thursday", "3 days ago",
//! "january 3, 2023") and file types ("pdfs", "photos") out of a search
//! query, leaving the remaining words as free text.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFilter {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
    Specific(NaiveDate),
}

impl fmt::Display for DateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateFilter::Today => write!(f, "Today"),
            DateFilter::Yesterday => write!(f, "Yesterday"),
            DateFilter::ThisWeek => write!(f, "This Week"),
            DateFilter::LastWeek => write!(f, "Last 7 Days"),
            DateFilter::ThisMonth => write!(f, "This Month"),
            DateFilter::LastMonth => write!(f, "Last 30 Days"),
            DateFilter::ThisYear => write!(f, "This Year"),
            DateFilter::LastYear => write!(f, "Last Year"),
            DateFilter::Specific(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFilter {
    Images,
    Documents,
    Pdfs,
    Videos,
    Audio,
    Code,
}

impl TypeFilter {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            TypeFilter::Images => &[
                ".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".ico", ".svg", ".heic", ".heif",
                ".avif", ".raw", ".cr2", ".nef", ".arw",
            ],
            TypeFilter::Documents => &[".doc", ".docx", ".txt", ".rtf", ".odt", ".md", ".tex"],
            TypeFilter::Pdfs => &[".pdf"],
            TypeFilter::Videos => &[".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v"],
            TypeFilter::Audio => &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma", ".m4a"],
            TypeFilter::Code => &[
                ".py", ".js", ".ts", ".html", ".css", ".java", ".cpp", ".c", ".h", ".cs", ".go",
                ".rs", ".rb", ".php", ".swift", ".kt",
            ],
        }
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeFilter::Images => "Images",
            TypeFilter::Documents => "Documents",
            TypeFilter::Pdfs => "PDFs",
            TypeFilter::Videos => "Videos",
            TypeFilter::Audio => "Audio",
            TypeFilter::Code => "Code",
        };
        f.write_str(name)
    }
}

/// A search query split into free text and filters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedQuery {
    pub clean_query: String,
    pub date_filter: Option<DateFilter>,
    /// Half-open `[start, end)` range
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub type_filter: Option<TypeFilter>,
    pub extensions: Option<Vec<String>>,
    pub specific_date: Option<NaiveDate>,
}

impl ParsedQuery {
    /// A free-text query with no filters
    pub fn plain(text: &str) -> Self {
        Self {
            clean_query: text.to_string(),
            date_filter: None,
            date_range: None,
            type_filter: None,
            extensions: None,
            specific_date: None,
        }
    }

    pub fn has_filters(&self) -> bool {
        self.date_filter.is_some() || self.type_filter.is_some()
    }
}

const DATE_PATTERNS: &[(&str, DateFilter)] = &[
    (r"\btoday\b", DateFilter::Today),
    (r"\bthis day\b", DateFilter::Today),
    (r"\byesterday\b", DateFilter::Yesterday),
    (r"\bthis week\b", DateFilter::ThisWeek),
    (r"\blast week\b", DateFilter::LastWeek),
    (r"\bpast week\b", DateFilter::LastWeek),
    (r"\bpast 7 days\b", DateFilter::LastWeek),
    (r"\blast 7 days\b", DateFilter::LastWeek),
    (r"\bthis month\b", DateFilter::ThisMonth),
    (r"\blast month\b", DateFilter::LastMonth),
    (r"\bpast month\b", DateFilter::LastMonth),
    (r"\bpast 30 days\b", DateFilter::LastMonth),
    (r"\blast 30 days\b", DateFilter::LastMonth),
    (r"\bthis year\b", DateFilter::ThisYear),
    (r"\blast year\b", DateFilter::LastYear),
];

const TYPE_PATTERNS: &[(&str, TypeFilter)] = &[
    (r"\bimages?\b", TypeFilter::Images),
    (r"\bphotos?\b", TypeFilter::Images),
    (r"\bpictures?\b", TypeFilter::Images),
    (r"\bscreenshots?\b", TypeFilter::Images),
    (r"\bthumbnails?\b", TypeFilter::Images),
    (r"\bjpe?gs?\b", TypeFilter::Images),
    (r"\bpngs?\b", TypeFilter::Images),
    (r"\bgifs?\b", TypeFilter::Images),
    (r"\bwebps?\b", TypeFilter::Images),
    (r"\bdocuments?\b", TypeFilter::Documents),
    (r"\bdocs?\b", TypeFilter::Documents),
    (r"\bword\b", TypeFilter::Documents),
    (r"\bdocx?\b", TypeFilter::Documents),
    (r"\btexts?\b", TypeFilter::Documents),
    (r"\btxt\b", TypeFilter::Documents),
    (r"\bpdf files?\b", TypeFilter::Pdfs),
    (r"\bpdfs?\b", TypeFilter::Pdfs),
    (r"\bvideos?\b", TypeFilter::Videos),
    (r"\bmovies?\b", TypeFilter::Videos),
    (r"\bmp4s?\b", TypeFilter::Videos),
    (r"\bmkvs?\b", TypeFilter::Videos),
    (r"\bavis?\b", TypeFilter::Videos),
    (r"\baudios?\b", TypeFilter::Audio),
    (r"\bmusic\b", TypeFilter::Audio),
    (r"\bsongs?\b", TypeFilter::Audio),
    (r"\bmp3s?\b", TypeFilter::Audio),
    (r"\bwavs?\b", TypeFilter::Audio),
    (r"\bcode\b", TypeFilter::Code),
    (r"\bscripts?\b", TypeFilter::Code),
    (r"\bpython\b", TypeFilter::Code),
    (r"\bjavascript\b", TypeFilter::Code),
    (r"\bhtml\b", TypeFilter::Code),
    (r"\bcss\b", TypeFilter::Code),
];

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

const MONTH_ALT: &str = "january|february|march|april|may|june|july|august|september|october|november|december";

struct Patterns {
    dates: Vec<(Regex, DateFilter)>,
    types: Vec<(Regex, TypeFilter)>,
    weekday: Regex,
    ago: Regex,
    iso_date: Regex,
    month_first: Regex,
    day_first: Regex,
    stopwords: Regex,
    spaces: Regex,
}

fn build(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                dates: DATE_PATTERNS.iter().filter_map(|(p, f)| Some((build(p)?, *f))).collect(),
                types: TYPE_PATTERNS.iter().filter_map(|(p, f)| Some((build(p)?, *f))).collect(),
                weekday: build(
                    r"\b(last|previous|this|next)\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
                )?,
                ago: build(r"\b(\d+)\s+(days?|weeks?|months?|years?)\s+ago\b")?,
                iso_date: build(r"\b(\d{4})[/\-.](\d{1,2})[/\-.](\d{1,2})\b")?,
                month_first: build(&format!(
                    r"\b({})\s+(\d{{1,2}})(?:st|nd|rd|th)?(?:\s*,?\s*(\d{{4}}))?\b",
                    MONTH_ALT
                ))?,
                day_first: build(&format!(
                    r"\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({})(?:\s*,?\s*(\d{{4}}))?\b",
                    MONTH_ALT
                ))?,
                stopwords: build(r"\b(i|the|a|an|my|from|created|made|that|which|were|was|in|on)\b")?,
                spaces: build(r"\s+")?,
            })
        })
        .as_ref()
}

fn weekday_index(name: &str) -> Option<i64> {
    ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"]
        .iter()
        .position(|d| *d == name)
        .map(|i| i as i64)
}

fn month_index(name: &str) -> Option<u32> {
    MONTHS.iter().position(|m| *m == name).map(|i| i as u32 + 1)
}

/// The date `modifier day_name` refers to, relative to `today`
pub fn calculate_day_date(modifier: &str, day_name: &str, today: NaiveDate) -> Option<NaiveDate> {
    let target = weekday_index(&day_name.to_lowercase())?;
    let current = today.weekday().num_days_from_monday() as i64;

    let offset = match modifier.to_lowercase().as_str() {
        "last" | "previous" => {
            let days_ago = (current - target).rem_euclid(7);
            -(if days_ago == 0 { 7 } else { days_ago })
        }
        "this" => target - current,
        "next" => {
            let diff = target - current;
            if diff <= 0 { diff + 7 } else { diff }
        }
        _ => return None,
    };
    Some(today + Duration::days(offset))
}

fn simple_range(filter: DateFilter, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let today = now.date();
    let start_of = |d: NaiveDate| d.and_hms_opt(0, 0, 0).unwrap_or(now);
    let today_start = start_of(today);

    match filter {
        DateFilter::Today => (today_start, now),
        DateFilter::Yesterday => (today_start - Duration::days(1), today_start),
        DateFilter::ThisWeek => (
            today_start - Duration::days(today.weekday().num_days_from_monday() as i64),
            now,
        ),
        DateFilter::LastWeek => (today_start - Duration::days(7), now),
        DateFilter::ThisMonth => (start_of(today.with_day(1).unwrap_or(today)), now),
        DateFilter::LastMonth => (today_start - Duration::days(30), now),
        DateFilter::ThisYear => (start_of(today.with_ordinal(1).unwrap_or(today)), now),
        DateFilter::LastYear => (today_start - Duration::days(365), now),
        DateFilter::Specific(date) => {
            let start = start_of(date);
            (start, start + Duration::days(1))
        }
    }
}

/// Most recent past occurrence of `month`/`day` when no year is given
fn resolve_year(month: u32, day: u32, year: Option<i32>, today: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year > today {
                NaiveDate::from_ymd_opt(today.year() - 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

/// A single-day expression and the text it matched
fn parse_complex_date(p: &Patterns, query: &str, today: NaiveDate) -> Option<(NaiveDate, String)> {
    if let Some(caps) = p.weekday.captures(query) {
        debug!("Found day pattern: {}", &caps[0]);
        if let Some(date) = calculate_day_date(&caps[1], &caps[2], today) {
            return Some((date, caps[0].to_string()));
        }
    }

    if let Some(caps) = p.ago.captures(query) {
        let amount: i64 = caps[1].parse().ok()?;
        let per_unit = match caps[2].trim_end_matches('s') {
            "day" => 1,
            "week" => 7,
            "month" => 30,
            "year" => 365,
            _ => return None,
        };
        debug!("Found ago pattern: {}", &caps[0]);
        // Out of range amounts mean no date filter
        let date = amount
            .checked_mul(per_unit)
            .and_then(Duration::try_days)
            .and_then(|offset| today.checked_sub_signed(offset))?;
        return Some((date, caps[0].to_string()));
    }

    if let Some(caps) = p.iso_date.captures(query) {
        let date = NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?);
        if let Some(date) = date {
            return Some((date, caps[0].to_string()));
        }
    }

    let named = p
        .month_first
        .captures(query)
        .and_then(|c| Some((month_index(&c[1])?, c[2].parse::<u32>().ok()?, c.get(3), c.get(0)?)))
        .or_else(|| {
            p.day_first
                .captures(query)
                .and_then(|c| Some((month_index(&c[2])?, c[1].parse::<u32>().ok()?, c.get(3), c.get(0)?)))
        });
    if let Some((month, day, year, whole)) = named {
        let year = year.and_then(|y| y.as_str().parse().ok());
        if let Some(date) = resolve_year(month, day, year, today) {
            return Some((date, whole.as_str().to_string()));
        }
    }

    None
}

fn to_utc<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Parse `query` relative to the local clock
pub fn parse_query(query: &str) -> ParsedQuery {
    parse_query_at(query, Local::now())
}

/// Parse `query` relative to `now`; day boundaries follow `now`'s time zone
pub fn parse_query_at<Tz: TimeZone>(query: &str, now: DateTime<Tz>) -> ParsedQuery {
    let mut result = ParsedQuery::plain(query);
    let Some(p) = patterns() else {
        return result;
    };

    let tz = now.timezone();
    let local_now = now.naive_local();
    let mut clean = query.to_lowercase();

    if let Some((re, filter)) = p.dates.iter().find(|(re, _)| re.is_match(&clean)) {
        let (start, end) = simple_range(*filter, local_now);
        result.date_filter = Some(*filter);
        result.date_range = Some((to_utc(&tz, start), to_utc(&tz, end)));
        let stripped = re.replace_all(&clean, "").into_owned();
        clean = stripped;
    } else if let Some((date, matched)) = parse_complex_date(p, &clean, local_now.date()) {
        let filter = DateFilter::Specific(date);
        let (start, end) = simple_range(filter, local_now);
        result.date_filter = Some(filter);
        result.date_range = Some((to_utc(&tz, start), to_utc(&tz, end)));
        result.specific_date = Some(date);
        clean = clean.replace(&matched, "");
    }

    if let Some((re, filter)) = p.types.iter().find(|(re, _)| re.is_match(&clean)) {
        result.type_filter = Some(*filter);
        result.extensions = Some(filter.extensions().iter().map(|e| e.to_string()).collect());
        // A type word that is the whole query stays as the search term
        let stripped = re.replace_all(&clean, "").trim().to_string();
        if !stripped.is_empty() {
            clean = stripped;
        }
    }

    let clean = p.stopwords.replace_all(&clean, "");
    let clean = p.spaces.replace_all(&clean, " ").trim().to_string();

    result.clean_query = if !clean.is_empty() || result.has_filters() {
        clean
    } else {
        query.to_string()
    };

    debug!("Parsed query {:?} -> {:?}", query, result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // Wednesday
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 14, 30, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_yesterday_range() {
        let q = parse_query_at("invoices from yesterday", now());
        assert_eq!(q.date_filter, Some(DateFilter::Yesterday));
        assert_eq!(
            q.date_range,
            Some((
                Utc.with_ymd_and_hms(2024, 5, 14, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap(),
            ))
        );
        assert_eq!(q.clean_query, "invoices");
    }

    #[test]
    fn test_this_week_starts_monday() {
        let q = parse_query_at("this week", now());
        let (start, end) = q.date_range.unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap());
        assert_eq!(end, now());
        assert_eq!(q.clean_query, "");
    }

    #[test]
    fn test_weekday_modifiers() {
        let today = day(2024, 5, 15);
        assert_eq!(calculate_day_date("last", "thursday", today), Some(day(2024, 5, 9)));
        assert_eq!(calculate_day_date("previous", "wednesday", today), Some(day(2024, 5, 8)));
        assert_eq!(calculate_day_date("this", "monday", today), Some(day(2024, 5, 13)));
        assert_eq!(calculate_day_date("next", "wednesday", today), Some(day(2024, 5, 22)));
        assert_eq!(calculate_day_date("someday", "monday", today), None);
    }

    #[test]
    fn test_specific_day_query() {
        let q = parse_query_at("photos from previous thursday", now());
        assert_eq!(q.specific_date, Some(day(2024, 5, 9)));
        assert_eq!(q.date_filter, Some(DateFilter::Specific(day(2024, 5, 9))));
        assert_eq!(q.type_filter, Some(TypeFilter::Images));
        assert_eq!(q.clean_query, "");
    }

    #[test]
    fn test_ago_units() {
        assert_eq!(parse_query_at("3 days ago", now()).specific_date, Some(day(2024, 5, 12)));
        assert_eq!(parse_query_at("2 weeks ago", now()).specific_date, Some(day(2024, 5, 1)));
        assert_eq!(parse_query_at("1 month ago", now()).specific_date, Some(day(2024, 4, 15)));
    }

    #[test]
    fn test_huge_ago_amount_is_not_a_date() {
        let q = parse_query_at("photos 99999999 days ago", now());
        assert!(q.specific_date.is_none());
        assert_eq!(q.type_filter, Some(TypeFilter::Images));

        let q = parse_query_at("pdfs 9000000000000000000 years ago", now());
        assert!(q.date_filter.is_none());
        assert_eq!(q.type_filter, Some(TypeFilter::Pdfs));

        assert!(parse_query_at("99999999999999999999 weeks ago", now()).date_range.is_none());
    }

    #[test]
    fn test_named_dates() {
        assert_eq!(
            parse_query_at("receipt january 3, 2023", now()).specific_date,
            Some(day(2023, 1, 3))
        );
        assert_eq!(parse_query_at("3rd of march", now()).specific_date, Some(day(2024, 3, 3)));
        // Not yet reached this year
        assert_eq!(parse_query_at("june 1", now()).specific_date, Some(day(2023, 6, 1)));
        assert_eq!(parse_query_at("2024-02-29 notes", now()).clean_query, "notes");
    }

    #[test]
    fn test_type_word_alone_is_kept() {
        let q = parse_query_at("thumbnails", now());
        assert_eq!(q.type_filter, Some(TypeFilter::Images));
        assert_eq!(q.clean_query, "thumbnails");

        let q = parse_query_at("tax pdf files", now());
        assert_eq!(q.type_filter, Some(TypeFilter::Pdfs));
        assert_eq!(q.extensions, Some(vec![".pdf".to_string()]));
        assert_eq!(q.clean_query, "tax");
    }

    #[test]
    fn test_stopwords_only_query_is_preserved() {
        let q = parse_query_at("the a an", now());
        assert!(!q.has_filters());
        assert_eq!(q.clean_query, "the a an");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(DateFilter::LastWeek.to_string(), "Last 7 Days");
        assert_eq!(DateFilter::Specific(day(2024, 1, 2)).to_string(), "2024-01-02");
        assert_eq!(TypeFilter::Pdfs.to_string(), "PDFs");
    }
}
