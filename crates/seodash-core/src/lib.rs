//! Core cell model, safe coercions, and typed dashboard records for seodash.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "seodash-core";

/// A single spreadsheet cell as it arrives from the row store.
///
/// Variant order matters for untagged deserialization: JSON `null` folds to
/// `Empty`, ISO date strings become `Date`, and everything else that is a
/// string stays `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Number(f64),
    Link { text: String, url: String },
    Date(NaiveDate),
    Text(String),
}

impl CellValue {
    pub const EMPTY: CellValue = CellValue::Empty;

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(t) => t.trim().is_empty(),
            _ => false,
        }
    }

    /// Display text of the cell; numbers are rendered without a forced format.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            CellValue::Link { text, .. } => text.clone(),
            CellValue::Date(d) => d.to_string(),
            CellValue::Text(t) => t.clone(),
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

/// Boolean coercion: native booleans pass through, display strings are
/// compared case-insensitively against `"true"`. Everything else is `false`.
pub fn coerce_bool(cell: &CellValue) -> bool {
    match cell {
        CellValue::Bool(b) => *b,
        CellValue::Text(t) => t.trim().eq_ignore_ascii_case("true"),
        CellValue::Link { text, .. } => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Total numeric parse over display strings: keeps digits, `.` and `-`,
/// returns 0.0 on anything unparseable. Absence of data never becomes NaN.
pub fn safe_float_str(input: &str) -> f64 {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let parsed = cleaned.parse::<f64>().unwrap_or(0.0);
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

pub fn safe_float(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Number(n) if n.is_finite() => *n,
        CellValue::Number(_) => 0.0,
        CellValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        CellValue::Text(t) => safe_float_str(t),
        CellValue::Link { text, .. } => safe_float_str(text),
        _ => 0.0,
    }
}

pub fn safe_int(cell: &CellValue) -> i64 {
    safe_float(cell).trunc() as i64
}

const MONTH_NAMES: [(&str, u32); 12] = [
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

/// Parse a `"Month YYYY"` header (full or three-letter month name,
/// case-insensitive) into the first day of that month. Non-matching input
/// yields `None`, never an error.
pub fn parse_month_header(input: &str) -> Option<NaiveDate> {
    let mut parts = input
        .split(|c: char| c.is_whitespace() || c == '-' || c == ',')
        .filter(|p| !p.is_empty());
    let month_part = parts.next()?.to_ascii_lowercase();
    let year_part = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let month = MONTH_NAMES.iter().find_map(|(name, number)| {
        let matches = if month_part.len() == 3 {
            name.starts_with(&month_part)
        } else {
            *name == month_part
        };
        matches.then_some(*number)
    })?;
    let year: i32 = year_part.parse().ok()?;
    if !(1900..=9999).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Date coercion: native dates pass through; text tries the month-header
/// grammar first, then a handful of common spreadsheet export formats.
pub fn coerce_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Date(d) => Some(*d),
        CellValue::Text(t) | CellValue::Link { text: t, .. } => {
            let trimmed = t.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Some(date) = parse_month_header(trimmed) {
                return Some(date);
            }
            for format in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%B %d, %Y", "%b %d, %Y"] {
                if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                    return Some(date);
                }
            }
            None
        }
        _ => None,
    }
}

/// Trimmed text with `""` as the empty default. Used for structural fields
/// where downstream code branches on emptiness.
pub fn text_or_empty(cell: &CellValue) -> String {
    cell.as_text().trim().to_string()
}

/// Trimmed text with `"N/A"` as the empty default. Used for advisory fields
/// (hours, site speed) that render directly in the dashboard.
pub fn text_or_na(cell: &CellValue) -> String {
    let text = text_or_empty(cell);
    if text.is_empty() {
        "N/A".to_string()
    } else {
        text
    }
}

fn looks_like_url(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://")
}

/// Hyperlink extraction: a rich-text link cell wins outright; the plain-text
/// fallback column is accepted only when it looks like an http(s) URL.
pub fn link_url(primary: &CellValue, fallback: &CellValue) -> Option<String> {
    if let CellValue::Link { url, .. } = primary {
        let trimmed = url.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    let text = text_or_empty(primary);
    if looks_like_url(&text) {
        return Some(text);
    }
    let fallback_text = text_or_empty(fallback);
    if looks_like_url(&fallback_text) {
        return Some(fallback_text);
    }
    None
}

/// Derive a display name from a website URL: strip the scheme and a leading
/// `www.`, then truncate at the first path segment.
pub fn display_name_from_url(url: &str) -> String {
    let mut rest = url.trim();
    for scheme in ["https://", "http://"] {
        if let Some(stripped) = rest.strip_prefix(scheme) {
            rest = stripped;
            break;
        }
    }
    if let Some(stripped) = rest.strip_prefix("www.") {
        rest = stripped;
    }
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .trim();
    host.to_string()
}

/// One row of the client/competitor info table, fully coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub name: String,
    pub address: String,
    pub city: String,
    pub website: String,
    pub is_client: bool,
    pub review_score: f64,
    pub review_count: i64,
    pub site_speed: String,
    pub hours: String,
    pub keyword_top_positions: i64,
    pub backlink_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ads: Option<AdsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social: Option<SocialLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdsInfo {
    pub running: bool,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SocialLinks {
    pub facebook: String,
    pub instagram: String,
    pub youtube: String,
}

impl SocialLinks {
    pub fn is_empty(&self) -> bool {
        self.facebook.is_empty() && self.instagram.is_empty() && self.youtube.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRow {
    pub keyword: String,
    pub position: i64,
    pub previous_position: i64,
    pub is_new: bool,
    pub is_up: bool,
    pub is_down: bool,
    pub is_lost: bool,
    pub search_volume: i64,
    pub cpc: f64,
    pub traffic_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklinkRow {
    pub source_url: String,
    pub domain_rating: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<NaiveDate>,
    pub is_new: bool,
    pub is_lost: bool,
    pub traffic_value: f64,
}

/// One geogrid crawl for a keyword, newest-first inside its group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoGridObservation {
    pub keyword: String,
    pub run_date: NaiveDate,
    pub competitors: Vec<GeoGridCompetitor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoGridCompetitor {
    pub name: String,
    pub domain: String,
    pub rank: f64,
    pub top5_total: i64,
    pub top10_total: i64,
}

/// Aggregated per-service rollup entry for the services endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRollupEntry {
    pub service: String,
    pub total_volume: i64,
    pub previous_volume: i64,
    pub trend: i8,
    pub volume_percentage: String,
    pub avg_competition: f64,
    pub avg_cpc: f64,
    pub keyword_count: usize,
    pub keywords: Vec<ServiceKeyword>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceKeyword {
    pub keyword: String,
    pub volume: i64,
    pub previous_volume: i64,
    pub trend: i8,
}

/// Trend comparison used for both services and individual keywords:
/// strictly greater is 1, strictly less is -1, equal is 0.
pub fn trend_of(current: i64, previous: i64) -> i8 {
    match current.cmp(&previous) {
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_coercion_matches_display_strings_case_insensitively() {
        assert!(coerce_bool(&CellValue::Bool(true)));
        assert!(coerce_bool(&CellValue::Text("TRUE".into())));
        assert!(coerce_bool(&CellValue::Text("true".into())));
        assert!(!coerce_bool(&CellValue::Text("False".into())));
        assert!(!coerce_bool(&CellValue::Text(String::new())));
        assert!(!coerce_bool(&CellValue::Empty));
        assert!(!coerce_bool(&CellValue::Number(1.0)));
    }

    #[test]
    fn safe_numeric_parsing_is_total() {
        assert_eq!(safe_int(&CellValue::Empty), 0);
        assert_eq!(safe_int(&CellValue::Text("abc".into())), 0);
        assert_eq!(safe_float(&CellValue::Text("1,234.5 pts".into())), 1234.5);
        assert_eq!(safe_float(&CellValue::Text("-42".into())), -42.0);
        assert_eq!(safe_float(&CellValue::Number(7.25)), 7.25);
        assert_eq!(safe_float(&CellValue::Text("-".into())), 0.0);
    }

    #[test]
    fn month_header_round_trips() {
        let parsed = parse_month_header("March 2024").unwrap();
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(
            parse_month_header("mArCh 2024"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(
            parse_month_header("Dec 2023"),
            NaiveDate::from_ymd_opt(2023, 12, 1)
        );
        assert_eq!(parse_month_header("Keyword"), None);
        assert_eq!(parse_month_header("March"), None);
        assert_eq!(parse_month_header("March 2024 extra"), None);
    }

    #[test]
    fn date_coercion_prefers_native_then_month_then_generic() {
        let native = CellValue::Date(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        assert_eq!(coerce_date(&native), NaiveDate::from_ymd_opt(2026, 3, 15));
        assert_eq!(
            coerce_date(&CellValue::Text("February 2026".into())),
            NaiveDate::from_ymd_opt(2026, 2, 1)
        );
        assert_eq!(
            coerce_date(&CellValue::Text("03/15/2026".into())),
            NaiveDate::from_ymd_opt(2026, 3, 15)
        );
        assert_eq!(coerce_date(&CellValue::Text("not a date".into())), None);
        assert_eq!(coerce_date(&CellValue::Number(5.0)), None);
    }

    #[test]
    fn hyperlink_cells_prefer_rich_text_links() {
        let rich = CellValue::Link {
            text: "example".into(),
            url: "https://example.com/page".into(),
        };
        let fallback = CellValue::Text("https://fallback.example".into());
        assert_eq!(
            link_url(&rich, &fallback).as_deref(),
            Some("https://example.com/page")
        );
        assert_eq!(
            link_url(&CellValue::Text("plain text".into()), &fallback).as_deref(),
            Some("https://fallback.example")
        );
        assert_eq!(
            link_url(
                &CellValue::Empty,
                &CellValue::Text("not-a-url.example".into())
            ),
            None
        );
    }

    #[test]
    fn display_names_strip_scheme_www_and_path() {
        assert_eq!(
            display_name_from_url("https://www.miamiclinic.com/services?ref=x"),
            "miamiclinic.com"
        );
        assert_eq!(display_name_from_url("http://rival.example/"), "rival.example");
        assert_eq!(display_name_from_url("bare-domain.com"), "bare-domain.com");
        assert_eq!(display_name_from_url(""), "");
    }

    #[test]
    fn string_coercions_fold_empties_per_field_role() {
        assert_eq!(text_or_empty(&CellValue::Text("  Miami  ".into())), "Miami");
        assert_eq!(text_or_empty(&CellValue::Empty), "");
        assert_eq!(text_or_na(&CellValue::Empty), "N/A");
        assert_eq!(text_or_na(&CellValue::Text("  fast ".into())), "fast");
    }

    #[test]
    fn cells_deserialize_untagged_from_fixture_json() {
        let row: Vec<CellValue> = serde_json::from_str(
            r#"[null, true, 12.5, {"text": "site", "url": "https://a.example"}, "2026-03-01", "March 2026"]"#,
        )
        .unwrap();
        assert_eq!(row[0], CellValue::Empty);
        assert_eq!(row[1], CellValue::Bool(true));
        assert_eq!(row[2], CellValue::Number(12.5));
        assert!(matches!(row[3], CellValue::Link { .. }));
        assert_eq!(
            row[4],
            CellValue::Date(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
        );
        assert_eq!(row[5], CellValue::Text("March 2026".into()));
    }

    #[test]
    fn trend_is_sign_of_volume_delta() {
        assert_eq!(trend_of(500, 400), 1);
        assert_eq!(trend_of(400, 500), -1);
        assert_eq!(trend_of(400, 400), 0);
    }
}
