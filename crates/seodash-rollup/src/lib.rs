//! Service Rollup Resolver: free-text location resolution plus per-service
//! keyword aggregation over the shared services workbook.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use seodash_core::{
    parse_month_header, safe_float, safe_int, text_or_empty, trend_of, CellValue,
    ServiceKeyword, ServiceRollupEntry,
};
use seodash_store::{RowStore, Table};
use serde::Serialize;
use tracing::debug;

pub const CRATE_NAME: &str = "seodash-rollup";

pub const USA_TABLE: &str = "Services USA";
pub const CANADA_TABLE: &str = "Services Canada";
pub const STATE_TABLE: &str = "Services by State";
pub const CITY_TABLE: &str = "Services by City";

const SERVICE_COL: &str = "Service";
const KEYWORD_COL: &str = "Keyword";
const CITY_COL: &str = "City";
const STATE_COL: &str = "State";
const COUNTRY_COL: &str = "Country";
const COMPETITION_COL: &str = "Competition";
const CPC_COL: &str = "CPC";

const COUNTRY_TOKENS: [&str; 5] = ["usa", "united states", "canada", "ca", "us"];

/// US states, DC, and Canadian provinces/territories as (full name, abbr).
/// Doubles as the maximal-recall lookup table for the third filter pass.
pub const REGION_ABBREVIATIONS: [(&str, &str); 64] = [
    ("Alabama", "AL"),
    ("Alaska", "AK"),
    ("Arizona", "AZ"),
    ("Arkansas", "AR"),
    ("California", "CA"),
    ("Colorado", "CO"),
    ("Connecticut", "CT"),
    ("Delaware", "DE"),
    ("District of Columbia", "DC"),
    ("Florida", "FL"),
    ("Georgia", "GA"),
    ("Hawaii", "HI"),
    ("Idaho", "ID"),
    ("Illinois", "IL"),
    ("Indiana", "IN"),
    ("Iowa", "IA"),
    ("Kansas", "KS"),
    ("Kentucky", "KY"),
    ("Louisiana", "LA"),
    ("Maine", "ME"),
    ("Maryland", "MD"),
    ("Massachusetts", "MA"),
    ("Michigan", "MI"),
    ("Minnesota", "MN"),
    ("Mississippi", "MS"),
    ("Missouri", "MO"),
    ("Montana", "MT"),
    ("Nebraska", "NE"),
    ("Nevada", "NV"),
    ("New Hampshire", "NH"),
    ("New Jersey", "NJ"),
    ("New Mexico", "NM"),
    ("New York", "NY"),
    ("North Carolina", "NC"),
    ("North Dakota", "ND"),
    ("Ohio", "OH"),
    ("Oklahoma", "OK"),
    ("Oregon", "OR"),
    ("Pennsylvania", "PA"),
    ("Rhode Island", "RI"),
    ("South Carolina", "SC"),
    ("South Dakota", "SD"),
    ("Tennessee", "TN"),
    ("Texas", "TX"),
    ("Utah", "UT"),
    ("Vermont", "VT"),
    ("Virginia", "VA"),
    ("Washington", "WA"),
    ("West Virginia", "WV"),
    ("Wisconsin", "WI"),
    ("Wyoming", "WY"),
    ("Alberta", "AB"),
    ("British Columbia", "BC"),
    ("Manitoba", "MB"),
    ("New Brunswick", "NB"),
    ("Newfoundland and Labrador", "NL"),
    ("Northwest Territories", "NT"),
    ("Nova Scotia", "NS"),
    ("Nunavut", "NU"),
    ("Ontario", "ON"),
    ("Prince Edward Island", "PE"),
    ("Quebec", "QC"),
    ("Saskatchewan", "SK"),
    ("Yukon", "YT"),
];

/// Established service names shown as the primary catalog.
pub const ESTABLISHED_SERVICES: [&str; 16] = [
    "Botox",
    "Dermal Fillers",
    "Laser Hair Removal",
    "Chemical Peels",
    "Microneedling",
    "HydraFacial",
    "CoolSculpting",
    "Lip Fillers",
    "Kybella",
    "Microdermabrasion",
    "IPL Photofacial",
    "Laser Skin Resurfacing",
    "PRP Hair Restoration",
    "Hormone Replacement Therapy",
    "IV Therapy",
    "Body Contouring",
];

/// Emerging service names shown as the secondary catalog.
pub const EMERGING_SERVICES: [&str; 10] = [
    "Exosome Therapy",
    "Polynucleotide Injections",
    "Skin Boosters",
    "RF Microneedling",
    "EmSculpt",
    "Semaglutide Weight Loss",
    "PDO Thread Lift",
    "Salmon Sperm Facial",
    "Cryotherapy Facials",
    "LED Light Therapy",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Country,
    State,
    City,
}

/// Resolved location: which partition table to read, which column to filter
/// on, the filter value, and an optional secondary token for city routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    pub route: Route,
    pub table: &'static str,
    pub column: &'static str,
    pub filter: String,
    pub secondary: Option<String>,
}

impl LocationQuery {
    /// Parse the free-text `location` parameter.
    ///
    /// The comma grammar is inherently lossy: "State, Country" and "City, ST"
    /// are split the same way, so a one-word city paired with a 2-letter
    /// token that is not a known abbreviation routes as a state, and
    /// "Ontario, CA" routes as a state in Canada-as-country terms because
    /// country tokens win over province abbreviations. Best effort only.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.eq_ignore_ascii_case("usa") {
            return Self {
                route: Route::Country,
                table: USA_TABLE,
                column: COUNTRY_COL,
                filter: "USA".to_string(),
                secondary: None,
            };
        }
        if input.eq_ignore_ascii_case("canada") {
            return Self {
                route: Route::Country,
                table: CANADA_TABLE,
                column: COUNTRY_COL,
                filter: "Canada".to_string(),
                secondary: None,
            };
        }

        if let Some((left, right)) = input.split_once(',') {
            let left = left.trim();
            let right = right.trim();
            let right_lower = right.to_ascii_lowercase();

            if COUNTRY_TOKENS.contains(&right_lower.as_str()) {
                return Self::state_route(left);
            }
            if right.len() == 2 && is_known_abbreviation(right) {
                return Self::city_route(left, Some(right.to_ascii_uppercase()));
            }
            if left.contains(char::is_whitespace) {
                let secondary = (!right.is_empty()).then(|| right.to_string());
                return Self::city_route(left, secondary);
            }
            return Self::state_route(left);
        }

        Self::state_route(input)
    }

    fn state_route(filter: &str) -> Self {
        Self {
            route: Route::State,
            table: STATE_TABLE,
            column: STATE_COL,
            filter: filter.trim().to_string(),
            secondary: None,
        }
    }

    fn city_route(filter: &str, secondary: Option<String>) -> Self {
        Self {
            route: Route::City,
            table: CITY_TABLE,
            column: CITY_COL,
            filter: filter.trim().to_string(),
            secondary,
        }
    }
}

fn is_known_abbreviation(token: &str) -> bool {
    REGION_ABBREVIATIONS
        .iter()
        .any(|(_, abbr)| abbr.eq_ignore_ascii_case(token))
}

fn alpha_only(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Expand a state/province name through the abbreviation table, both ways.
fn region_aliases(value: &str) -> Vec<String> {
    let mut aliases = vec![value.to_ascii_lowercase()];
    for (full, abbr) in REGION_ABBREVIATIONS {
        if full.eq_ignore_ascii_case(value) {
            aliases.push(abbr.to_ascii_lowercase());
        }
        if abbr.eq_ignore_ascii_case(value) {
            aliases.push(full.to_ascii_lowercase());
        }
    }
    aliases
}

fn contains_either_way(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a))
}

/// Filter table rows to the resolved location. Three progressively looser
/// passes on country/state routes; city routes match the city column plus an
/// optional non-disqualifying state token.
pub fn filter_rows<'a>(table: &'a Table, query: &LocationQuery) -> Vec<&'a Vec<CellValue>> {
    let Some(filter_col) = table.column_index(query.column) else {
        debug!(table = table.name.as_str(), column = query.column, "filter column absent");
        return Vec::new();
    };

    if query.route == Route::City {
        let state_col = table.column_index(STATE_COL);
        let filter = query.filter.to_ascii_lowercase();
        let secondary = query.secondary.as_deref().map(str::to_ascii_lowercase);
        return table
            .rows
            .iter()
            .filter(|row| {
                let city = text_or_empty(table.cell(row, filter_col)).to_ascii_lowercase();
                if city != filter {
                    return false;
                }
                let Some(token) = &secondary else {
                    return true;
                };
                let state = state_col
                    .map(|idx| text_or_empty(table.cell(row, idx)).to_ascii_lowercase())
                    .unwrap_or_default();
                // An empty state cell is non-disqualifying, not a failure.
                state.is_empty() || state == *token || contains_either_way(&state, token)
            })
            .collect();
    }

    let filter = query.filter.to_ascii_lowercase();
    let exact: Vec<&Vec<CellValue>> = table
        .rows
        .iter()
        .filter(|row| text_or_empty(table.cell(row, filter_col)).to_ascii_lowercase() == filter)
        .collect();
    if !exact.is_empty() || query.route == Route::Country {
        return exact;
    }

    // Second pass strips punctuation/whitespace noise from both sides.
    let stripped_filter = alpha_only(&query.filter);
    let stripped: Vec<&Vec<CellValue>> = table
        .rows
        .iter()
        .filter(|row| alpha_only(&text_or_empty(table.cell(row, filter_col))) == stripped_filter)
        .collect();
    if !stripped.is_empty() {
        return stripped;
    }

    // Maximal-recall pass: substring containment plus abbreviation aliases.
    let aliases = region_aliases(&query.filter);
    table
        .rows
        .iter()
        .filter(|row| {
            let value = text_or_empty(table.cell(row, filter_col)).to_ascii_lowercase();
            aliases
                .iter()
                .any(|alias| value == *alias || contains_either_way(&value, alias))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthColumn {
    pub index: usize,
    pub month: NaiveDate,
}

/// Headers that parse as "Month YYYY" are month columns, newest first.
pub fn discover_month_columns(headers: &[String]) -> Vec<MonthColumn> {
    let mut columns: Vec<MonthColumn> = headers
        .iter()
        .enumerate()
        .filter_map(|(index, header)| {
            parse_month_header(header).map(|month| MonthColumn { index, month })
        })
        .collect();
    columns.sort_by(|a, b| b.month.cmp(&a.month));
    columns
}

fn column_has_data(rows: &[&Vec<CellValue>], column: &MonthColumn) -> bool {
    rows.iter()
        .any(|row| safe_float(row.get(column.index).unwrap_or(&CellValue::EMPTY)) != 0.0)
}

/// Pick the current and previous reporting months: the latest column with at
/// least one non-placeholder value, then the next such column further back.
/// Guards against months of entirely blank data being selected as current.
pub fn select_report_months(
    columns: &[MonthColumn],
    rows: &[&Vec<CellValue>],
) -> (Option<MonthColumn>, Option<MonthColumn>) {
    let mut populated = columns.iter().filter(|c| column_has_data(rows, c));
    (populated.next().copied(), populated.next().copied())
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRollup {
    pub top_services: Vec<ServiceRollupEntry>,
    pub new_services: Vec<ServiceRollupEntry>,
}

#[derive(Debug, Default)]
struct ServiceAccumulator {
    current_volume: i64,
    previous_volume: i64,
    competition_sum: f64,
    cpc_sum: f64,
    keyword_count: usize,
    keywords: Vec<ServiceKeyword>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate filtered rows into ranked service catalogs.
pub fn aggregate_services(table: &Table, rows: &[&Vec<CellValue>]) -> ServiceRollup {
    let Some(service_col) = table.column_index(SERVICE_COL) else {
        return ServiceRollup::default();
    };
    let keyword_col = table.column_index(KEYWORD_COL);
    let competition_col = table.column_index(COMPETITION_COL);
    let cpc_col = table.column_index(CPC_COL);

    let months = discover_month_columns(&table.headers);
    let (current, previous) = select_report_months(&months, rows);

    let mut groups: BTreeMap<String, ServiceAccumulator> = BTreeMap::new();
    for row in rows {
        let service = text_or_empty(table.cell(row, service_col));
        if service.is_empty() {
            continue;
        }
        let current_volume = current
            .map(|c| safe_int(table.cell(row, c.index)))
            .unwrap_or(0);
        let previous_volume = previous
            .map(|c| safe_int(table.cell(row, c.index)))
            .unwrap_or(0);

        let acc = groups.entry(service).or_default();
        acc.current_volume += current_volume;
        acc.previous_volume += previous_volume;
        acc.keyword_count += 1;
        if let Some(idx) = competition_col {
            let competition = safe_float(table.cell(row, idx));
            if competition > 0.0 {
                acc.competition_sum += competition;
            }
        }
        if let Some(idx) = cpc_col {
            let cpc = safe_float(table.cell(row, idx));
            if cpc > 0.0 {
                acc.cpc_sum += cpc;
            }
        }
        if let Some(idx) = keyword_col {
            let keyword = text_or_empty(table.cell(row, idx));
            if !keyword.is_empty() {
                acc.keywords.push(ServiceKeyword {
                    keyword,
                    volume: current_volume,
                    previous_volume,
                    trend: trend_of(current_volume, previous_volume),
                });
            }
        }
    }

    // The share denominator spans every service found for the location,
    // including groups outside both fixed catalogs.
    let total_volume: i64 = groups.values().map(|a| a.current_volume).sum();

    let mut top_services = Vec::new();
    let mut new_services = Vec::new();
    for (service, acc) in groups {
        if acc.current_volume == 0 {
            continue;
        }
        let volume_percentage = if total_volume == 0 {
            "0.0".to_string()
        } else {
            format!(
                "{:.1}",
                100.0 * acc.current_volume as f64 / total_volume as f64
            )
        };
        let mut keywords = acc.keywords;
        keywords.sort_by(|a, b| {
            b.volume
                .cmp(&a.volume)
                .then_with(|| a.keyword.to_lowercase().cmp(&b.keyword.to_lowercase()))
        });
        let entry = ServiceRollupEntry {
            trend: trend_of(acc.current_volume, acc.previous_volume),
            volume_percentage,
            avg_competition: round2(acc.competition_sum / acc.keyword_count as f64),
            avg_cpc: round2(acc.cpc_sum / acc.keyword_count as f64),
            keyword_count: acc.keyword_count,
            total_volume: acc.current_volume,
            previous_volume: acc.previous_volume,
            keywords,
            service,
        };
        if in_catalog(&entry.service, &ESTABLISHED_SERVICES) {
            top_services.push(entry);
        } else if in_catalog(&entry.service, &EMERGING_SERVICES) {
            new_services.push(entry);
        }
    }

    sort_entries(&mut top_services);
    sort_entries(&mut new_services);
    ServiceRollup {
        top_services,
        new_services,
    }
}

fn in_catalog(service: &str, catalog: &[&str]) -> bool {
    catalog.iter().any(|name| name.eq_ignore_ascii_case(service))
}

/// Descending by volume; name ascending breaks ties so output is stable.
fn sort_entries(entries: &mut [ServiceRollupEntry]) {
    entries.sort_by(|a, b| {
        b.total_volume
            .cmp(&a.total_volume)
            .then_with(|| a.service.to_lowercase().cmp(&b.service.to_lowercase()))
    });
}

/// Resolve a free-text location against the services workbook. Zero matches
/// and missing tables both produce empty catalogs, never an error.
pub fn resolve_rollup(store: &dyn RowStore, location: &str) -> ServiceRollup {
    let query = LocationQuery::parse(location);
    let Some(table) = store.table(query.table) else {
        debug!(table = query.table, "services table absent, returning empty catalogs");
        return ServiceRollup::default();
    };
    let rows = filter_rows(table, &query);
    aggregate_services(table, &rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityEntry {
    pub city: String,
    pub state: String,
    pub country: String,
}

/// Distinct (city, state, country) triples from the city table, deduplicated
/// and sorted case-insensitively by "City, State".
pub fn list_cities(store: &dyn RowStore) -> Vec<CityEntry> {
    let Some(table) = store.table(CITY_TABLE) else {
        return Vec::new();
    };
    let Some(city_col) = table.column_index(CITY_COL) else {
        return Vec::new();
    };
    let state_col = table.column_index(STATE_COL);
    let country_col = table.column_index(COUNTRY_COL);

    let mut distinct: BTreeMap<String, CityEntry> = BTreeMap::new();
    for row in &table.rows {
        let city = text_or_empty(table.cell(row, city_col));
        if city.is_empty() {
            continue;
        }
        let state = state_col
            .map(|idx| text_or_empty(table.cell(row, idx)))
            .unwrap_or_default();
        let country = country_col
            .map(|idx| text_or_empty(table.cell(row, idx)))
            .unwrap_or_default();
        let sort_key = format!("{}, {}", city, state).to_lowercase();
        distinct.entry(sort_key).or_insert(CityEntry {
            city,
            state,
            country,
        });
    }
    distinct.into_values().collect()
}
