//! Client Report Aggregator: maps workbook tables into the dashboard payload.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use seodash_core::{
    coerce_bool, coerce_date, display_name_from_url, link_url, safe_float, safe_int,
    text_or_empty, text_or_na, AdsInfo, BacklinkRow, CellValue, ClientRecord,
    GeoGridCompetitor, GeoGridObservation, KeywordRow, SocialLinks,
};
use seodash_store::{RowStore, Table};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "seodash-report";

pub const CLIENT_INFO_TABLE: &str = "Client & Competitor Info";
pub const ON_PAGE_TABLE: &str = "On-Page Insights";
pub const GBP_TABLE: &str = "GBP Insights";
pub const GEOGRID_TABLE: &str = "GeoGrid";
pub const KEYWORDS_ARCHIVE_TABLE: &str = "Keywords Archive";
pub const BACKLINKS_ARCHIVE_TABLE: &str = "Backlinks Archive";
pub const CONFIG_TABLE: &str = "Config";

/// Client table first, then the four competitor partitions.
pub const KEYWORD_TABLES: [&str; 5] = [
    "Keywords",
    "Competitor 1 Keywords",
    "Competitor 2 Keywords",
    "Competitor 3 Keywords",
    "Competitor 4 Keywords",
];

pub const BACKLINK_TABLES: [&str; 5] = [
    "Backlinks",
    "Competitor 1 Backlinks",
    "Competitor 2 Backlinks",
    "Competitor 3 Backlinks",
    "Competitor 4 Backlinks",
];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table {table:?} is missing expected column {column:?}")]
    MissingColumn {
        table: String,
        column: &'static str,
    },
}

/// Expected columns for one table. Offsets are derived from the header row
/// at read time; a present table whose headers do not carry every declared
/// column fails loudly instead of silently misreading positions.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub columns: &'static [&'static str],
}

#[derive(Debug, Clone)]
pub struct ColumnMap {
    offsets: HashMap<&'static str, usize>,
}

impl TableSchema {
    pub fn resolve(&self, table: &Table) -> Result<ColumnMap, SchemaError> {
        let mut offsets = HashMap::with_capacity(self.columns.len());
        for column in self.columns {
            let index = table
                .column_index(column)
                .ok_or_else(|| SchemaError::MissingColumn {
                    table: table.name.clone(),
                    column,
                })?;
            offsets.insert(*column, index);
        }
        Ok(ColumnMap { offsets })
    }
}

impl ColumnMap {
    fn idx(&self, column: &'static str) -> usize {
        *self
            .offsets
            .get(column)
            .expect("column resolved during schema validation")
    }

    pub fn cell<'a>(&self, row: &'a [CellValue], column: &'static str) -> &'a CellValue {
        row.get(self.idx(column)).unwrap_or(&CellValue::EMPTY)
    }
}

const CLIENT_INFO_SCHEMA: TableSchema = TableSchema {
    columns: &[
        "Account Type",
        "Name",
        "Address",
        "City",
        "Website",
        "Review Score",
        "Review Count",
        "Site Speed",
        "Hours",
        "Top Keyword Positions",
        "Backlinks",
        "Ads Running",
        "Ads Link",
        "Facebook",
        "Instagram",
        "YouTube",
        "AI Notes",
    ],
};

const ON_PAGE_SCHEMA: TableSchema = TableSchema {
    columns: &[
        "Account Type",
        "Website",
        "Page Score",
        "Broken Links",
        "Load Time",
        "Mobile Friendly",
    ],
};

const GBP_SCHEMA: TableSchema = TableSchema {
    columns: &[
        "Month",
        "Views",
        "Searches",
        "Calls",
        "Direction Requests",
        "Website Clicks",
    ],
};

const GEOGRID_SCHEMA: TableSchema = TableSchema {
    columns: &["Keyword", "Run Date"],
};

const KEYWORD_SCHEMA: TableSchema = TableSchema {
    columns: &[
        "Website",
        "Keyword",
        "Position",
        "Previous Position",
        "New",
        "Up",
        "Down",
        "Lost",
        "Search Volume",
        "CPC",
        "Traffic Value",
    ],
};

const BACKLINK_SCHEMA: TableSchema = TableSchema {
    columns: &[
        "Website",
        "Source URL",
        "Source URL Text",
        "Domain Rating",
        "First Seen",
        "New",
        "Lost",
        "Traffic Value",
    ],
};

const KEYWORDS_ARCHIVE_SCHEMA: TableSchema = TableSchema {
    columns: &["Crawl Date", "Top 3", "Top 10", "Top 100", "Total Volume"],
};

const BACKLINKS_ARCHIVE_SCHEMA: TableSchema = TableSchema {
    columns: &["Crawl Date", "Backlinks", "Referring Domains"],
};

const CONFIG_SCHEMA: TableSchema = TableSchema {
    columns: &["Name", "URL"],
};

/// Independently computable and cacheable subset of the report payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Dashboard,
    WebsiteStats,
    GeogridData,
    GbpInsights,
    BacklinksSummary,
    BacklinksTable,
    BacklinksSummaryArchive,
    KeywordsSummary,
    KeywordsTable,
    KeywordsSummaryArchive,
    Webhooks,
}

impl Section {
    pub const ALL: [Section; 11] = [
        Section::Dashboard,
        Section::WebsiteStats,
        Section::GeogridData,
        Section::GbpInsights,
        Section::BacklinksSummary,
        Section::BacklinksTable,
        Section::BacklinksSummaryArchive,
        Section::KeywordsSummary,
        Section::KeywordsTable,
        Section::KeywordsSummaryArchive,
        Section::Webhooks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Section::Dashboard => "dashboard",
            Section::WebsiteStats => "websiteStats",
            Section::GeogridData => "geogridData",
            Section::GbpInsights => "gbpInsights",
            Section::BacklinksSummary => "backlinksSummary",
            Section::BacklinksTable => "backlinksTable",
            Section::BacklinksSummaryArchive => "backlinksSummaryArchive",
            Section::KeywordsSummary => "keywordsSummary",
            Section::KeywordsTable => "keywordsTable",
            Section::KeywordsSummaryArchive => "keywordsSummaryArchive",
            Section::Webhooks => "webhooks",
        }
    }

    pub fn from_name(name: &str) -> Option<Section> {
        Section::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub page_score: f64,
    pub broken_links: usize,
    pub load_time: String,
    pub mobile_friendly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalIssue {
    pub issue: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteStats {
    pub health_data: HealthData,
    pub technical_seo_data: Vec<TechnicalIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GbpInsightRow {
    pub month: String,
    pub views: i64,
    pub searches: i64,
    pub calls: i64,
    pub direction_requests: i64,
    pub website_clicks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeywordsSummary {
    pub total_keywords: usize,
    pub top3: usize,
    pub top10: usize,
    pub new_keywords: usize,
    pub improved: usize,
    pub declined: usize,
    pub lost: usize,
    pub total_volume: i64,
    pub total_traffic_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BacklinksSummary {
    pub total_backlinks: usize,
    pub referring_domains: usize,
    pub new_backlinks: usize,
    pub lost_backlinks: usize,
    pub avg_domain_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordsArchiveEntry {
    pub crawl_date: NaiveDate,
    pub top3: i64,
    pub top10: i64,
    pub top100: i64,
    pub total_volume: i64,
    pub top3_change: i64,
    pub top10_change: i64,
    pub top100_change: i64,
    pub total_volume_change: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklinksArchiveEntry {
    pub crawl_date: NaiveDate,
    pub backlinks: i64,
    pub referring_domains: i64,
    pub backlinks_change: i64,
    pub referring_domains_change: i64,
}

/// Compute the requested sections into one payload object. Each section is
/// independent; a missing table folds to that section's empty default, and
/// only a present-but-misshapen table propagates an error.
pub fn build_report(
    store: &dyn RowStore,
    sections: &[Section],
) -> Result<serde_json::Map<String, Value>> {
    let mut payload = serde_json::Map::new();
    for section in sections {
        payload.insert(section.name().to_string(), section_value(store, *section)?);
    }
    Ok(payload)
}

pub fn section_value(store: &dyn RowStore, section: Section) -> Result<Value> {
    match section {
        Section::Dashboard => dashboard(store),
        Section::WebsiteStats => website_stats(store),
        Section::GeogridData => geogrid_data(store),
        Section::GbpInsights => gbp_insights(store),
        Section::BacklinksSummary => backlinks_summary(store),
        Section::BacklinksTable => partitioned_tables(store, &BACKLINK_TABLES, map_backlink_table),
        Section::BacklinksSummaryArchive => backlinks_summary_archive(store),
        Section::KeywordsSummary => keywords_summary(store),
        Section::KeywordsTable => partitioned_tables(store, &KEYWORD_TABLES, map_keyword_table),
        Section::KeywordsSummaryArchive => keywords_summary_archive(store),
        Section::Webhooks => webhooks(store),
    }
}

fn table_or_absent<'a>(store: &'a dyn RowStore, name: &str) -> Option<&'a Table> {
    let table = store.table(name);
    if table.is_none() {
        debug!(table = name, "table absent, section uses its empty default");
    }
    table
}

fn is_client_marker(cell: &CellValue) -> bool {
    // The source data is inconsistent about casing; compare case-insensitively.
    text_or_empty(cell).eq_ignore_ascii_case("client")
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn dashboard(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, CLIENT_INFO_TABLE) else {
        return Ok(json!({ "client": ClientRecord::default(), "competitors": [] }));
    };
    let cols = CLIENT_INFO_SCHEMA.resolve(table)?;

    let mut client: Option<ClientRecord> = None;
    let mut competitors = Vec::new();
    for row in &table.rows {
        let Some(record) = map_client_record(&cols, row) else {
            continue;
        };
        if record.is_client && client.is_none() {
            client = Some(record);
        } else {
            competitors.push(record);
        }
    }

    Ok(json!({
        "client": client.unwrap_or_default(),
        "competitors": competitors,
    }))
}

fn map_client_record(cols: &ColumnMap, row: &[CellValue]) -> Option<ClientRecord> {
    let name = text_or_empty(cols.cell(row, "Name"));
    if name.is_empty() {
        return None;
    }

    let ads_link = link_url(cols.cell(row, "Ads Link"), &CellValue::EMPTY);
    let ads_running = coerce_bool(cols.cell(row, "Ads Running"));
    let ads = if ads_running || ads_link.is_some() {
        Some(AdsInfo {
            running: ads_running,
            link: ads_link.unwrap_or_default(),
        })
    } else {
        None
    };

    let social = SocialLinks {
        facebook: text_or_empty(cols.cell(row, "Facebook")),
        instagram: text_or_empty(cols.cell(row, "Instagram")),
        youtube: text_or_empty(cols.cell(row, "YouTube")),
    };
    let social = (!social.is_empty()).then_some(social);

    let notes = text_or_empty(cols.cell(row, "AI Notes"));

    Some(ClientRecord {
        name,
        address: text_or_empty(cols.cell(row, "Address")),
        city: text_or_empty(cols.cell(row, "City")),
        website: text_or_empty(cols.cell(row, "Website")),
        is_client: is_client_marker(cols.cell(row, "Account Type")),
        review_score: round2(safe_float(cols.cell(row, "Review Score"))),
        review_count: safe_int(cols.cell(row, "Review Count")),
        site_speed: text_or_na(cols.cell(row, "Site Speed")),
        hours: text_or_na(cols.cell(row, "Hours")),
        keyword_top_positions: safe_int(cols.cell(row, "Top Keyword Positions")),
        backlink_count: safe_int(cols.cell(row, "Backlinks")),
        ads,
        social,
        notes: (!notes.is_empty()).then_some(notes),
    })
}

fn website_stats(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, ON_PAGE_TABLE) else {
        return Ok(serde_json::to_value(WebsiteStats::default())?);
    };
    let cols = ON_PAGE_SCHEMA.resolve(table)?;

    // Zeroed defaults when no client row carries the discriminator.
    let mut stats = WebsiteStats::default();
    for row in &table.rows {
        if !is_client_marker(cols.cell(row, "Account Type")) {
            continue;
        }
        let broken_links = split_url_list(&text_or_empty(cols.cell(row, "Broken Links")));
        stats.health_data = HealthData {
            page_score: safe_float(cols.cell(row, "Page Score")),
            broken_links: broken_links.len(),
            load_time: text_or_na(cols.cell(row, "Load Time")),
            mobile_friendly: coerce_bool(cols.cell(row, "Mobile Friendly")),
        };
        stats.technical_seo_data = broken_links
            .into_iter()
            .map(|url| TechnicalIssue {
                issue: "broken_link".to_string(),
                url,
            })
            .collect();
        break;
    }
    Ok(serde_json::to_value(stats)?)
}

fn split_url_list(cell_text: &str) -> Vec<String> {
    cell_text
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn gbp_insights(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, GBP_TABLE) else {
        return Ok(json!([]));
    };
    let cols = GBP_SCHEMA.resolve(table)?;

    let rows: Vec<GbpInsightRow> = table
        .rows
        .iter()
        .filter_map(|row| {
            let month = text_or_empty(cols.cell(row, "Month"));
            if month.is_empty() {
                return None;
            }
            Some(GbpInsightRow {
                month,
                views: safe_int(cols.cell(row, "Views")),
                searches: safe_int(cols.cell(row, "Searches")),
                calls: safe_int(cols.cell(row, "Calls")),
                direction_requests: safe_int(cols.cell(row, "Direction Requests")),
                website_clicks: safe_int(cols.cell(row, "Website Clicks")),
            })
        })
        .collect();
    Ok(serde_json::to_value(rows)?)
}

fn geogrid_data(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, GEOGRID_TABLE) else {
        return Ok(json!({}));
    };
    let cols = GEOGRID_SCHEMA.resolve(table)?;
    let today = Utc::now().date_naive();

    let mut grouped: BTreeMap<String, Vec<GeoGridObservation>> = BTreeMap::new();
    for row in &table.rows {
        let keyword = text_or_empty(cols.cell(row, "Keyword"));
        if keyword.is_empty() {
            continue;
        }
        // Run dates fall back to today rather than dropping a whole row of
        // competitor data.
        let run_date = coerce_date(cols.cell(row, "Run Date")).unwrap_or(today);

        let mut competitors = Vec::new();
        for slot in 1..=5 {
            let name_col = table.column_index(&format!("Competitor {slot} Name"));
            let Some(name_col) = name_col else { continue };
            let name = text_or_empty(table.cell(row, name_col));
            if name.is_empty() {
                continue;
            }
            let cell_at = |header: String| {
                table
                    .column_index(&header)
                    .map(|idx| table.cell(row, idx))
                    .unwrap_or(&CellValue::EMPTY)
            };
            competitors.push(GeoGridCompetitor {
                name,
                domain: text_or_empty(cell_at(format!("Competitor {slot} Domain"))),
                rank: round2(safe_float(cell_at(format!("Competitor {slot} Rank")))),
                top5_total: safe_int(cell_at(format!("Competitor {slot} Top 5"))),
                top10_total: safe_int(cell_at(format!("Competitor {slot} Top 10"))),
            });
        }

        let normalized = keyword.trim().to_lowercase();
        grouped.entry(normalized).or_default().push(GeoGridObservation {
            keyword: keyword.trim().to_string(),
            run_date,
            competitors,
        });
    }

    // Newest first; downstream consumers assume position 0 is most recent.
    for observations in grouped.values_mut() {
        observations.sort_by(|a, b| b.run_date.cmp(&a.run_date));
    }
    Ok(serde_json::to_value(grouped)?)
}

type TableMapper = fn(&Table) -> Result<(String, Value)>;

/// Client table plus four competitor tables, keyed by a display name derived
/// from each table's website column. Absent tables are skipped.
fn partitioned_tables(
    store: &dyn RowStore,
    table_names: &[&str],
    mapper: TableMapper,
) -> Result<Value> {
    let mut out = serde_json::Map::new();
    for name in table_names {
        let Some(table) = table_or_absent(store, name) else {
            continue;
        };
        let (key, rows) = mapper(table)?;
        out.insert(key, rows);
    }
    Ok(Value::Object(out))
}

fn partition_key(table: &Table, cols: &ColumnMap) -> String {
    let website = table
        .rows
        .iter()
        .map(|row| text_or_empty(cols.cell(row, "Website")))
        .find(|w| !w.is_empty())
        .unwrap_or_default();
    let display = display_name_from_url(&website);
    if display.is_empty() {
        table.name.clone()
    } else {
        display
    }
}

fn map_keyword_table(table: &Table) -> Result<(String, Value)> {
    let cols = KEYWORD_SCHEMA.resolve(table)?;
    let rows: Vec<KeywordRow> = table
        .rows
        .iter()
        .filter_map(|row| {
            let keyword = text_or_empty(cols.cell(row, "Keyword"));
            if keyword.is_empty() {
                return None;
            }
            Some(KeywordRow {
                keyword,
                position: safe_int(cols.cell(row, "Position")),
                previous_position: safe_int(cols.cell(row, "Previous Position")),
                is_new: coerce_bool(cols.cell(row, "New")),
                is_up: coerce_bool(cols.cell(row, "Up")),
                is_down: coerce_bool(cols.cell(row, "Down")),
                is_lost: coerce_bool(cols.cell(row, "Lost")),
                search_volume: safe_int(cols.cell(row, "Search Volume")),
                cpc: round2(safe_float(cols.cell(row, "CPC"))),
                traffic_value: round2(safe_float(cols.cell(row, "Traffic Value"))),
            })
        })
        .collect();
    Ok((partition_key(table, &cols), serde_json::to_value(rows)?))
}

fn map_backlink_table(table: &Table) -> Result<(String, Value)> {
    let cols = BACKLINK_SCHEMA.resolve(table)?;
    let rows: Vec<BacklinkRow> = table
        .rows
        .iter()
        .filter_map(|row| {
            let source_url = link_url(
                cols.cell(row, "Source URL"),
                cols.cell(row, "Source URL Text"),
            )?;
            Some(BacklinkRow {
                source_url,
                domain_rating: round2(safe_float(cols.cell(row, "Domain Rating"))),
                first_seen: coerce_date(cols.cell(row, "First Seen")),
                is_new: coerce_bool(cols.cell(row, "New")),
                is_lost: coerce_bool(cols.cell(row, "Lost")),
                traffic_value: round2(safe_float(cols.cell(row, "Traffic Value"))),
            })
        })
        .collect();
    Ok((partition_key(table, &cols), serde_json::to_value(rows)?))
}

fn keywords_summary(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, KEYWORD_TABLES[0]) else {
        return Ok(serde_json::to_value(KeywordsSummary::default())?);
    };
    let cols = KEYWORD_SCHEMA.resolve(table)?;

    let mut summary = KeywordsSummary::default();
    for row in &table.rows {
        if text_or_empty(cols.cell(row, "Keyword")).is_empty() {
            continue;
        }
        let position = safe_int(cols.cell(row, "Position"));
        summary.total_keywords += 1;
        if (1..=3).contains(&position) {
            summary.top3 += 1;
        }
        if (1..=10).contains(&position) {
            summary.top10 += 1;
        }
        if coerce_bool(cols.cell(row, "New")) {
            summary.new_keywords += 1;
        }
        if coerce_bool(cols.cell(row, "Up")) {
            summary.improved += 1;
        }
        if coerce_bool(cols.cell(row, "Down")) {
            summary.declined += 1;
        }
        if coerce_bool(cols.cell(row, "Lost")) {
            summary.lost += 1;
        }
        summary.total_volume += safe_int(cols.cell(row, "Search Volume"));
        summary.total_traffic_value += safe_float(cols.cell(row, "Traffic Value"));
    }
    summary.total_traffic_value = round2(summary.total_traffic_value);
    Ok(serde_json::to_value(summary)?)
}

fn backlinks_summary(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, BACKLINK_TABLES[0]) else {
        return Ok(serde_json::to_value(BacklinksSummary::default())?);
    };
    let cols = BACKLINK_SCHEMA.resolve(table)?;

    let mut summary = BacklinksSummary::default();
    let mut domains = BTreeSet::new();
    let mut rating_sum = 0.0;
    for row in &table.rows {
        let Some(source_url) = link_url(
            cols.cell(row, "Source URL"),
            cols.cell(row, "Source URL Text"),
        ) else {
            continue;
        };
        summary.total_backlinks += 1;
        domains.insert(display_name_from_url(&source_url).to_lowercase());
        if coerce_bool(cols.cell(row, "New")) {
            summary.new_backlinks += 1;
        }
        if coerce_bool(cols.cell(row, "Lost")) {
            summary.lost_backlinks += 1;
        }
        rating_sum += safe_float(cols.cell(row, "Domain Rating"));
    }
    summary.referring_domains = domains.len();
    if summary.total_backlinks > 0 {
        summary.avg_domain_rating = round2(rating_sum / summary.total_backlinks as f64);
    }
    Ok(serde_json::to_value(summary)?)
}

fn keywords_summary_archive(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, KEYWORDS_ARCHIVE_TABLE) else {
        return Ok(json!([]));
    };
    let cols = KEYWORDS_ARCHIVE_SCHEMA.resolve(table)?;

    let mut snapshots: Vec<(NaiveDate, [i64; 4])> = table
        .rows
        .iter()
        .filter_map(|row| {
            let crawl_date = coerce_date(cols.cell(row, "Crawl Date"))?;
            Some((
                crawl_date,
                [
                    safe_int(cols.cell(row, "Top 3")),
                    safe_int(cols.cell(row, "Top 10")),
                    safe_int(cols.cell(row, "Top 100")),
                    safe_int(cols.cell(row, "Total Volume")),
                ],
            ))
        })
        .collect();
    snapshots.sort_by(|a, b| b.0.cmp(&a.0));

    let entries: Vec<KeywordsArchiveEntry> = snapshots
        .iter()
        .enumerate()
        .map(|(i, (crawl_date, metrics))| {
            // Deltas compare against the next older snapshot; the oldest has none.
            let older = snapshots.get(i + 1).map(|(_, m)| *m).unwrap_or(*metrics);
            KeywordsArchiveEntry {
                crawl_date: *crawl_date,
                top3: metrics[0],
                top10: metrics[1],
                top100: metrics[2],
                total_volume: metrics[3],
                top3_change: metrics[0] - older[0],
                top10_change: metrics[1] - older[1],
                top100_change: metrics[2] - older[2],
                total_volume_change: metrics[3] - older[3],
            }
        })
        .collect();
    Ok(serde_json::to_value(entries)?)
}

fn backlinks_summary_archive(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, BACKLINKS_ARCHIVE_TABLE) else {
        return Ok(json!([]));
    };
    let cols = BACKLINKS_ARCHIVE_SCHEMA.resolve(table)?;

    let mut snapshots: Vec<(NaiveDate, i64, i64)> = table
        .rows
        .iter()
        .filter_map(|row| {
            let crawl_date = coerce_date(cols.cell(row, "Crawl Date"))?;
            Some((
                crawl_date,
                safe_int(cols.cell(row, "Backlinks")),
                safe_int(cols.cell(row, "Referring Domains")),
            ))
        })
        .collect();
    snapshots.sort_by(|a, b| b.0.cmp(&a.0));

    let entries: Vec<BacklinksArchiveEntry> = snapshots
        .iter()
        .enumerate()
        .map(|(i, (crawl_date, backlinks, domains))| {
            let (older_backlinks, older_domains) = snapshots
                .get(i + 1)
                .map(|(_, b, d)| (*b, *d))
                .unwrap_or((*backlinks, *domains));
            BacklinksArchiveEntry {
                crawl_date: *crawl_date,
                backlinks: *backlinks,
                referring_domains: *domains,
                backlinks_change: backlinks - older_backlinks,
                referring_domains_change: domains - older_domains,
            }
        })
        .collect();
    Ok(serde_json::to_value(entries)?)
}

fn webhooks(store: &dyn RowStore) -> Result<Value> {
    let Some(table) = table_or_absent(store, CONFIG_TABLE) else {
        return Ok(json!({}));
    };
    let cols = CONFIG_SCHEMA.resolve(table)?;

    let mut out = serde_json::Map::new();
    for row in &table.rows {
        let name = text_or_empty(cols.cell(row, "Name"));
        if name.is_empty() {
            continue;
        }
        let Some(url) = link_url(cols.cell(row, "URL"), &CellValue::EMPTY) else {
            continue;
        };
        out.insert(name, Value::String(url));
    }
    Ok(Value::Object(out))
}
