//! Row store abstraction, fixture-backed workbooks, and the report cache.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use seodash_core::CellValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "seodash-store";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// One named table: a header row plus data rows of untyped cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Header-based column lookup, case-insensitive and trimmed. Preferred
    /// over positional offsets wherever headers are available.
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(header.trim()))
    }

    /// Cell at (row, column); out-of-range reads fold to the empty cell so
    /// ragged fixture rows never panic.
    pub fn cell<'a>(&self, row: &'a [CellValue], index: usize) -> &'a CellValue {
        row.get(index).unwrap_or(&CellValue::EMPTY)
    }
}

/// Abstract tabular source addressable by table name. A missing table is an
/// ordinary `None`, never an error.
pub trait RowStore: Send + Sync {
    fn table(&self, name: &str) -> Option<&Table>;
    fn table_names(&self) -> Vec<String>;
}

/// Workbook held entirely in memory, loaded from a JSON fixture file.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkbook {
    tables: HashMap<String, Table>,
}

#[derive(Debug, Deserialize)]
struct WorkbookFixture {
    tables: Vec<Table>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: Vec<Table>) -> Self {
        let mut workbook = Self::new();
        for table in tables {
            workbook.insert(table);
        }
        workbook
    }

    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.name.to_ascii_lowercase(), table);
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading workbook fixture {}", path.display()))?;
        let fixture: WorkbookFixture = serde_json::from_str(&text)
            .with_context(|| format!("parsing workbook fixture {}", path.display()))?;
        Ok(Self::from_tables(fixture.tables))
    }
}

impl RowStore for InMemoryWorkbook {
    fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.values().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no workbook registered under id {0:?}")]
    UnknownWorkbook(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// YAML registry mapping opaque workbook ids to fixture paths, in the shape:
///
/// ```yaml
/// workbooks:
///   - workbook_id: demo-clinic
///     display_name: Demo Clinic
///     path: fixtures/demo-clinic/workbook.json
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WorkbookRegistry {
    pub workbooks: Vec<WorkbookConfig>,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkbookConfig {
    pub workbook_id: String,
    pub display_name: String,
    pub path: PathBuf,
}

impl WorkbookRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading workbook registry {}", path.display()))?;
        let mut registry: WorkbookRegistry = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing workbook registry {}", path.display()))?;
        registry.base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(registry)
    }

    pub fn config(&self, workbook_id: &str) -> Option<&WorkbookConfig> {
        self.workbooks
            .iter()
            .find(|w| w.workbook_id == workbook_id)
    }

    /// Open a registered workbook, resolving relative fixture paths against
    /// the registry file's directory.
    pub fn open(&self, workbook_id: &str) -> Result<InMemoryWorkbook, StoreError> {
        let config = self
            .config(workbook_id)
            .ok_or_else(|| StoreError::UnknownWorkbook(workbook_id.to_string()))?;
        let path = if config.path.is_absolute() {
            config.path.clone()
        } else {
            self.base_dir.join(&config.path)
        };
        Ok(InMemoryWorkbook::load(path)?)
    }
}

/// Cache key for one computed section of one workbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub workbook_id: String,
    pub section: String,
}

impl CacheKey {
    pub fn new(workbook_id: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            workbook_id: workbook_id.into(),
            section: section.into(),
        }
    }

    pub fn composite(&self) -> String {
        format!("{}::{}", self.workbook_id, self.section)
    }
}

/// Get/put/expire cache for serialized section payloads. Writes are
/// best-effort; a failed write must never fail the request.
pub trait ReportCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<String>;
    fn put(&self, key: CacheKey, value: String);
    fn expire(&self, key: &CacheKey);
}

#[derive(Debug)]
struct CacheSlot {
    inserted_at: Instant,
    value: String,
}

/// TTL cache over a mutex-guarded map. Last writer wins; values are derived
/// and idempotent, so a race at worst recomputes.
#[derive(Debug)]
pub struct InMemoryTtlCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, CacheSlot>>,
}

impl InMemoryTtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ReportCache for InMemoryTtlCache {
    fn get(&self, key: &CacheKey) -> Option<String> {
        let mut slots = self.slots.lock().ok()?;
        let composite = key.composite();
        match slots.get(&composite) {
            Some(slot) if slot.inserted_at.elapsed() < self.ttl => Some(slot.value.clone()),
            Some(_) => {
                slots.remove(&composite);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: CacheKey, value: String) {
        match self.slots.lock() {
            Ok(mut slots) => {
                slots.insert(
                    key.composite(),
                    CacheSlot {
                        inserted_at: Instant::now(),
                        value,
                    },
                );
            }
            Err(_) => warn!(key = %key.composite(), "cache write skipped, lock poisoned"),
        }
    }

    fn expire(&self, key: &CacheKey) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(&key.composite());
        }
    }
}

/// Cache that never stores anything; used when a request sets the bypass flag.
#[derive(Debug, Default)]
pub struct NoopCache;

impl ReportCache for NoopCache {
    fn get(&self, _key: &CacheKey) -> Option<String> {
        None
    }

    fn put(&self, _key: CacheKey, _value: String) {}

    fn expire(&self, _key: &CacheKey) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mk_table(name: &str) -> Table {
        Table {
            name: name.to_string(),
            headers: vec!["Keyword".into(), "Search Volume".into()],
            rows: vec![vec![
                CellValue::Text("botox near me".into()),
                CellValue::Number(500.0),
            ]],
        }
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let workbook = InMemoryWorkbook::from_tables(vec![mk_table("Keywords")]);
        assert!(workbook.table("keywords").is_some());
        assert!(workbook.table("KEYWORDS").is_some());
        assert!(workbook.table("Backlinks").is_none());
    }

    #[test]
    fn column_index_matches_headers_case_insensitively() {
        let table = mk_table("Keywords");
        assert_eq!(table.column_index("search volume"), Some(1));
        assert_eq!(table.column_index(" KEYWORD "), Some(0));
        assert_eq!(table.column_index("CPC"), None);
    }

    #[test]
    fn out_of_range_cells_fold_to_empty() {
        let table = mk_table("Keywords");
        let row = &table.rows[0];
        assert_eq!(table.cell(row, 9), &CellValue::EMPTY);
    }

    #[test]
    fn registry_resolves_relative_fixture_paths() {
        let dir = tempfile::tempdir().unwrap();
        let workbook_json = serde_json::json!({
            "tables": [{
                "name": "Keywords",
                "headers": ["Keyword", "Search Volume"],
                "rows": [["botox near me", 500]]
            }]
        });
        std::fs::create_dir_all(dir.path().join("fixtures")).unwrap();
        std::fs::write(
            dir.path().join("fixtures/wb.json"),
            serde_json::to_vec_pretty(&workbook_json).unwrap(),
        )
        .unwrap();
        let mut registry_file = std::fs::File::create(dir.path().join("workbooks.yaml")).unwrap();
        writeln!(
            registry_file,
            "workbooks:\n  - workbook_id: demo\n    display_name: Demo\n    path: fixtures/wb.json"
        )
        .unwrap();

        let registry = WorkbookRegistry::load(dir.path().join("workbooks.yaml")).unwrap();
        let workbook = registry.open("demo").unwrap();
        assert_eq!(workbook.table("Keywords").unwrap().rows.len(), 1);

        match registry.open("missing") {
            Err(StoreError::UnknownWorkbook(id)) => assert_eq!(id, "missing"),
            other => panic!("expected UnknownWorkbook, got {other:?}"),
        }
    }

    #[test]
    fn ttl_cache_hits_within_ttl_and_expires_after() {
        let cache = InMemoryTtlCache::new(Duration::from_secs(60));
        let key = CacheKey::new("wb", "dashboard");
        cache.put(key.clone(), "{\"ok\":true}".into());
        assert_eq!(cache.get(&key).as_deref(), Some("{\"ok\":true}"));

        let stale = InMemoryTtlCache::new(Duration::ZERO);
        stale.put(key.clone(), "{}".into());
        assert_eq!(stale.get(&key), None);
    }

    #[test]
    fn expire_removes_only_the_given_key() {
        let cache = InMemoryTtlCache::new(Duration::from_secs(60));
        let a = CacheKey::new("wb", "dashboard");
        let b = CacheKey::new("wb", "keywordsTable");
        cache.put(a.clone(), "a".into());
        cache.put(b.clone(), "b".into());
        cache.expire(&a);
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b).as_deref(), Some("b"));
    }
}
