use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::open_db_connection;

/// Page size for `latest` when the caller does not give one.
pub const DEFAULT_LATEST_LIMIT: usize = 50;
/// Number of plate texts reported by `stats`.
pub const TOP_PLATES: usize = 5;

/// One accepted plate read, as handed to the sink.
#[derive(Clone, Debug, PartialEq)]
pub struct PlateRecord {
    pub frame_number: u64,
    pub plate_text: String,
    pub plate_image_path: String,
    pub detected_at: NaiveDateTime,
}

/// A persisted plate row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredPlate {
    pub id: i64,
    pub frame_number: u64,
    pub plate_text: String,
    pub plate_image_path: String,
    pub detected_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DayCount {
    /// `YYYY-MM-DD`
    pub d: String,
    pub c: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlateCount {
    pub label: String,
    pub c: u64,
}

/// Violations per day (ascending) and the most frequent plate texts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlateStats {
    pub bar: Vec<DayCount>,
    pub pie: Vec<PlateCount>,
}

pub trait PlateStore: Send {
    fn insert(&mut self, record: &PlateRecord) -> Result<i64>;

    /// Newest first. `query` is a case-insensitive substring of the plate text.
    fn latest(&mut self, limit: usize, query: Option<&str>) -> Result<Vec<StoredPlate>>;

    fn stats(&mut self) -> Result<PlateStats>;
}

pub struct SqlitePlateStore {
    conn: Connection,
}

impl SqlitePlateStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS plates (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              frame_number INTEGER NOT NULL,
              plate_text TEXT NOT NULL,
              plate_image_path TEXT NOT NULL,
              detected_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_plates_detected ON plates(detected_at);
            "#,
        )?;
        Ok(())
    }
}

impl PlateStore for SqlitePlateStore {
    fn insert(&mut self, record: &PlateRecord) -> Result<i64> {
        let frame_number = i64::try_from(record.frame_number)
            .map_err(|_| anyhow!("frame number exceeds i64 range"))?;
        self.conn.execute(
            "INSERT INTO plates(frame_number, plate_text, plate_image_path, detected_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                frame_number,
                record.plate_text,
                record.plate_image_path,
                record.detected_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn latest(&mut self, limit: usize, query: Option<&str>) -> Result<Vec<StoredPlate>> {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let mut stmt = self.conn.prepare(
            "SELECT id, frame_number, plate_text, plate_image_path, detected_at FROM plates \
             WHERE ?2 IS NULL OR instr(upper(plate_text), upper(?2)) > 0 \
             ORDER BY id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64, query])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let frame_number: i64 = row.get(1)?;
            out.push(StoredPlate {
                id: row.get(0)?,
                frame_number: u64::try_from(frame_number)
                    .map_err(|_| anyhow!("corrupt plate row: negative frame number"))?,
                plate_text: row.get(2)?,
                plate_image_path: row.get(3)?,
                detected_at: row.get(4)?,
            });
        }
        Ok(out)
    }

    fn stats(&mut self) -> Result<PlateStats> {
        let mut bar = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT substr(detected_at, 1, 10) AS d, COUNT(*) FROM plates GROUP BY d ORDER BY d ASC",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let c: i64 = row.get(1)?;
                bar.push(DayCount {
                    d: row.get(0)?,
                    c: c as u64,
                });
            }
        }

        let mut pie = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT plate_text, COUNT(*) AS c FROM plates GROUP BY plate_text \
                 ORDER BY c DESC, plate_text ASC LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![TOP_PLATES as i64])?;
            while let Some(row) = rows.next()? {
                let c: i64 = row.get(1)?;
                pie.push(PlateCount {
                    label: row.get(0)?,
                    c: c as u64,
                });
            }
        }

        Ok(PlateStats { bar, pie })
    }
}

/// Process-local store. Clones share the same rows.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPlateStore {
    rows: Arc<Mutex<Vec<StoredPlate>>>,
}

impl InMemoryPlateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Result<Vec<StoredPlate>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("plate store lock poisoned"))?;
        Ok(rows.clone())
    }
}

impl PlateStore for InMemoryPlateStore {
    fn insert(&mut self, record: &PlateRecord) -> Result<i64> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("plate store lock poisoned"))?;
        let id = rows.len() as i64 + 1;
        rows.push(StoredPlate {
            id,
            frame_number: record.frame_number,
            plate_text: record.plate_text.clone(),
            plate_image_path: record.plate_image_path.clone(),
            detected_at: record.detected_at,
        });
        Ok(id)
    }

    fn latest(&mut self, limit: usize, query: Option<&str>) -> Result<Vec<StoredPlate>> {
        let needle = query
            .map(|q| q.trim().to_ascii_uppercase())
            .filter(|q| !q.is_empty());
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("plate store lock poisoned"))?;
        Ok(rows
            .iter()
            .rev()
            .filter(|row| match &needle {
                Some(n) => row.plate_text.to_ascii_uppercase().contains(n.as_str()),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn stats(&mut self) -> Result<PlateStats> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("plate store lock poisoned"))?;
        let mut per_day: BTreeMap<String, u64> = BTreeMap::new();
        let mut per_plate: BTreeMap<&str, u64> = BTreeMap::new();
        for row in rows.iter() {
            *per_day
                .entry(row.detected_at.format("%Y-%m-%d").to_string())
                .or_default() += 1;
            *per_plate.entry(row.plate_text.as_str()).or_default() += 1;
        }
        let bar = per_day.into_iter().map(|(d, c)| DayCount { d, c }).collect();
        let mut pie: Vec<PlateCount> = per_plate
            .into_iter()
            .map(|(label, c)| PlateCount {
                label: label.to_string(),
                c,
            })
            .collect();
        // stable sort keeps the alphabetical order among equal counts
        pie.sort_by(|a, b| b.c.cmp(&a.c));
        pie.truncate(TOP_PLATES);
        Ok(PlateStats { bar, pie })
    }
}

/// At-most-once write of accepted plates.
///
/// A sink without a backend accepts writes and drops them; the pipeline runs
/// the same either way, only without durability.
pub struct PersistenceSink {
    store: Mutex<Option<Box<dyn PlateStore>>>,
    configured: bool,
}

impl PersistenceSink {
    pub fn new(store: Box<dyn PlateStore>) -> Self {
        Self {
            store: Mutex::new(Some(store)),
            configured: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: Mutex::new(None),
            configured: false,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Append one record. Returns the row id, or `None` when no backend is
    /// configured or the sink was closed.
    pub fn write(&self, record: &PlateRecord) -> Result<Option<i64>> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| anyhow!("persistence lock poisoned"))?;
        match store.as_mut() {
            Some(store) => Ok(Some(store.insert(record)?)),
            None => Ok(None),
        }
    }

    /// Drop the backend connection. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| anyhow!("persistence lock poisoned"))?;
        if store.take().is_some() {
            log::info!("plate storage closed");
        }
        Ok(())
    }
}
