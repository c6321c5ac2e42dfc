// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! File index: what the organizer knows about files on disk
//!
//! Removing a record from the index never deletes the file itself.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::query::ParsedQuery;
use crate::{OrganizerError, Result};

/// Database manager (thread-safe wrapper)
#[derive(Clone)]
pub struct FileIndex {
    conn: Arc<Mutex<Connection>>,
}

/// An indexed file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: u64,
    pub category: Option<String>,
    pub label: Option<String>,
    pub tags: Vec<String>,
    pub caption: Option<String>,
    pub content_hash: Option<String>,
    pub ai_source: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

/// Fields written when a file is (re)indexed
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub file_path: String,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: u64,
    pub category: Option<String>,
    pub label: Option<String>,
    pub tags: Vec<String>,
    pub caption: Option<String>,
    pub content_hash: Option<String>,
    pub ai_source: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemoveStats {
    pub removed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TagStats {
    pub updated: usize,
    pub errors: usize,
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: i64,
    pub category_count: i64,
    pub total_bytes: i64,
}

const COLUMNS: &str = "id, file_path, file_name, file_extension, file_size, category, label, \
                       tags, caption, content_hash, ai_source, created_date, modified_date, last_indexed_at";

fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Escape LIKE wildcards so user words match literally
fn escape_like(word: &str) -> String {
    word.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn from_db_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Tags may be stored as a JSON list or as a comma-separated string
pub fn parse_tags_value(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Ok(serde_json::Value::String(s)) => vec![s],
        _ => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let tags: Option<String> = row.get(7)?;
    Ok(FileRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        file_extension: row.get(3)?,
        file_size: row.get::<_, i64>(4)?.max(0) as u64,
        category: row.get(5)?,
        label: row.get(6)?,
        tags: tags.as_deref().map(parse_tags_value).unwrap_or_default(),
        caption: row.get(8)?,
        content_hash: row.get(9)?,
        ai_source: row.get(10)?,
        created_date: from_db_time(row.get(11)?),
        modified_date: from_db_time(row.get(12)?),
        last_indexed_at: from_db_time(row.get(13)?),
    })
}

impl FileIndex {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| OrganizerError::Index("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL UNIQUE,
                file_name TEXT NOT NULL,
                file_extension TEXT NOT NULL DEFAULT '',
                file_size INTEGER NOT NULL DEFAULT 0,
                category TEXT,
                label TEXT,
                tags TEXT DEFAULT '[]',
                caption TEXT,
                content_hash TEXT,
                ai_source TEXT,
                created_date TEXT,
                modified_date TEXT,
                last_indexed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash);
            CREATE INDEX IF NOT EXISTS idx_files_category ON files(category);
            CREATE INDEX IF NOT EXISTS idx_files_modified ON files(modified_date);
        "#)?;
        Ok(())
    }

    /// Insert or refresh a file by path, returning its id
    pub fn upsert_file(&self, file: &NewFile) -> Result<i64> {
        let conn = self.lock_conn()?;
        let tags_json = serde_json::to_string(&file.tags)?;
        let now = to_db_time(&Utc::now());

        conn.execute(
            r#"INSERT INTO files (file_path, file_name, file_extension, file_size, category, label,
                                  tags, caption, content_hash, ai_source, created_date, modified_date, last_indexed_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
               ON CONFLICT(file_path) DO UPDATE SET
                   file_name = excluded.file_name,
                   file_extension = excluded.file_extension,
                   file_size = excluded.file_size,
                   category = excluded.category,
                   label = COALESCE(excluded.label, files.label),
                   tags = excluded.tags,
                   caption = COALESCE(excluded.caption, files.caption),
                   content_hash = excluded.content_hash,
                   ai_source = COALESCE(excluded.ai_source, files.ai_source),
                   created_date = excluded.created_date,
                   modified_date = excluded.modified_date,
                   last_indexed_at = excluded.last_indexed_at"#,
            params![
                file.file_path,
                file.file_name,
                file.file_extension,
                file.file_size as i64,
                file.category,
                file.label,
                tags_json,
                file.caption,
                file.content_hash,
                file.ai_source,
                file.created_date.as_ref().map(to_db_time),
                file.modified_date.as_ref().map(to_db_time),
                now,
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM files WHERE file_path = ?1",
            params![file.file_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_file(&self, id: i64) -> Result<Option<FileRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM files WHERE id = ?1", COLUMNS);
        Ok(conn.query_row(&sql, params![id], record_from_row).optional()?)
    }

    pub fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM files WHERE file_path = ?1", COLUMNS);
        Ok(conn.query_row(&sql, params![path], record_from_row).optional()?)
    }

    /// Point a record at its new location after a move
    pub fn update_file_path(&self, id: i64, new_path: &Path) -> Result<bool> {
        let conn = self.lock_conn()?;
        let name = new_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let changed = conn.execute(
            "UPDATE files SET file_path = ?1, file_name = ?2 WHERE id = ?3",
            params![new_path.to_string_lossy(), name, id],
        )?;
        Ok(changed > 0)
    }

    /// Remove records by id; files on disk are untouched
    pub fn remove_from_index(&self, ids: &[i64]) -> Result<RemoveStats> {
        let mut stats = RemoveStats::default();
        if ids.is_empty() {
            return Ok(stats);
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        for id in ids {
            match tx.execute("DELETE FROM files WHERE id = ?1", params![id]) {
                Ok(1) => stats.removed += 1,
                Ok(_) => stats.errors += 1,
                Err(e) => {
                    error!("Error removing file ID {}: {}", id, e);
                    stats.errors += 1;
                }
            }
        }
        tx.commit()?;
        info!("Removed {} files from index", stats.removed);
        Ok(stats)
    }

    /// Append tags to many files, without duplicates
    pub fn batch_add_tags(&self, ids: &[i64], new_tags: &[String]) -> Result<TagStats> {
        let mut stats = TagStats::default();
        if ids.is_empty() || new_tags.is_empty() {
            return Ok(stats);
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        for id in ids {
            let current: Option<Option<String>> = tx
                .query_row("SELECT tags FROM files WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;

            let Some(current) = current else {
                stats.errors += 1;
                continue;
            };

            let mut merged = current.as_deref().map(parse_tags_value).unwrap_or_default();
            let mut seen: BTreeSet<String> = merged.iter().cloned().collect();
            for tag in new_tags {
                let tag = tag.trim();
                if !tag.is_empty() && seen.insert(tag.to_string()) {
                    merged.push(tag.to_string());
                }
            }

            tx.execute(
                "UPDATE files SET tags = ?1 WHERE id = ?2",
                params![serde_json::to_string(&merged)?, id],
            )?;
            stats.updated += 1;
        }
        tx.commit()?;
        info!("Added tags to {} files", stats.updated);
        Ok(stats)
    }

    pub fn get_file_paths(&self, ids: &[i64]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("SELECT file_path FROM files WHERE id IN ({}) ORDER BY id", placeholders);
        let mut stmt = conn.prepare(&sql)?;
        let paths = stmt
            .query_map(params_from_iter(ids.iter()), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Search by free text, date range and extension filters
    pub fn search(&self, query: &ParsedQuery, limit: usize) -> Result<Vec<FileRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        for word in query.clean_query.split_whitespace() {
            clauses.push(
                "(file_name LIKE ? ESCAPE '\\' OR file_path LIKE ? ESCAPE '\\' \
                 OR IFNULL(label,'') LIKE ? ESCAPE '\\' OR IFNULL(caption,'') LIKE ? ESCAPE '\\' \
                 OR IFNULL(tags,'') LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            let pattern = format!("%{}%", escape_like(word));
            args.extend(std::iter::repeat(pattern).take(5));
        }

        if let Some((start, end)) = &query.date_range {
            clauses.push("modified_date >= ? AND modified_date < ?".to_string());
            args.push(to_db_time(start));
            args.push(to_db_time(end));
        }

        if let Some(exts) = query.extensions.as_ref().filter(|e| !e.is_empty()) {
            clauses.push(format!("file_extension IN ({})", vec!["?"; exts.len()].join(",")));
            args.extend(exts.iter().cloned());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM files {} ORDER BY modified_date DESC, id DESC LIMIT {}",
            COLUMNS, where_sql, limit
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let files = stmt
            .query_map(params_from_iter(args.iter()), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<FileRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM files ORDER BY last_indexed_at DESC, id DESC LIMIT ?1",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![limit as i64], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn get_category_stats(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT COALESCE(category, 'Uncategorized') AS cat, COUNT(*) AS cnt
               FROM files GROUP BY cat ORDER BY cnt DESC, cat"#
        )?;
        let stats = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<IndexStats> {
        let conn = self.lock_conn()?;
        let file_count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        let category_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT category) FROM files WHERE category IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        let total_bytes: i64 =
            conn.query_row("SELECT COALESCE(SUM(file_size), 0) FROM files", [], |row| row.get(0))?;
        Ok(IndexStats { file_count, category_count, total_bytes })
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_file(path: &str, ext: &str) -> NewFile {
        NewFile {
            file_path: path.to_string(),
            file_name: Path::new(path).file_name().unwrap().to_string_lossy().to_string(),
            file_extension: ext.to_string(),
            file_size: 10,
            category: Some("Documents".to_string()),
            ..NewFile::default()
        }
    }

    #[test]
    fn test_upsert_keeps_id() {
        let db = FileIndex::in_memory().unwrap();
        let id = db.upsert_file(&new_file("/d/a.pdf", ".pdf")).unwrap();
        let mut again = new_file("/d/a.pdf", ".pdf");
        again.file_size = 99;
        assert_eq!(db.upsert_file(&again).unwrap(), id);
        assert_eq!(db.get_file(id).unwrap().unwrap().file_size, 99);
    }

    #[test]
    fn test_upsert_preserves_ai_fields() {
        let db = FileIndex::in_memory().unwrap();
        let mut first = new_file("/d/cat.jpg", ".jpg");
        first.label = Some("cat".to_string());
        first.caption = Some("a cat on a sofa".to_string());
        let id = db.upsert_file(&first).unwrap();

        db.upsert_file(&new_file("/d/cat.jpg", ".jpg")).unwrap();
        let record = db.get_file(id).unwrap().unwrap();
        assert_eq!(record.label.as_deref(), Some("cat"));
        assert_eq!(record.caption.as_deref(), Some("a cat on a sofa"));
    }

    #[test]
    fn test_update_path() {
        let db = FileIndex::in_memory().unwrap();
        let id = db.upsert_file(&new_file("/d/a.pdf", ".pdf")).unwrap();
        assert!(db.update_file_path(id, Path::new("/d/docs/b.pdf")).unwrap());
        let record = db.get_file_by_path("/d/docs/b.pdf").unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.file_name, "b.pdf");
        assert!(db.get_file_by_path("/d/a.pdf").unwrap().is_none());
    }

    #[test]
    fn test_remove_counts_missing_as_errors() {
        let db = FileIndex::in_memory().unwrap();
        let a = db.upsert_file(&new_file("/d/a.pdf", ".pdf")).unwrap();
        let stats = db.remove_from_index(&[a, 999]).unwrap();
        assert_eq!(stats, RemoveStats { removed: 1, errors: 1 });
        assert_eq!(db.get_stats().unwrap().file_count, 0);
    }

    #[test]
    fn test_batch_add_tags_merges() {
        let db = FileIndex::in_memory().unwrap();
        let mut f = new_file("/d/a.pdf", ".pdf");
        f.tags = vec!["finance".to_string()];
        let id = db.upsert_file(&f).unwrap();

        let stats = db
            .batch_add_tags(&[id, 42], &["finance".to_string(), "2024".to_string()])
            .unwrap();
        assert_eq!(stats, TagStats { updated: 1, errors: 1 });
        assert_eq!(db.get_file(id).unwrap().unwrap().tags, vec!["finance", "2024"]);
    }

    #[test]
    fn test_parse_tags_value_formats() {
        assert_eq!(parse_tags_value(r#"["a", "b"]"#), vec!["a", "b"]);
        assert_eq!(parse_tags_value("a, b ,,c"), vec!["a", "b", "c"]);
        assert!(parse_tags_value("").is_empty());
    }

    #[test]
    fn test_get_file_paths() {
        let db = FileIndex::in_memory().unwrap();
        let a = db.upsert_file(&new_file("/d/a.pdf", ".pdf")).unwrap();
        let b = db.upsert_file(&new_file("/d/b.pdf", ".pdf")).unwrap();
        assert_eq!(db.get_file_paths(&[b, a]).unwrap(), vec!["/d/a.pdf", "/d/b.pdf"]);
        assert!(db.get_file_paths(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_search_filters() {
        let db = FileIndex::in_memory().unwrap();
        let mut invoice = new_file("/d/invoice_march.pdf", ".pdf");
        invoice.modified_date = Some(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap());
        db.upsert_file(&invoice).unwrap();

        let mut photo = new_file("/d/beach.jpg", ".jpg");
        photo.label = Some("invoice photo".to_string());
        photo.modified_date = Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        db.upsert_file(&photo).unwrap();

        let text_only = ParsedQuery::plain("invoice");
        assert_eq!(db.search(&text_only, 10).unwrap().len(), 2);

        let mut pdfs = ParsedQuery::plain("invoice");
        pdfs.extensions = Some(vec![".pdf".to_string()]);
        let hits = db.search(&pdfs, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "invoice_march.pdf");

        let mut june = ParsedQuery::plain("");
        june.date_range = Some((
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
        ));
        let hits = db.search(&june, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "beach.jpg");
    }

    #[test]
    fn test_search_wildcards_match_literally() {
        let db = FileIndex::in_memory().unwrap();
        db.upsert_file(&new_file("/d/report_2024.pdf", ".pdf")).unwrap();
        db.upsert_file(&new_file("/d/reportX2024.pdf", ".pdf")).unwrap();
        db.upsert_file(&new_file("/d/50%off.pdf", ".pdf")).unwrap();
        db.upsert_file(&new_file("/d/500ff.pdf", ".pdf")).unwrap();

        let hits = db.search(&ParsedQuery::plain("report_2024"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "report_2024.pdf");

        let hits = db.search(&ParsedQuery::plain("50%off"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_name, "50%off.pdf");

        assert_eq!(db.search(&ParsedQuery::plain("%"), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c\\d"), "a\\_b\\%c\\\\d");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_stats_count_files_and_categories() {
        let db = FileIndex::in_memory().unwrap();
        db.upsert_file(&new_file("/w/in/a.pdf", ".pdf")).unwrap();
        db.upsert_file(&new_file("/w/out/b.pdf", ".pdf")).unwrap();

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.total_bytes, 20);
        assert_eq!(db.get_category_stats().unwrap(), vec![("Documents".to_string(), 2)]);
    }
}
