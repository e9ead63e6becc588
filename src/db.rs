use std::fs;
use std::path::Path;

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::crawl::PeriodReport;
use crate::reconcile::IdentityMap;
use crate::sync::{BatchFailure, SyncReport};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS identities (
            slug       TEXT PRIMARY KEY,
            store_id   TEXT UNIQUE NOT NULL,
            synced_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sync_runs (
            id             INTEGER PRIMARY KEY,
            kind           TEXT NOT NULL,
            dry_run        BOOLEAN NOT NULL DEFAULT 0,
            inserted       INTEGER NOT NULL DEFAULT 0,
            updated        INTEGER NOT NULL DEFAULT 0,
            skipped        INTEGER NOT NULL DEFAULT 0,
            failed_batches INTEGER NOT NULL DEFAULT 0,
            started_at     TEXT NOT NULL DEFAULT (datetime('now')),
            finished_at    TEXT
        );

        CREATE TABLE IF NOT EXISTS batch_failures (
            id          INTEGER PRIMARY KEY,
            run_id      INTEGER NOT NULL REFERENCES sync_runs(id),
            batch_index INTEGER NOT NULL,
            batch_size  INTEGER NOT NULL,
            error       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_failures_run ON batch_failures(run_id);

        CREATE TABLE IF NOT EXISTS periods (
            id          INTEGER PRIMARY KEY,
            label       TEXT NOT NULL,
            skipped     BOOLEAN NOT NULL DEFAULT 0,
            scrolls     INTEGER NOT NULL DEFAULT 0,
            extracted   INTEGER NOT NULL DEFAULT 0,
            new_tools   INTEGER NOT NULL DEFAULT 0,
            crawled_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_periods_label ON periods(label);
        ",
    )?;
    Ok(())
}

// ── Identities ──

pub fn load_identities(conn: &Connection) -> Result<IdentityMap> {
    let mut stmt = conn.prepare("SELECT slug, store_id FROM identities")?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pairs.into_iter().collect())
}

/// Persist `(slug, id)` bindings. A store id moving to another slug
/// replaces the old binding.
pub fn save_identities(conn: &Connection, pairs: &[(String, String)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut clear = tx.prepare("DELETE FROM identities WHERE store_id = ?2 AND slug != ?1")?;
        let mut upsert = tx.prepare(
            "INSERT INTO identities (slug, store_id, synced_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(slug) DO UPDATE SET store_id = excluded.store_id, synced_at = excluded.synced_at",
        )?;
        for (slug, id) in pairs {
            clear.execute(params![slug, id])?;
            count += upsert.execute(params![slug, id])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn remove_identities(conn: &Connection, slugs: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM identities WHERE slug = ?1")?;
        for slug in slugs {
            count += stmt.execute(params![slug])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Runs ──

pub fn start_run(conn: &Connection, kind: &str, dry_run: bool) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_runs (kind, dry_run) VALUES (?1, ?2)",
        params![kind, dry_run],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_run(conn: &Connection, run_id: i64, report: &SyncReport) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE sync_runs
         SET inserted = ?2, updated = ?3, skipped = ?4, failed_batches = ?5,
             finished_at = datetime('now')
         WHERE id = ?1",
        params![
            run_id,
            report.inserted,
            report.updated,
            report.skipped,
            report.failures.len()
        ],
    )?;
    record_batch_failures(&tx, run_id, &report.failures)?;
    tx.commit()?;
    Ok(())
}

fn record_batch_failures(conn: &Connection, run_id: i64, failures: &[BatchFailure]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO batch_failures (run_id, batch_index, batch_size, error) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for f in failures {
        stmt.execute(params![run_id, f.index, f.size, f.error])?;
    }
    Ok(())
}

pub fn record_periods(conn: &Connection, reports: &[PeriodReport]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO periods (label, skipped, scrolls, extracted, new_tools)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for r in reports {
            stmt.execute(params![r.label, r.skipped, r.scrolls, r.extracted, r.new])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub identities: usize,
    pub runs: usize,
    pub failed_batches: usize,
    pub periods_crawled: usize,
    pub periods_skipped: usize,
    pub last_run: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let identities: usize = conn.query_row("SELECT COUNT(*) FROM identities", [], |r| r.get(0))?;
    let runs: usize = conn.query_row("SELECT COUNT(*) FROM sync_runs", [], |r| r.get(0))?;
    let failed_batches: usize =
        conn.query_row("SELECT COUNT(*) FROM batch_failures", [], |r| r.get(0))?;
    let periods_crawled: usize =
        conn.query_row("SELECT COUNT(*) FROM periods WHERE skipped = 0", [], |r| r.get(0))?;
    let periods_skipped: usize =
        conn.query_row("SELECT COUNT(*) FROM periods WHERE skipped = 1", [], |r| r.get(0))?;
    let last_run: Option<String> = conn.query_row(
        "SELECT MAX(finished_at) FROM sync_runs",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        identities,
        runs,
        failed_batches,
        periods_crawled,
        periods_skipped,
        last_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::ScrollStop;

    fn ledger() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn identities_round_trip_and_rebind() {
        let conn = ledger();
        save_identities(
            &conn,
            &[("a".into(), "1".into()), ("b".into(), "2".into())],
        )
        .unwrap();
        save_identities(&conn, &[("c".into(), "1".into())]).unwrap();

        let map = load_identities(&conn).unwrap();
        assert_eq!(map.id_for("a"), None);
        assert_eq!(map.id_for("c"), Some("1"));
        assert_eq!(map.slug_for("2"), Some("b"));

        assert_eq!(remove_identities(&conn, &["b".into(), "zz".into()]).unwrap(), 1);
        assert_eq!(load_identities(&conn).unwrap().len(), 1);
    }

    #[test]
    fn runs_and_failures() {
        let conn = ledger();
        let run = start_run(&conn, "sync", false).unwrap();
        let report = SyncReport {
            batches: 3,
            inserted: 4,
            updated: 1,
            skipped: 2,
            failures: vec![BatchFailure {
                index: 2,
                size: 100,
                error: "store rejected request (500)".into(),
            }],
            committed: Vec::new(),
            dry_run: false,
        };
        finish_run(&conn, run, &report).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.failed_batches, 1);
        assert!(stats.last_run.is_some());

        let inserted: i64 = conn
            .query_row("SELECT inserted FROM sync_runs WHERE id = ?1", [run], |r| r.get(0))
            .unwrap();
        assert_eq!(inserted, 4);
    }

    #[test]
    fn period_outcomes() {
        let conn = ledger();
        let done = PeriodReport {
            label: "March 2026".into(),
            skipped: false,
            scrolls: 21,
            extracted: 40,
            new: 3,
            stop: Some(ScrollStop::Stale),
        };
        let skipped = PeriodReport {
            label: "February 2026".into(),
            skipped: true,
            scrolls: 0,
            extracted: 0,
            new: 0,
            stop: None,
        };
        record_periods(&conn, &[done, skipped]).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.periods_crawled, 1);
        assert_eq!(stats.periods_skipped, 1);
        assert_eq!(stats.identities, 0);
        assert!(stats.last_run.is_none());
    }

    #[test]
    fn connect_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/ledger.sqlite");
        let conn = connect(&path).unwrap();
        init_schema(&conn).unwrap();
        assert!(path.exists());
    }
}
