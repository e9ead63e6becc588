use std::collections::{HashMap, HashSet};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{info, warn};

use crate::model::Tool;
use crate::parser::normalize::normalize_url;
use crate::reconcile::Decision;
use crate::error::StoreError;
use crate::store::{remote_rows, Filter, RecordStore};

/// A batch the store refused. `index` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub index: usize,
    pub size: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub batches: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failures: Vec<BatchFailure>,
    /// `(slug, id)` of every row in a batch the store accepted.
    pub committed: Vec<(String, String)>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteReport {
    pub deleted: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Writes reconciled decisions to the store in fixed-size batches.
pub struct SyncExecutor<'a> {
    store: &'a dyn RecordStore,
    table: String,
    batch_size: usize,
    dry_run: bool,
    show_progress: bool,
}

impl<'a> SyncExecutor<'a> {
    pub fn new(store: &'a dyn RecordStore, table: &str, batch_size: usize) -> Self {
        SyncExecutor {
            store,
            table: table.to_string(),
            batch_size: batch_size.max(1),
            dry_run: false,
            show_progress: true,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb
    }

    /// Upsert every Insert/Update. A refused batch is recorded and the
    /// remaining batches still run.
    pub async fn apply(&self, decisions: &[Decision]) -> SyncReport {
        let mut report = SyncReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        let mut writes: Vec<(&str, &Tool, bool)> = Vec::new();
        for d in decisions {
            match d {
                Decision::Insert { slug, tool } => writes.push((slug.as_str(), tool, true)),
                Decision::Update { slug, tool, .. } => writes.push((slug.as_str(), tool, false)),
                Decision::Skip { .. } => report.skipped += 1,
            }
        }

        let chunks: Vec<_> = writes.chunks(self.batch_size).collect();
        report.batches = chunks.len();

        if self.dry_run {
            report.inserted = writes.iter().filter(|w| w.2).count();
            report.updated = writes.len() - report.inserted;
            info!(
                "Dry run: {} inserts, {} updates in {} batches",
                report.inserted, report.updated, report.batches
            );
            return report;
        }

        let pb = self.progress(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let index = i + 1;
            pb.set_message(format!("batch {}", index));

            let rows: Result<Vec<Value>, _> =
                chunk.iter().map(|(_, t, _)| serde_json::to_value(t)).collect();
            let outcome = match rows {
                Ok(rows) => self.store.upsert(&self.table, &rows).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(_) => {
                    for (slug, tool, insert) in chunk.iter() {
                        if *insert {
                            report.inserted += 1;
                        } else {
                            report.updated += 1;
                        }
                        report.committed.push((slug.to_string(), tool.id.clone()));
                    }
                }
                Err(error) => {
                    warn!("Batch {} ({} rows) failed: {}", index, chunk.len(), error);
                    report.failures.push(BatchFailure {
                        index,
                        size: chunk.len(),
                        error,
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            "Synced {} inserts, {} updates; {} of {} batches failed",
            report.inserted,
            report.updated,
            report.failures.len(),
            report.batches
        );
        report
    }

    /// Deletes every stored row whose normalized URL matches one of `urls`.
    /// Stored URLs are compared in normalized form too, and rows are
    /// removed by id.
    pub async fn delete_by_urls(&self, urls: &[String]) -> Result<DeleteReport, StoreError> {
        let mut by_url: HashMap<String, Vec<String>> = HashMap::new();
        for row in remote_rows(self.store, &self.table).await? {
            let Some(url) = row.url.as_deref() else {
                continue;
            };
            let key = normalize_url(url);
            if !key.is_empty() {
                by_url.entry(key).or_default().push(row.id);
            }
        }

        let mut report = DeleteReport::default();
        let mut seen = HashSet::new();
        for url in urls {
            let key = normalize_url(url);
            if key.is_empty() || !seen.insert(key.clone()) {
                continue;
            }
            let Some(ids) = by_url.get(&key) else {
                report.not_found += 1;
                continue;
            };
            for id in ids {
                if self.dry_run {
                    info!("Would delete {} ({})", id, key);
                    continue;
                }
                match self.store.delete(&self.table, &Filter::eq("id", id.as_str())).await {
                    Ok(n) => report.deleted += n,
                    Err(e) => {
                        warn!("Delete failed for {} ({}): {}", id, key, e);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::SkipReason;
    use crate::store::testing::MemoryStore;

    fn tool(id: &str) -> Tool {
        Tool {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            url: format!("https://{}.com", id),
            category: Default::default(),
            category_label: "Other".into(),
            tags: Vec::new(),
            pricing: Default::default(),
            pricing_label: "Free".into(),
            visits: "0".into(),
            rating: 0.0,
            logo: String::new(),
            is_new: false,
            is_trending: false,
            launch_date: String::new(),
        }
    }

    fn inserts(n: usize) -> Vec<Decision> {
        (0..n)
            .map(|i| Decision::Insert {
                slug: format!("s{}", i),
                tool: tool(&format!("t{}", i)),
            })
            .collect()
    }

    #[tokio::test]
    async fn batches_and_counts() {
        let store = MemoryStore::default();
        let mut decisions = inserts(5);
        decisions.push(Decision::Update {
            remote_id: "t0".into(),
            slug: "s0".into(),
            tool: tool("t0"),
        });
        decisions.push(Decision::Skip {
            slug: "x".into(),
            reason: SkipReason::MissingUrl,
        });

        let report = SyncExecutor::new(&store, "tools", 2)
            .show_progress(false)
            .apply(&decisions)
            .await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.inserted, 5);
        assert_eq!(report.updated, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.failures.is_empty());
        assert_eq!(store.snapshot().len(), 5);
        assert_eq!(report.committed[0], ("s0".to_string(), "t0".to_string()));
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_the_rest() {
        let store = MemoryStore {
            failing_upserts: [2].into_iter().collect(),
            ..Default::default()
        };
        let report = SyncExecutor::new(&store, "tools", 2)
            .show_progress(false)
            .apply(&inserts(5))
            .await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 2);
        assert_eq!(report.failures[0].size, 2);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.committed.len(), 3);
        assert_eq!(*store.upsert_calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let store = MemoryStore::default();
        let report = SyncExecutor::new(&store, "tools", 100)
            .dry_run(true)
            .show_progress(false)
            .apply(&inserts(3))
            .await;
        assert!(report.dry_run);
        assert_eq!(report.inserted, 3);
        assert!(report.committed.is_empty());
        assert_eq!(*store.upsert_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn deletes_match_normalized_urls() {
        let store = MemoryStore::with_rows(vec![
            json!({"id": "1", "url": "https://a.com"}),
            json!({"id": "2", "url": "https://b.com/x"}),
        ]);
        let exec = SyncExecutor::new(&store, "tools", 100).show_progress(false);
        let report = exec
            .delete_by_urls(&[
                "https://a.com/?utm=1".to_string(),
                "https://c.com".to_string(),
                String::new(),
            ])
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(*store.deletes.lock().unwrap(), vec![Filter::eq("id", "1")]);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn deletes_rows_stored_with_raw_urls() {
        let store = MemoryStore::with_rows(vec![
            json!({"id": "u1", "url": "https://theresanaiforthat.com/ai/bad-tool/"}),
            json!({"id": "u2", "url": "https://x.io/app?utm_source=taaft"}),
            json!({"id": "u3", "url": "https://x.io/app/"}),
            json!({"id": "u4", "url": "https://keep.me"}),
        ]);
        let report = SyncExecutor::new(&store, "tools", 100)
            .show_progress(false)
            .delete_by_urls(&[
                "https://theresanaiforthat.com/ai/bad-tool".to_string(),
                "https://x.io/app".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(report.deleted, 3);
        assert_eq!(report.not_found, 0);
        assert_eq!(store.snapshot(), vec![json!({"id": "u4", "url": "https://keep.me"})]);
    }

    #[tokio::test]
    async fn dry_run_delete_keeps_rows() {
        let store = MemoryStore::with_rows(vec![json!({"id": "1", "url": "https://a.com/"})]);
        let report = SyncExecutor::new(&store, "tools", 100)
            .dry_run(true)
            .show_progress(false)
            .delete_by_urls(&["https://a.com".to_string()])
            .await
            .unwrap();
        assert_eq!(report, DeleteReport::default());
        assert!(store.deletes.lock().unwrap().is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }
}
