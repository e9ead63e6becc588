use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::cache::{known_slugs, ToolCache};
use crate::config::{CrawlSettings, SiteSettings};
use crate::error::FetchError;
use crate::fetcher::{Landing, PageFetcher};
use crate::model::{RawRecord, Tool};
use crate::parser;
use crate::parser::extract::{extract_cards, CARD_SELECTOR};
use crate::periods::Period;

pub const LOAD_MORE_SELECTOR: &str = "button.load-more, .load-more, #load-more, .load_more";

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub base_url: String,
    pub max_retries: u32,
    pub stale_threshold: u32,
    pub max_scrolls: u32,
    pub scroll_pause: Duration,
    pub step_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_step: Duration,
    pub settle: Duration,
    pub show_progress: bool,
}

impl CrawlOptions {
    pub fn from_settings(site: &SiteSettings, crawl: &CrawlSettings) -> Self {
        CrawlOptions {
            base_url: site.base_url.clone(),
            max_retries: crawl.max_retries.max(1),
            stale_threshold: crawl.stale_threshold.max(1),
            max_scrolls: crawl.max_scrolls,
            scroll_pause: Duration::from_millis(crawl.scroll_pause_ms),
            step_timeout: Duration::from_millis(crawl.step_timeout_ms),
            backoff_base: Duration::from_millis(crawl.backoff_base_ms),
            backoff_step: Duration::from_millis(crawl.backoff_step_ms),
            settle: Duration::from_millis(crawl.settle_ms),
            show_progress: true,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base + self.backoff_step * attempt.saturating_sub(1)
    }
}

/// Where the session is. `period` is the index into the period slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Navigating { period: usize, attempt: u32 },
    NavigationFailed { period: usize, attempt: u32 },
    Scrolling { period: usize },
    PeriodComplete { period: usize },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStop {
    Stale,
    Ceiling,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub label: String,
    pub skipped: bool,
    pub scrolls: u32,
    pub extracted: usize,
    pub new: usize,
    pub stop: Option<ScrollStop>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStats {
    pub periods_done: usize,
    pub periods_skipped: usize,
    pub extracted: usize,
    pub new_tools: usize,
    pub rejected: usize,
}

/// Sequential, single-tab crawl over listing periods. Only slugs unseen in
/// this run and absent from earlier output are captured.
pub struct CrawlSession<F: PageFetcher> {
    fetcher: F,
    opts: CrawlOptions,
    state: SessionState,
    known: HashSet<String>,
    seen: HashSet<String>,
    existing: Vec<Tool>,
    fresh: Vec<Tool>,
    stats: CrawlStats,
}

impl<F: PageFetcher> CrawlSession<F> {
    pub fn new(fetcher: F, opts: CrawlOptions, existing: Vec<Tool>) -> Self {
        CrawlSession {
            fetcher,
            opts,
            state: SessionState::Idle,
            known: known_slugs(&existing),
            seen: HashSet::new(),
            existing,
            fresh: Vec::new(),
            stats: CrawlStats::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Tools first captured in this run.
    pub fn fresh(&self) -> &[Tool] {
        &self.fresh
    }

    /// Earlier output followed by this run's captures.
    pub fn merged(&self) -> Vec<Tool> {
        self.existing.iter().chain(&self.fresh).cloned().collect()
    }

    /// Crawl every period in order, persisting the merged set after each.
    pub async fn run(&mut self, periods: &[Period], cache: &ToolCache) -> Result<Vec<PeriodReport>> {
        let pb = if self.opts.show_progress {
            ProgressBar::new(periods.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );

        let mut reports = Vec::with_capacity(periods.len());
        for (i, period) in periods.iter().enumerate() {
            pb.set_message(period.label.clone());
            let report = self.crawl_period(i, period).await;

            cache.save(&self.merged())?;
            pb.println(format!(
                "{:<16} {:>5} on page, +{} new{}",
                report.label,
                report.extracted,
                report.new,
                if report.skipped { " (skipped)" } else { "" }
            ));
            pb.inc(1);
            reports.push(report);
        }

        self.state = SessionState::Finished;
        pb.finish_and_clear();
        info!(
            "Crawl finished: {} periods ok, {} skipped, {} new tools",
            self.stats.periods_done, self.stats.periods_skipped, self.stats.new_tools
        );
        Ok(reports)
    }

    async fn crawl_period(&mut self, index: usize, period: &Period) -> PeriodReport {
        if !self.navigate(index, period).await {
            warn!("Skipping {} due to navigation failure", period.label);
            self.stats.periods_skipped += 1;
            self.state = SessionState::PeriodComplete { period: index };
            return PeriodReport {
                label: period.label.clone(),
                skipped: true,
                scrolls: 0,
                extracted: 0,
                new: 0,
                stop: None,
            };
        }

        let (raws, scrolls, stop) = self.scroll_and_extract(index, period).await;
        let extracted = raws.len();
        let new = self.absorb(raws);

        self.stats.periods_done += 1;
        self.stats.extracted += extracted;
        self.state = SessionState::PeriodComplete { period: index };
        info!(
            "{}: {} extracted, {} new after {} scrolls ({:?})",
            period.label, extracted, new, scrolls, stop
        );

        PeriodReport {
            label: period.label.clone(),
            skipped: false,
            scrolls,
            extracted,
            new,
            stop: Some(stop),
        }
    }

    /// Load the period page and confirm it is really that period. Retries
    /// with growing backoff; `false` once attempts run out.
    pub async fn navigate(&mut self, index: usize, period: &Period) -> bool {
        for attempt in 1..=self.opts.max_retries {
            self.state = SessionState::Navigating {
                period: index,
                attempt,
            };

            match step(self.opts.step_timeout, self.fetcher.navigate(&period.url)).await {
                Ok(landing) if echoes_marker(&landing, &period.marker) => {
                    tokio::time::sleep(self.opts.settle).await;
                    return true;
                }
                Ok(landing) => warn!(
                    "Nav verification failed (attempt {}/{}): {} [{}]",
                    attempt, self.opts.max_retries, landing.final_url, landing.title
                ),
                Err(e) if e.is_timeout() => warn!(
                    "Nav timed out (attempt {}/{}): {}",
                    attempt, self.opts.max_retries, period.url
                ),
                Err(e) => warn!(
                    "Nav failed (attempt {}/{}): {}",
                    attempt, self.opts.max_retries, e
                ),
            }

            self.state = SessionState::NavigationFailed {
                period: index,
                attempt,
            };
            if attempt < self.opts.max_retries {
                tokio::time::sleep(self.opts.backoff(attempt)).await;
            }
        }
        false
    }

    /// Scroll until `stale_threshold` consecutive scrolls add no new slug,
    /// or `max_scrolls` is reached. Failed or timed-out steps count as stale.
    pub async fn scroll_and_extract(
        &mut self,
        index: usize,
        period: &Period,
    ) -> (Vec<RawRecord>, u32, ScrollStop) {
        self.state = SessionState::Scrolling { period: index };

        let mut found: Vec<RawRecord> = Vec::new();
        let mut slugs: HashSet<String> = HashSet::new();
        let mut stale = 0u32;
        let mut scrolls = 0u32;

        let stop = loop {
            if scrolls >= self.opts.max_scrolls {
                break ScrollStop::Ceiling;
            }
            scrolls += 1;

            if let Err(e) = step(self.opts.step_timeout, self.fetcher.scroll_to_bottom()).await {
                debug!("Scroll #{} failed on {}: {}", scrolls, period.label, e);
            }
            tokio::time::sleep(self.opts.scroll_pause).await;

            let clicked = matches!(
                step(self.opts.step_timeout, self.fetcher.click(LOAD_MORE_SELECTOR)).await,
                Ok(true)
            );
            if clicked {
                tokio::time::sleep(self.opts.scroll_pause).await;
            }

            let before = found.len();
            match step(self.opts.step_timeout, self.fetcher.query(CARD_SELECTOR)).await {
                Ok(cards) => {
                    for raw in extract_cards(&cards.concat()) {
                        if slugs.insert(raw.slug.clone()) {
                            found.push(raw);
                        }
                    }
                }
                Err(e) => debug!("Extract after scroll #{} failed: {}", scrolls, e),
            }

            if found.len() > before || clicked {
                stale = 0;
            } else {
                stale += 1;
            }
            debug!(
                "scroll #{:<4} page: {:>5} stale: {}/{}",
                scrolls,
                found.len(),
                stale,
                self.opts.stale_threshold
            );

            if stale >= self.opts.stale_threshold {
                break ScrollStop::Stale;
            }
        };

        (found, scrolls, stop)
    }

    /// Keep only slugs never seen before, parse them, and add them to the
    /// fresh set. Returns how many parsed tools were added.
    pub fn absorb(&mut self, raws: Vec<RawRecord>) -> usize {
        let new: Vec<RawRecord> = raws
            .into_iter()
            .filter(|r| !self.known.contains(&r.slug) && self.seen.insert(r.slug.clone()))
            .collect();

        let observed_at = Utc::now().to_rfc3339();
        let (tools, skipped) = parser::process_all(&new, &self.opts.base_url, &observed_at);
        for (slug, reason) in &skipped {
            debug!("Dropped card {:?}: {}", slug, reason);
        }

        let added = tools.len();
        self.stats.new_tools += added;
        self.stats.rejected += skipped.len();
        self.fresh.extend(tools);
        added
    }
}

fn echoes_marker(landing: &Landing, marker: &str) -> bool {
    let marker = marker.to_lowercase();
    landing.final_url.to_lowercase().contains(&marker)
        || landing.title.to_lowercase().contains(&marker)
}

/// Bound a fetcher step; an elapsed timer is a `FetchError::Timeout`.
async fn step<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(FetchError::Timeout(limit)),
    }
}
