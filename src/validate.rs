use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{CONTENT_LENGTH, ETAG};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::CheckSettings;
use crate::error::{ConfigError, FetchError};
use crate::model::Tool;

pub const MIN_DESCRIPTION_LEN: usize = 20;

pub fn short_description(tool: &Tool) -> bool {
    tool.description.trim().chars().count() < MIN_DESCRIPTION_LEN
}

pub fn invalid_logo(logo: &str) -> bool {
    let logo = logo.trim();
    !(logo.starts_with("http://") || logo.starts_with("https://"))
}

/// What a HEAD request told us.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadInfo {
    pub status: u16,
    pub etag: Option<String>,
    pub length: Option<u64>,
}

impl HeadInfo {
    pub fn alive(&self) -> bool {
        self.status < 400
    }

    pub fn signature(&self) -> Option<LogoSignature> {
        if self.etag.is_none() && self.length.is_none() {
            return None;
        }
        Some(LogoSignature {
            etag: self.etag.clone(),
            length: self.length,
        })
    }
}

/// Identifies byte-identical logo files without downloading them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogoSignature {
    pub etag: Option<String>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub checked: usize,
    pub short_descriptions: Vec<String>,
    pub invalid_logos: Vec<String>,
    pub dead_links: Vec<String>,
    pub templated_logos: Vec<String>,
    /// Most common logo signatures, most frequent first.
    pub top_signatures: Vec<(LogoSignature, usize)>,
}

impl CheckReport {
    /// Slugs worth removing: dead links and templated logos.
    pub fn bad_ids(&self) -> Vec<String> {
        self.dead_links
            .iter()
            .chain(&self.templated_logos)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

pub struct Checker {
    client: reqwest::Client,
    concurrency: usize,
    show_progress: bool,
}

impl Checker {
    pub fn new(settings: &CheckSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(settings.timeout())
            .build()?;
        Ok(Checker {
            client,
            concurrency: settings.concurrency.max(1),
            show_progress: true,
        })
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// HEAD every `(slug, url)` with bounded concurrency. Results are
    /// sorted by slug.
    pub async fn head_all(
        &self,
        targets: Vec<(String, String)>,
    ) -> Result<Vec<(String, Result<HeadInfo, FetchError>)>> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let pb = if self.show_progress {
            ProgressBar::new(targets.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let (tx, mut rx) = tokio::sync::mpsc::channel(self.concurrency * 2);
        for (slug, url) in targets {
            let sem = semaphore.clone();
            let client = self.client.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let result = head(&client, &url).await;
                let _ = tx.send((slug, result)).await;
            });
        }
        // rx closes once every task has sent
        drop(tx);

        let mut results = Vec::new();
        while let Some(item) = rx.recv().await {
            pb.inc(1);
            results.push(item);
        }
        pb.finish_and_clear();

        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    pub async fn run(
        &self,
        tools: &[Tool],
        reference: Option<&str>,
        skip_links: bool,
    ) -> Result<CheckReport> {
        let mut report = CheckReport {
            checked: tools.len(),
            short_descriptions: tools
                .iter()
                .filter(|t| short_description(t))
                .map(|t| t.id.clone())
                .collect(),
            invalid_logos: tools
                .iter()
                .filter(|t| invalid_logo(&t.logo))
                .map(|t| t.id.clone())
                .collect(),
            ..Default::default()
        };

        if !skip_links {
            info!("Checking {} links...", tools.len());
            let targets = tools.iter().map(|t| (t.id.clone(), t.url.clone())).collect();
            report.dead_links = dead_links(self.head_all(targets).await?);
        }

        let logo_targets: Vec<(String, String)> = tools
            .iter()
            .filter(|t| !invalid_logo(&t.logo))
            .map(|t| (t.id.clone(), t.logo.clone()))
            .collect();
        if logo_targets.is_empty() {
            return Ok(report);
        }

        info!("Fetching {} logo signatures...", logo_targets.len());
        let signatures: HashMap<String, LogoSignature> = self
            .head_all(logo_targets)
            .await?
            .into_iter()
            .filter_map(|(slug, r)| Some((slug, r.ok()?.signature()?)))
            .collect();
        report.top_signatures = top_signatures(&signatures, 10);

        if let Some(slug) = reference {
            let Some(tool) = tools.iter().find(|t| t.id == slug) else {
                bail!("reference tool {:?} is not in the cache", slug);
            };
            let Some(bad) = signatures.get(&tool.id) else {
                bail!("no logo signature for reference tool {:?} ({})", slug, tool.logo);
            };
            report.templated_logos = matching(&signatures, bad);
            debug!("Reference signature {:?}", bad);
        }

        Ok(report)
    }
}

async fn head(client: &reqwest::Client, url: &str) -> Result<HeadInfo, FetchError> {
    if url.trim().is_empty() {
        return Err(FetchError::NoPage);
    }
    let resp = client.head(url).send().await?;
    let headers = resp.headers();
    Ok(HeadInfo {
        status: resp.status().as_u16(),
        etag: headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        length: headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    })
}

/// Failed requests and error statuses both count as dead.
pub fn dead_links(results: Vec<(String, Result<HeadInfo, FetchError>)>) -> Vec<String> {
    results
        .into_iter()
        .filter(|(_, r)| !r.as_ref().is_ok_and(HeadInfo::alive))
        .map(|(slug, _)| slug)
        .collect()
}

pub fn matching(signatures: &HashMap<String, LogoSignature>, reference: &LogoSignature) -> Vec<String> {
    let mut slugs: Vec<String> = signatures
        .iter()
        .filter(|(_, s)| *s == reference)
        .map(|(slug, _)| slug.clone())
        .collect();
    slugs.sort();
    slugs
}

pub fn top_signatures(
    signatures: &HashMap<String, LogoSignature>,
    n: usize,
) -> Vec<(LogoSignature, usize)> {
    let mut counts: HashMap<&LogoSignature, usize> = HashMap::new();
    for sig in signatures.values() {
        *counts.entry(sig).or_default() += 1;
    }
    let mut top: Vec<(LogoSignature, usize)> =
        counts.into_iter().map(|(s, c)| (s.clone(), c)).collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(n);
    top
}

// ── Bad ids file ──

pub fn write_bad_ids(path: &Path, ids: &[String]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(ids)?)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

pub fn read_bad_ids(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(ConfigError::MissingInput(path.to_path_buf()).into());
    }
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).with_context(|| format!("Malformed id list {:?}", path))
}
