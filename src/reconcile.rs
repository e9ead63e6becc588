use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SkipReason;
use crate::model::{RemoteRow, Tool};
use crate::parser::normalize::normalize_url;

/// Bidirectional slug ↔ store-id mapping. Binding either side replaces
/// any previous partner, so the map stays one-to-one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityMap {
    by_slug: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, slug: &str, id: &str) {
        if let Some(old_id) = self.by_slug.remove(slug) {
            self.by_id.remove(&old_id);
        }
        if let Some(old_slug) = self.by_id.remove(id) {
            self.by_slug.remove(&old_slug);
        }
        self.by_slug.insert(slug.to_string(), id.to_string());
        self.by_id.insert(id.to_string(), slug.to_string());
    }

    pub fn id_for(&self, slug: &str) -> Option<&str> {
        self.by_slug.get(slug).map(String::as_str)
    }

    #[cfg(test)]
    pub fn slug_for(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }
}

impl FromIterator<(String, String)> for IdentityMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = IdentityMap::new();
        for (slug, id) in iter {
            map.bind(&slug, &id);
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Insert {
        slug: String,
        tool: Tool,
    },
    Update {
        remote_id: String,
        slug: String,
        tool: Tool,
    },
    Skip {
        slug: String,
        reason: SkipReason,
    },
}

impl Decision {
    /// The row to write, if any.
    #[cfg(test)]
    pub fn tool(&self) -> Option<&Tool> {
        match self {
            Decision::Insert { tool, .. } | Decision::Update { tool, .. } => Some(tool),
            Decision::Skip { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionCounts {
    pub inserts: usize,
    pub updates: usize,
    pub skips: usize,
}

pub fn count(decisions: &[Decision]) -> DecisionCounts {
    decisions.iter().fold(DecisionCounts::default(), |mut c, d| {
        match d {
            Decision::Insert { .. } => c.inserts += 1,
            Decision::Update { .. } => c.updates += 1,
            Decision::Skip { .. } => c.skips += 1,
        }
        c
    })
}

/// Maps fresh tools onto remote identities by normalized URL.
pub struct Reconciler {
    by_url: HashMap<String, String>,
    identities: IdentityMap,
}

impl Reconciler {
    pub fn new(remote: &[RemoteRow], identities: IdentityMap) -> Self {
        let mut by_url = HashMap::with_capacity(remote.len());
        for row in remote {
            let Some(url) = row.url.as_deref() else {
                continue;
            };
            let key = normalize_url(url);
            if key.is_empty() {
                continue;
            }
            if let Some(first) = by_url.get(&key) {
                warn!("Remote rows {} and {} share url {}", first, row.id, key);
                continue;
            }
            by_url.insert(key, row.id.clone());
        }
        debug!("Indexed {} remote urls", by_url.len());
        Reconciler { by_url, identities }
    }

    #[cfg(test)]
    pub fn identities(&self) -> &IdentityMap {
        &self.identities
    }

    /// One decision per fresh tool, in input order. `previous` is the
    /// cached set from earlier runs, keyed by slug in `id`.
    pub fn reconcile(&mut self, fresh: Vec<Tool>, previous: &[Tool]) -> Vec<Decision> {
        let prev: HashMap<&str, &Tool> = previous.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut decisions = Vec::with_capacity(fresh.len());

        for mut tool in fresh {
            let slug = tool.id.clone();

            if tool.name.trim().is_empty() {
                decisions.push(Decision::Skip {
                    slug,
                    reason: SkipReason::MissingName,
                });
                continue;
            }
            let key = normalize_url(&tool.url);
            if key.is_empty() {
                decisions.push(Decision::Skip {
                    slug,
                    reason: SkipReason::MissingUrl,
                });
                continue;
            }
            if let Some(owner) = claimed.get(&key) {
                decisions.push(Decision::Skip {
                    slug,
                    reason: SkipReason::DuplicateUrl(owner.clone()),
                });
                continue;
            }
            claimed.insert(key.clone(), slug.clone());
            tool.url = key;

            if let Some(old) = prev.get(slug.as_str()) {
                if !old.launch_date.is_empty() {
                    tool.launch_date = old.launch_date.clone();
                }
                tool.is_new = old.is_new;
                tool.is_trending = old.is_trending;
            }

            let decision = match self.by_url.get(&tool.url) {
                Some(remote_id) => {
                    let remote_id = remote_id.clone();
                    tool.id = remote_id.clone();
                    self.identities.bind(&slug, &remote_id);
                    Decision::Update {
                        remote_id,
                        slug,
                        tool,
                    }
                }
                None => {
                    let id = self
                        .identities
                        .id_for(&slug)
                        .map(str::to_string)
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    tool.id = id.clone();
                    self.identities.bind(&slug, &id);
                    Decision::Insert { slug, tool }
                }
            };
            decisions.push(decision);
        }

        decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(slug: &str, url: &str) -> Tool {
        Tool {
            id: slug.into(),
            name: slug.to_uppercase(),
            description: String::new(),
            url: url.into(),
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
            launch_date: "2026-10-17T00:00:00+00:00".into(),
        }
    }

    fn remote(id: &str, url: &str) -> RemoteRow {
        RemoteRow {
            id: id.into(),
            url: Some(url.into()),
        }
    }

    #[test]
    fn identity_map_stays_one_to_one() {
        let mut m = IdentityMap::new();
        m.bind("a", "1");
        m.bind("b", "1");
        assert_eq!(m.id_for("a"), None);
        assert_eq!(m.slug_for("1"), Some("b"));
        m.bind("b", "2");
        assert_eq!(m.slug_for("1"), None);
        assert_eq!(m.len(), 1);
        assert!(!m.is_empty());
    }

    #[test]
    fn known_url_updates_new_url_inserts() {
        let mut r = Reconciler::new(&[remote("1", "https://a.com/")], IdentityMap::new());
        let d = r.reconcile(
            vec![tool("a", "https://a.com?ref=x"), tool("b", "https://b.com")],
            &[],
        );
        assert_eq!(d.len(), 2);

        match &d[0] {
            Decision::Update {
                remote_id, tool, ..
            } => {
                assert_eq!(remote_id, "1");
                assert_eq!(tool.id, "1");
                assert_eq!(tool.url, "https://a.com");
            }
            other => panic!("expected update, got {:?}", other),
        }
        match &d[1] {
            Decision::Insert { slug, tool } => {
                assert_eq!(slug, "b");
                assert!(Uuid::parse_str(&tool.id).is_ok());
            }
            other => panic!("expected insert, got {:?}", other),
        }
        assert_eq!(r.identities().id_for("a"), Some("1"));
        assert_eq!(
            count(&d),
            DecisionCounts {
                inserts: 1,
                updates: 1,
                skips: 0
            }
        );
    }

    #[test]
    fn ledger_id_is_reused_for_inserts() {
        let ids: IdentityMap = [("b".to_string(), "uuid-b".to_string())].into_iter().collect();
        let mut r = Reconciler::new(&[], ids);
        let d = r.reconcile(vec![tool("b", "https://b.com")], &[]);
        assert_eq!(d[0].tool().map(|t| t.id.as_str()), Some("uuid-b"));
    }

    #[test]
    fn duplicate_and_incomplete_records_are_skipped() {
        let mut nameless = tool("c", "https://c.com");
        nameless.name = "  ".into();
        let mut r = Reconciler::new(&[], IdentityMap::new());
        let d = r.reconcile(
            vec![
                tool("a", "https://a.com/"),
                tool("a2", "https://a.com#top"),
                nameless,
                tool("d", ""),
            ],
            &[],
        );
        assert!(matches!(d[0], Decision::Insert { .. }));
        assert_eq!(
            d[1],
            Decision::Skip {
                slug: "a2".into(),
                reason: SkipReason::DuplicateUrl("a".into())
            }
        );
        assert_eq!(
            d[2],
            Decision::Skip {
                slug: "c".into(),
                reason: SkipReason::MissingName
            }
        );
        assert_eq!(
            d[3],
            Decision::Skip {
                slug: "d".into(),
                reason: SkipReason::MissingUrl
            }
        );
        assert_eq!(r.identities().len(), 1);
    }

    #[test]
    fn previous_observation_keeps_date_and_flags() {
        let mut old = tool("a", "https://a.com");
        old.launch_date = "2024-03-01T00:00:00+00:00".into();
        old.is_trending = true;
        let mut r = Reconciler::new(&[], IdentityMap::new());
        let d = r.reconcile(vec![tool("a", "https://a.com")], &[old]);
        let t = d[0].tool().unwrap();
        assert_eq!(t.launch_date, "2024-03-01T00:00:00+00:00");
        assert!(t.is_trending);
    }

    #[test]
    fn remote_rows_without_url_are_ignored() {
        let rows = vec![
            RemoteRow {
                id: "9".into(),
                url: None,
            },
            remote("1", "https://a.com"),
            remote("2", "https://a.com/"),
        ];
        let mut r = Reconciler::new(&rows, IdentityMap::new());
        let d = r.reconcile(vec![tool("a", "https://a.com")], &[]);
        assert!(matches!(&d[0], Decision::Update { remote_id, .. } if remote_id == "1"));
    }
}
