use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::error::ConfigError;
use crate::model::Tool;

/// JSON file holding every tool captured so far, keyed by slug in `id`.
#[derive(Debug, Clone)]
pub struct ToolCache {
    path: PathBuf,
}

impl ToolCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ToolCache { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file → empty. A malformed file is an error so it never gets
    /// overwritten with a partial set.
    pub fn load(&self) -> Result<Vec<Tool>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        let tools: Vec<Tool> = serde_json::from_str(&text)
            .with_context(|| format!("Malformed cache file {:?}", self.path))?;
        info!("Loaded {} cached tools from {:?}", tools.len(), self.path);
        Ok(tools)
    }

    /// Like `load`, but the file must exist.
    pub fn load_required(&self) -> Result<Vec<Tool>> {
        if !self.path.exists() {
            return Err(ConfigError::MissingInput(self.path.clone()).into());
        }
        self.load()
    }

    /// Write via temp file + rename so an interrupted write keeps the old set.
    pub fn save(&self, tools: &[Tool]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(tools)?;
        fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move {:?} into place", tmp))?;
        Ok(())
    }

    /// Drop tools by slug; returns the removed tools.
    pub fn remove(&self, slugs: &HashSet<String>) -> Result<Vec<Tool>> {
        let (removed, kept): (Vec<Tool>, Vec<Tool>) = self
            .load()?
            .into_iter()
            .partition(|t| slugs.contains(&t.id));
        if !removed.is_empty() {
            self.save(&kept)?;
        }
        Ok(removed)
    }
}

/// Slugs already captured by earlier runs.
pub fn known_slugs(tools: &[Tool]) -> HashSet<String> {
    tools.iter().map(|t| t.id.clone()).collect()
}

/// Slugs of tools whose name contains any needle, ignoring case.
pub fn slugs_matching_names(tools: &[Tool], needles: &[String]) -> HashSet<String> {
    let needles: Vec<String> = needles
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    tools
        .iter()
        .filter(|t| {
            let name = t.name.to_lowercase();
            needles.iter().any(|n| name.contains(n.as_str()))
        })
        .map(|t| t.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Pricing};

    fn tool(slug: &str) -> Tool {
        Tool {
            id: slug.into(),
            name: slug.into(),
            description: String::new(),
            url: format!("https://theresanaiforthat.com/ai/{}", slug),
            category: Category::Other,
            category_label: "Other".into(),
            tags: Vec::new(),
            pricing: Pricing::Free,
            pricing_label: "Free".into(),
            visits: "0".into(),
            rating: 0.0,
            logo: String::new(),
            is_new: false,
            is_trending: false,
            launch_date: String::new(),
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolCache::new(dir.path().join("none.json"));
        assert!(cache.load().unwrap().is_empty());
        let err = cache.load_required().unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolCache::new(dir.path().join("nested/tools.json"));
        cache.save(&[tool("a"), tool("b")]).unwrap();
        let loaded = cache.load().unwrap();
        assert_eq!(loaded, vec![tool("a"), tool("b")]);
        assert!(!dir.path().join("nested/tools.json.tmp").exists());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        fs::write(&path, "[{\"id\": ").unwrap();
        assert!(ToolCache::new(&path).load().is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[{\"id\": ");
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        let mut a = tool("a");
        a.name = "Google Imagen v4".into();
        let mut b = tool("b");
        b.name = "Everlyn".into();
        let found = slugs_matching_names(&[a, b, tool("c")], &["imagen".into(), " ".into()]);
        assert_eq!(found, ["a".to_string()].into_iter().collect());
    }

    #[test]
    fn remove_by_slug() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ToolCache::new(dir.path().join("tools.json"));
        cache.save(&[tool("a"), tool("b"), tool("c")]).unwrap();
        let gone = cache
            .remove(&["b".to_string(), "zz".to_string()].into_iter().collect())
            .unwrap();
        assert_eq!(gone, vec![tool("b")]);
        let ids: Vec<String> = cache.load().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
