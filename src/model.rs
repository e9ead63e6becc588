use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Raw card observation produced by the extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub slug: String,
    pub raw_text: String,
    pub logo: String,
    pub url: String,
    pub tags: Vec<String>,
}

/// Canonical tool record. Also the row shape written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default = "default_category_label")]
    pub category_label: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default = "default_pricing_label")]
    pub pricing_label: String,
    #[serde(default = "default_visits")]
    pub visits: String,
    #[serde(default, deserialize_with = "lenient_rating")]
    pub rating: f64,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub is_trending: bool,
    #[serde(default)]
    pub launch_date: String,
}

fn default_category_label() -> String {
    Category::Other.label().to_string()
}

fn default_pricing_label() -> String {
    Pricing::Free.label().to_string()
}

fn default_visits() -> String {
    "0".to_string()
}

// Older cache files carry `null` ratings.
fn lenient_rating<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(0.0))
}

// ── Category ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Text,
    Image,
    Video,
    Code,
    Audio,
    Business,
    Marketing,
    Productivity,
    Education,
    Finance,
    Fun,
    #[serde(rename = "3d")]
    ThreeD,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Text,
        Category::Image,
        Category::Video,
        Category::Code,
        Category::Audio,
        Category::Business,
        Category::Marketing,
        Category::Productivity,
        Category::Education,
        Category::Finance,
        Category::Fun,
        Category::ThreeD,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Text => "text",
            Category::Image => "image",
            Category::Video => "video",
            Category::Code => "code",
            Category::Audio => "audio",
            Category::Business => "business",
            Category::Marketing => "marketing",
            Category::Productivity => "productivity",
            Category::Education => "education",
            Category::Finance => "finance",
            Category::Fun => "fun",
            Category::ThreeD => "3d",
            Category::Other => "other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Text => "Text",
            Category::Image => "Image",
            Category::Video => "Video",
            Category::Code => "Code",
            Category::Audio => "Audio",
            Category::Business => "Business",
            Category::Marketing => "Marketing",
            Category::Productivity => "Productivity",
            Category::Education => "Education",
            Category::Finance => "Finance",
            Category::Fun => "Fun",
            Category::ThreeD => "3D",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Pricing ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pricing {
    #[default]
    Free,
    Freemium,
    Paid,
}

impl Pricing {
    pub fn label(self) -> &'static str {
        match self {
            Pricing::Free => "Free",
            Pricing::Freemium => "Freemium",
            Pricing::Paid => "Paid",
        }
    }
}

// ── Remote snapshot ──

/// `{id, url}` pair read back from the record store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteRow {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

// Store ids are integers or uuids depending on the table definition.
fn id_as_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported id value: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serde_uses_site_ids() {
        assert_eq!(serde_json::to_string(&Category::ThreeD).unwrap(), "\"3d\"");
        let c: Category = serde_json::from_str("\"productivity\"").unwrap();
        assert_eq!(c, Category::Productivity);
        assert!(serde_json::from_str::<Category>("\"gaming\"").is_err());
    }

    #[test]
    fn labels() {
        assert_eq!(Category::ThreeD.label(), "3D");
        assert_eq!(Category::Other.label(), "Other");
        assert_eq!(Pricing::Freemium.label(), "Freemium");
        for c in Category::ALL {
            assert!(!c.as_str().is_empty());
        }
    }

    #[test]
    fn tool_from_sparse_cache_entry() {
        let json = r#"{"id":"clever-ai","name":"Clever AI","url":"https://x.com","rating":null}"#;
        let t: Tool = serde_json::from_str(json).unwrap();
        assert_eq!(t.category, Category::Other);
        assert_eq!(t.pricing, Pricing::Free);
        assert_eq!(t.visits, "0");
        assert_eq!(t.rating, 0.0);
        assert_eq!(t.category_label, "Other");
    }

    #[test]
    fn remote_row_numeric_and_string_ids() {
        let rows: Vec<RemoteRow> =
            serde_json::from_str(r#"[{"id":1,"url":"a"},{"id":"9f1c","url":null}]"#).unwrap();
        assert_eq!(rows[0].id, "1");
        assert_eq!(rows[1].id, "9f1c");
        assert!(rows[1].url.is_none());
    }
}
