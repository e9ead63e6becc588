use crate::model::{Category, Tool};

use super::fields::CardFields;

/// Declared order is the precedence: first keyword hit wins.
const CATEGORY_TABLE: &[(Category, &[&str])] = &[
    (
        Category::Text,
        &["copywriting", "email", "seo", "storyteller", "summarizer", "chatbot", "prompt"],
    ),
    (
        Category::Image,
        &["image", "design", "logo", "art", "avatar", "background", "photo"],
    ),
    (Category::Video, &["video", "animation", "film", "editor"]),
    (
        Category::Code,
        &["code", "developer", "sql", "git", "database", "python", "vibe coding"],
    ),
    (Category::Audio, &["audio", "voice", "music", "speech", "podcast"]),
    (
        Category::Business,
        &["business", "startup", "management", "legal", "resume"],
    ),
    (Category::Marketing, &["marketing", "social media", "ad", "sales"]),
    (
        Category::Productivity,
        &["productivity", "calendar", "task", "automation", "notion"],
    ),
    (
        Category::Education,
        &["education", "learning", "tutor", "language", "math"],
    ),
    (Category::Finance, &["finance", "investing", "stock", "crypto", "tax"]),
    (Category::Fun, &["fun", "game", "meme", "gift"]),
    (Category::ThreeD, &["3d", "model", "render"]),
];

// Keywords never contain this, so a hit can't straddle two tags.
const TAG_SEPARATOR: &str = "\u{1f}";

pub fn classify(tags: &[String]) -> Category {
    if tags.is_empty() {
        return Category::Other;
    }

    let haystack = tags
        .iter()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(TAG_SEPARATOR);

    for (category, keywords) in CATEGORY_TABLE {
        if keywords.iter().any(|kw| haystack.contains(kw)) {
            return *category;
        }
    }
    Category::Other
}

/// Sets category, label and the badge-derived flags. Runs once per tool.
pub fn apply(tool: &mut Tool, card: &CardFields) {
    let category = classify(&tool.tags);
    tool.category = category;
    tool.category_label = category.label().to_string();
    tool.is_new = card.is_new;
    tool.is_trending = card.is_trending;
}
