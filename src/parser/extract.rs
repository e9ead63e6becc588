use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::RawRecord;

pub const CARD_SELECTOR: &str = "li.li";

static CARD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(CARD_SELECTOR).unwrap());
static TOOL_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/ai/"]"#).unwrap());
static IMG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static TASK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/task/"]"#).unwrap());
static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/ai/([^/?#]+)").unwrap());

// Sidebar and sponsored placements repeat on every period page.
const SKIP_REFS: &[&str] = &["ref=featured", "ref=sponsor", "ref=top3"];
const MAX_CARDS: usize = 2000;
pub const MAX_TAGS: usize = 3;

/// Pull raw tool cards out of a listing page. Cards without a usable
/// tool link are dropped; the rest of the page still counts.
pub fn extract_cards(html: &str) -> Vec<RawRecord> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for card in doc.select(&CARD_SEL) {
        let Some((slug, href)) = tool_link(&card) else {
            continue;
        };
        if !seen.insert(slug.clone()) {
            continue;
        }

        records.push(RawRecord {
            slug,
            raw_text: card_text(&card),
            logo: card_logo(&card),
            url: href,
            tags: card_tags(&card),
        });
        if records.len() >= MAX_CARDS {
            break;
        }
    }

    records
}

fn tool_link(card: &ElementRef) -> Option<(String, String)> {
    card.select(&TOOL_LINK_SEL).find_map(|a| {
        let href = a.value().attr("href")?;
        if SKIP_REFS.iter().any(|r| href.contains(r)) {
            return None;
        }
        let slug = SLUG_RE.captures(href)?.get(1)?.as_str().to_string();
        Some((slug, href.to_string()))
    })
}

/// Rough `innerText`: one line per text node.
fn card_text(card: &ElementRef) -> String {
    card.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn card_logo(card: &ElementRef) -> String {
    card.select(&IMG_SEL)
        .next()
        .and_then(|img| {
            let v = img.value();
            v.attr("src")
                .filter(|s| !s.trim().is_empty())
                .or_else(|| v.attr("data-src"))
        })
        .unwrap_or_default()
        .to_string()
}

fn card_tags(card: &ElementRef) -> Vec<String> {
    let from_attr = card.value().attr("data-task").map(str::to_string);
    let from_links = card.select(&TASK_SEL).map(|a| {
        a.text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    });

    let mut seen = HashSet::new();
    from_attr
        .into_iter()
        .chain(from_links)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .take(MAX_TAGS)
        .collect()
}
