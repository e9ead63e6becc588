use std::sync::LazyLock;

use regex::Regex;

use crate::model::Pricing;

static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(Featured|Sponsored|Verified|New|Trending|Free|Paid|Freemium)$").unwrap()
});
static RANK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\d+").unwrap());
static STAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\d,.+]+$").unwrap());
static VISITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,.]*[KkMmBb]\b").unwrap());

pub const MAX_NAME_LEN: usize = 50;
const MIN_DESCRIPTION_LEN: usize = 20;

/// Line-level fields pulled out of a card's text blob.
#[derive(Debug, Default, PartialEq)]
pub struct CardFields {
    pub name: Option<String>,
    pub description: String,
    pub is_new: bool,
    pub is_trending: bool,
}

/// Split a card blob into trimmed, non-empty lines.
pub fn card_lines(raw: &str) -> Vec<String> {
    raw.replace(['\u{2028}', '\u{2029}'], " ")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn scan_lines(lines: &[String]) -> CardFields {
    let mut fields = CardFields::default();

    for line in lines {
        if is_noise_line(line) {
            if line.eq_ignore_ascii_case("new") {
                fields.is_new = true;
            } else if line.eq_ignore_ascii_case("trending") {
                fields.is_trending = true;
            }
            continue;
        }

        if fields.name.is_none() {
            fields.name = Some(line.clone());
            continue;
        }

        if line.chars().count() > MIN_DESCRIPTION_LEN
            && !line.contains("AI tools")
            && !STAT_RE.is_match(line)
        {
            fields.description = line.clone();
            break;
        }
    }

    fields
}

fn is_noise_line(line: &str) -> bool {
    NOISE_RE.is_match(line) || RANK_RE.is_match(line)
}

/// "clever-ai-writer" → "Clever Ai Writer"
pub fn name_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Long "names" mean the heuristic grabbed a paragraph.
pub fn validated_name(candidate: Option<String>, slug: &str) -> String {
    match candidate {
        Some(n) if !n.is_empty() && n.chars().count() <= MAX_NAME_LEN => n,
        _ => name_from_slug(slug),
    }
}

/// freemium > paid / `$` > free trial > free
pub fn pricing(raw: &str) -> (Pricing, &'static str) {
    let lower = raw.to_lowercase();
    if lower.contains("freemium") {
        (Pricing::Freemium, "Freemium")
    } else if lower.contains("paid") || raw.contains('$') {
        (Pricing::Paid, "Paid")
    } else if lower.contains("free trial") {
        (Pricing::Freemium, "Free Trial")
    } else {
        (Pricing::Free, "Free")
    }
}

pub fn visits(raw: &str) -> String {
    VISITS_RE
        .find(raw)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "0".to_string())
}
