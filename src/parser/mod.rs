pub mod classify;
pub mod extract;
pub mod fields;
pub mod normalize;

use rayon::prelude::*;

use crate::error::SkipReason;
use crate::model::{RawRecord, Tool};

/// Per-record result; one bad card never aborts the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Ok(Tool),
    Skipped { slug: String, reason: SkipReason },
}

/// Two-pass pipeline: card text → fields → classified tool.
pub fn process_record(raw: &RawRecord, base_url: &str, observed_at: &str) -> ParseOutcome {
    let slug = raw.slug.trim();
    if slug.is_empty() {
        return ParseOutcome::Skipped {
            slug: String::new(),
            reason: SkipReason::MissingSlug,
        };
    }
    let Some(url) = normalize::resolve_url(base_url, &raw.url) else {
        return ParseOutcome::Skipped {
            slug: slug.to_string(),
            reason: SkipReason::MissingUrl,
        };
    };

    let lines = fields::card_lines(&raw.raw_text);
    let card = fields::scan_lines(&lines);
    let (pricing, pricing_label) = fields::pricing(&raw.raw_text);

    let mut tool = Tool {
        id: slug.to_string(),
        name: fields::validated_name(card.name.clone(), slug),
        description: card.description.clone(),
        url,
        category: Default::default(),
        category_label: String::new(),
        tags: raw
            .tags
            .iter()
            .take(extract::MAX_TAGS)
            .cloned()
            .collect(),
        pricing,
        pricing_label: pricing_label.to_string(),
        visits: fields::visits(&raw.raw_text),
        rating: 0.0,
        logo: normalize::absolute_or_empty(&raw.logo),
        is_new: false,
        is_trending: false,
        launch_date: observed_at.to_string(),
    };
    classify::apply(&mut tool, &card);

    ParseOutcome::Ok(tool)
}

/// Parse a batch in parallel, keeping input order. Returns the tools and
/// the skipped slugs with their reasons.
pub fn process_all(
    raws: &[RawRecord],
    base_url: &str,
    observed_at: &str,
) -> (Vec<Tool>, Vec<(String, SkipReason)>) {
    let outcomes: Vec<ParseOutcome> = raws
        .par_iter()
        .map(|r| process_record(r, base_url, observed_at))
        .collect();

    let mut tools = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            ParseOutcome::Ok(t) => tools.push(t),
            ParseOutcome::Skipped { slug, reason } => skipped.push((slug, reason)),
        }
    }
    (tools, skipped)
}

// ── Tests ──
