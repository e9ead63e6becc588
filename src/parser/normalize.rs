use url::Url;

/// Strip query, fragment and trailing slash so tracking variants of the
/// same link collapse to one key. Idempotent.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(u) if u.has_host() => {
            let host = u.host_str().unwrap_or_default();
            let port = u.port().map(|p| format!(":{}", p)).unwrap_or_default();
            let path = u.path().trim_end_matches('/');
            format!("{}://{}{}{}", u.scheme(), host, port, path)
        }
        _ => {
            let cut = raw.find(['?', '#']).unwrap_or(raw.len());
            raw[..cut].trim_end_matches('/').to_string()
        }
    }
}

/// Resolve a (possibly relative) href against the site base, then normalize.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let joined = match Url::parse(href) {
        Ok(u) => u,
        Err(_) => Url::parse(base).ok()?.join(href).ok()?,
    };
    Some(normalize_url(joined.as_str()))
}

/// Only absolute URLs count as a logo.
pub fn absolute_or_empty(logo: &str) -> String {
    let logo = logo.trim();
    match Url::parse(logo) {
        Ok(u) if u.has_host() => logo.to_string(),
        _ => String::new(),
    }
}
