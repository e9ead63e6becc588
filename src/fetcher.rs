use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::parser::extract::extract_cards;

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Where a navigation ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct Landing {
    pub final_url: String,
    pub title: String,
}

/// Browser-like page driver. Implementations own one "tab".
#[async_trait]
pub trait PageFetcher: Send {
    async fn navigate(&mut self, url: &str) -> Result<Landing, FetchError>;

    /// Current DOM snapshot as HTML.
    async fn content(&mut self) -> Result<String, FetchError>;

    /// Reveal more content (infinite scroll).
    async fn scroll_to_bottom(&mut self) -> Result<(), FetchError>;

    /// Click the first element matching `selector`; `false` if none.
    async fn click(&mut self, selector: &str) -> Result<bool, FetchError>;

    /// Outer HTML of every element matching `selector`.
    async fn query(&mut self, selector: &str) -> Result<Vec<String>, FetchError> {
        let html = self.content().await?;
        Ok(select_html(&html, selector))
    }
}

pub fn select_html(html: &str, selector: &str) -> Vec<String> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };
    Html::parse_document(html)
        .select(&sel)
        .map(|el| el.html())
        .collect()
}

pub fn page_title(html: &str) -> String {
    Html::parse_document(html)
        .select(&TITLE_SEL)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// `https://x/period/march/` + 3 → `https://x/period/march/?page=3`
pub fn paged_url(url: &str, page: u32) -> Option<String> {
    let mut u = Url::parse(url).ok()?;
    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    u.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", &page.to_string());
    Some(u.to_string())
}

// ── HTTP fetcher ──

enum Transport {
    Direct(reqwest::Client),
    Spider(Arc<Spider>),
}

/// Static fetcher: "scrolling" requests the next `?page=N` of the listing
/// and appends it to the snapshot.
pub struct HttpFetcher {
    transport: Transport,
    current: Option<String>,
    pages: Vec<String>,
    next_page: u32,
    exhausted: bool,
}

impl HttpFetcher {
    pub fn direct(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_transport(Transport::Direct(client)))
    }

    /// Render through spider.cloud instead of fetching directly.
    pub fn spider(api_key: &str) -> Result<Self, FetchError> {
        let spider = Spider::new(Some(api_key.to_string()))
            .map_err(|e| FetchError::Remote(format!("failed to create Spider client: {}", e)))?;
        Ok(Self::with_transport(Transport::Spider(Arc::new(spider))))
    }

    fn with_transport(transport: Transport) -> Self {
        HttpFetcher {
            transport,
            current: None,
            pages: Vec::new(),
            next_page: 2,
            exhausted: false,
        }
    }

    async fn get(&self, url: &str) -> Result<(String, String), FetchError> {
        match &self.transport {
            Transport::Direct(client) => {
                let resp = client.get(url).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                let final_url = resp.url().to_string();
                Ok((final_url, resp.text().await?))
            }
            Transport::Spider(spider) => spider_get(spider, url).await,
        }
    }
}

async fn spider_get(spider: &Spider, url: &str) -> Result<(String, String), FetchError> {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        ..Default::default()
    };

    let response = spider
        .scrape_url(url, Some(params), "application/json")
        .await
        .map_err(|e| FetchError::Remote(e.to_string()))?;

    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    let status = first
        .and_then(|obj| obj.get("status"))
        .and_then(|s| s.as_u64())
        .unwrap_or(200);
    if status >= 400 {
        return Err(FetchError::Status {
            status: status as u16,
            url: url.to_string(),
        });
    }

    let final_url = first
        .and_then(|obj| obj.get("url"))
        .and_then(|u| u.as_str())
        .unwrap_or(url)
        .to_string();
    let content = first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| FetchError::Remote(format!("no content in spider response for {}", url)))?
        .to_string();

    Ok((final_url, content))
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn navigate(&mut self, url: &str) -> Result<Landing, FetchError> {
        let (final_url, body) = self.get(url).await?;
        let title = page_title(&body);

        self.current = Some(final_url.clone());
        self.pages = vec![body];
        self.next_page = 2;
        self.exhausted = false;

        Ok(Landing { final_url, title })
    }

    async fn content(&mut self) -> Result<String, FetchError> {
        if self.current.is_none() {
            return Err(FetchError::NoPage);
        }
        Ok(self.pages.join("\n"))
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), FetchError> {
        let current = self.current.clone().ok_or(FetchError::NoPage)?;
        if self.exhausted {
            return Ok(());
        }
        let Some(next) = paged_url(&current, self.next_page) else {
            self.exhausted = true;
            return Ok(());
        };

        match self.get(&next).await {
            Ok((_, body)) => {
                let repeated = self.pages.last().is_some_and(|last| *last == body);
                if repeated || extract_cards(&body).is_empty() {
                    debug!("No further pages after {}", current);
                    self.exhausted = true;
                } else {
                    self.pages.push(body);
                    self.next_page += 1;
                }
                Ok(())
            }
            Err(FetchError::Status { status: 404, .. }) => {
                self.exhausted = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn click(&mut self, _selector: &str) -> Result<bool, FetchError> {
        // Nothing is clickable in a static snapshot.
        Ok(false)
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;

    use super::*;

    /// One scripted navigation result.
    pub enum NavScript {
        Land(Landing),
        Fail(FetchError),
    }

    /// In-memory fetcher driven by queued responses. Each scroll reveals
    /// the next queued HTML chunk; when the queue is empty the page stops
    /// changing.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        pub navigations: VecDeque<NavScript>,
        pub reveals: VecDeque<String>,
        pub clicks: VecDeque<bool>,
        pub visited: Vec<String>,
        pub scrolls: u32,
        pub click_calls: u32,
        dom: String,
    }

    impl ScriptedFetcher {
        pub fn land(&mut self, final_url: &str, title: &str) -> &mut Self {
            self.navigations.push_back(NavScript::Land(Landing {
                final_url: final_url.into(),
                title: title.into(),
            }));
            self
        }

        pub fn fail(&mut self, err: FetchError) -> &mut Self {
            self.navigations.push_back(NavScript::Fail(err));
            self
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn navigate(&mut self, url: &str) -> Result<Landing, FetchError> {
            self.visited.push(url.to_string());
            self.dom.clear();
            match self.navigations.pop_front() {
                Some(NavScript::Land(l)) => Ok(l),
                Some(NavScript::Fail(e)) => Err(e),
                None => Err(FetchError::NoPage),
            }
        }

        async fn content(&mut self) -> Result<String, FetchError> {
            Ok(self.dom.clone())
        }

        async fn scroll_to_bottom(&mut self) -> Result<(), FetchError> {
            self.scrolls += 1;
            if let Some(chunk) = self.reveals.pop_front() {
                self.dom.push_str(&chunk);
            }
            Ok(())
        }

        async fn click(&mut self, _selector: &str) -> Result<bool, FetchError> {
            self.click_calls += 1;
            Ok(self.clicks.pop_front().unwrap_or(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_extraction() {
        let html = "<html><head><title>\n  AI tools of March 2024 </title></head></html>";
        assert_eq!(page_title(html), "AI tools of March 2024");
        assert_eq!(page_title("<p>no title</p>"), "");
    }

    #[test]
    fn paged_urls() {
        assert_eq!(
            paged_url("https://theresanaiforthat.com/period/march/", 2).as_deref(),
            Some("https://theresanaiforthat.com/period/march/?page=2")
        );
        assert_eq!(
            paged_url("https://x.com/p/?page=2&sort=new", 3).as_deref(),
            Some("https://x.com/p/?sort=new&page=3")
        );
        assert_eq!(paged_url("not a url", 2), None);
    }

    #[test]
    fn selector_query() {
        let html = r#"<div><button class="load-more">Load more</button><a class="x">a</a></div>"#;
        let found = select_html(html, "button.load-more, .missing");
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("Load more"));
        assert!(select_html(html, "::::").is_empty());
    }

    #[tokio::test]
    async fn unloaded_fetcher_has_no_content() {
        let mut f = HttpFetcher::direct(Duration::from_secs(1)).unwrap();
        assert!(matches!(f.content().await, Err(FetchError::NoPage)));
        assert!(matches!(f.scroll_to_bottom().await, Err(FetchError::NoPage)));
        assert!(!f.click(".load-more").await.unwrap());
    }
}
