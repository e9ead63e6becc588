use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::config::StoreCredentials;
use crate::error::StoreError;
use crate::model::RemoteRow;

const PAGE_SIZE: usize = 1000;

/// `column = value` row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<String>) -> Self {
        Filter {
            column: column.to_string(),
            value: value.into(),
        }
    }

    fn query_pair(&self) -> (String, String) {
        (self.column.clone(), format!("eq.{}", self.value))
    }

    #[cfg(test)]
    fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

/// Hosted table store. Rows are JSON objects keyed by `id`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(
        &self,
        table: &str,
        columns: &[&str],
        filter: Option<&Filter>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert or merge by primary key; returns rows sent.
    async fn upsert(&self, table: &str, rows: &[Value]) -> Result<usize, StoreError>;

    /// Returns rows removed.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, StoreError>;
}

/// `{id, url}` of every row in `table`.
pub async fn remote_rows(store: &dyn RecordStore, table: &str) -> Result<Vec<RemoteRow>, StoreError> {
    let rows = store.select(table, &["id", "url"], None).await?;
    let remote = rows
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<RemoteRow>, _>>()?;
    Ok(remote)
}

// ── PostgREST ──

/// Supabase / PostgREST client.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    key: String,
}

impl RestStore {
    pub fn new(creds: &StoreCredentials, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(RestStore {
            client,
            base_url: creds.url.clone(),
            key: creds.key.clone(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }
}

async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RecordStore for RestStore {
    async fn select(
        &self,
        table: &str,
        columns: &[&str],
        filter: Option<&Filter>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut rows = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut req = self.request(Method::GET, table).query(&[
                ("select", columns.join(",")),
                ("limit", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ]);
            if columns.contains(&"id") {
                req = req.query(&[("order", "id.asc")]);
            }
            if let Some(f) = filter {
                req = req.query(&[f.query_pair()]);
            }

            let page: Vec<Value> = check(req.send().await?).await?.json().await?;
            let n = page.len();
            rows.extend(page);
            debug!("Fetched {} rows from {} (offset {})", n, table, offset);

            if n < PAGE_SIZE {
                break;
            }
            offset += n;
        }

        Ok(rows)
    }

    async fn upsert(&self, table: &str, rows: &[Value]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let req = self
            .request(Method::POST, table)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows);
        check(req.send().await?).await?;
        Ok(rows.len())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        let req = self
            .request(Method::DELETE, table)
            .header("Prefer", "return=representation")
            .query(&[filter.query_pair()]);
        let removed: Vec<Value> = check(req.send().await?).await?.json().await?;
        Ok(removed.len())
    }
}
