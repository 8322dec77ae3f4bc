use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::config::ResolverSettings;
use crate::domain::GeneId;
use crate::error::UnifyError;

/// Symbol to gene id. Every queried symbol has an entry; `None` marks an unresolved symbol.
pub type GeneMap = BTreeMap<String, Option<GeneId>>;

pub trait GeneResolver: Send + Sync {
    fn resolve(&self, symbols: &[String]) -> Result<GeneMap, UnifyError>;
}

impl<R: GeneResolver + ?Sized> GeneResolver for &R {
    fn resolve(&self, symbols: &[String]) -> Result<GeneMap, UnifyError> {
        (**self).resolve(symbols)
    }
}

impl<R: GeneResolver + ?Sized> GeneResolver for Box<R> {
    fn resolve(&self, symbols: &[String]) -> Result<GeneMap, UnifyError> {
        (**self).resolve(symbols)
    }
}

#[derive(Clone)]
pub struct MyGeneHttpClient {
    client: Client,
    base_url: String,
    species: String,
    batch_size: usize,
}

impl MyGeneHttpClient {
    pub fn new(settings: &ResolverSettings) -> Result<Self, UnifyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-unify/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| UnifyError::ResolverHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| UnifyError::ResolverHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            species: settings.species.clone(),
            batch_size: settings.batch_size.max(1),
        })
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }

    fn query_batch(&self, batch: &[String]) -> Result<Vec<(String, Option<GeneId>)>, UnifyError> {
        let url = self.query_url();
        let joined = batch.join(",");
        let params = [
            ("q", joined.as_str()),
            ("scopes", "symbol"),
            ("fields", "entrezgene"),
            ("species", self.species.as_str()),
        ];
        let response = self.send_with_retries(|| self.client.post(&url).form(&params))?;
        let response = Self::handle_status(response)?;
        let raw: Value = response
            .json()
            .map_err(|err| {
                if err.is_timeout() {
                    UnifyError::ResolverTimeout(err.to_string())
                } else {
                    UnifyError::ResolverResponse(err.to_string())
                }
            })?;
        parse_query_response(&raw)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, UnifyError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) if err.is_timeout() => {
                    return Err(UnifyError::ResolverTimeout(err.to_string()));
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(UnifyError::ResolverHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, UnifyError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "gene query failed".to_string());
        Err(UnifyError::ResolverStatus { status, message })
    }
}

impl GeneResolver for MyGeneHttpClient {
    fn resolve(&self, symbols: &[String]) -> Result<GeneMap, UnifyError> {
        let unique = unique_symbols(symbols);
        let mut resolved = GeneMap::new();
        for batch in unique.chunks(self.batch_size) {
            debug!(symbols = batch.len(), "querying gene ids");
            for (query, id) in self.query_batch(batch)? {
                let slot = resolved.entry(query).or_insert(None);
                if slot.is_none() {
                    *slot = id;
                }
            }
        }
        Ok(complete(symbols, resolved))
    }
}

pub fn parse_query_response(raw: &Value) -> Result<Vec<(String, Option<GeneId>)>, UnifyError> {
    let hits = raw
        .as_array()
        .ok_or_else(|| UnifyError::ResolverResponse("expected a JSON array".to_string()))?;
    let mut pairs = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(query) = hit.get("query").and_then(Value::as_str) else {
            continue;
        };
        let id = hit.get("entrezgene").and_then(|value| match value {
            Value::String(text) => text.parse::<GeneId>().ok(),
            Value::Number(number) => number.as_u64().map(GeneId::new),
            _ => None,
        });
        pairs.push((query.to_string(), id));
    }
    Ok(pairs)
}

#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    ids: BTreeMap<String, GeneId>,
}

impl TableResolver {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, GeneId)>,
    {
        let mut ids = BTreeMap::new();
        for (symbol, id) in pairs {
            ids.entry(symbol).or_insert(id);
        }
        Self { ids }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, UnifyError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path.as_std_path())
            .map_err(|err| UnifyError::Filesystem(format!("open {path}: {err}")))?;
        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| UnifyError::MalformedTable {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
            let symbol = record.get(0).unwrap_or_default().trim();
            let id = record.get(1).unwrap_or_default();
            if symbol.is_empty() || id.trim().is_empty() {
                continue;
            }
            let id = id.parse::<GeneId>().map_err(|err| UnifyError::MalformedTable {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
            pairs.push((symbol.to_string(), id));
        }
        Ok(Self::from_pairs(pairs))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl GeneResolver for TableResolver {
    fn resolve(&self, symbols: &[String]) -> Result<GeneMap, UnifyError> {
        Ok(symbols
            .iter()
            .map(|symbol| (symbol.clone(), self.ids.get(symbol).copied()))
            .collect())
    }
}

fn unique_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .filter(|symbol| seen.insert(symbol.as_str()))
        .cloned()
        .collect()
}

fn complete(symbols: &[String], mut resolved: GeneMap) -> GeneMap {
    for symbol in symbols {
        resolved.entry(symbol.clone()).or_insert(None);
    }
    resolved
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_symbols_keep_first_order() {
        let symbols = vec!["TP53".to_string(), "EGFR".to_string(), "TP53".to_string()];
        assert_eq!(unique_symbols(&symbols), vec!["TP53", "EGFR"]);
    }

    #[test]
    fn complete_marks_unanswered_symbols() {
        let symbols = vec!["TP53".to_string(), "WERT".to_string()];
        let mut resolved = GeneMap::new();
        resolved.insert("TP53".to_string(), Some(GeneId::new(7157)));
        let map = complete(&symbols, resolved);
        assert_eq!(map.get("WERT"), Some(&None));
        assert_eq!(map.len(), 2);
    }
}
