use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, LOCATION, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::{Credentials, RegistrySettings};
use crate::domain::{NodeType, RegistryId};
use crate::error::SyncError;
use crate::record::{Record, RecordMeta};
use crate::registry::RegistryClient;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    search_result_total: Option<usize>,
    #[serde(default)]
    result_count: usize,
    #[serde(default)]
    results: Vec<RecordMeta>,
}

#[derive(Clone)]
pub struct OsdfClient {
    client: Client,
    base_url: String,
    namespace: String,
    credentials: Credentials,
}

impl OsdfClient {
    pub fn new(settings: &RegistrySettings, credentials: Credentials) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("biometa-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::RegistryHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| SyncError::RegistryHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            namespace: settings.namespace.clone(),
            credentials,
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    pub fn node_document(&self, record: &Record) -> Value {
        node_document(&self.namespace, record)
    }

    fn search_page(&self, query: &str, page: usize) -> Result<SearchPage, SyncError> {
        let url = format!("{}/nodes/oql/{}/page/{page}", self.base_url, self.namespace);
        let response =
            self.send_with_retries(|| self.authed(self.client.post(&url)).body(query.to_string()))?;
        let response = check_status(response)?;
        response
            .json::<SearchPage>()
            .map_err(|err| SyncError::RegistryResponse(err.to_string()))
    }

    fn send_once(&self, request: RequestBuilder) -> Result<Response, SyncError> {
        request
            .send()
            .map_err(|err| SyncError::RegistryHttp(err.to_string()))
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SyncError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying registry request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying registry request");
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::RegistryHttp(err.to_string()));
                }
            }
        }
    }
}

impl RegistryClient for OsdfClient {
    fn search(&self, node_type: NodeType, query: &str) -> Result<Vec<RecordMeta>, SyncError> {
        let query = format!("({query} && \"{}\"[node_type])", node_type.as_str());
        let mut results = Vec::new();
        let mut total = None;
        let mut page = 1usize;
        loop {
            let batch = self.search_page(&query, page)?;
            let received = batch.results.len();
            let expected = *total
                .get_or_insert(batch.search_result_total.unwrap_or(batch.result_count));
            results.extend(batch.results);
            if received == 0 || results.len() >= expected {
                break;
            }
            page += 1;
        }
        tracing::debug!(%node_type, %query, count = results.len(), "registry search");
        Ok(results)
    }

    fn validate(&self, record: &Record) -> Result<Vec<String>, SyncError> {
        let missing = record.missing_required();
        if !missing.is_empty() {
            return Ok(missing);
        }
        let url = format!("{}/nodes/validate", self.base_url);
        let document = self.node_document(record);
        let response = self.send_with_retries(|| self.authed(self.client.post(&url)).json(&document))?;
        match response.status().as_u16() {
            200 => Ok(Vec::new()),
            422 => {
                let body = response.text().unwrap_or_default();
                Ok(validation_messages(&body))
            }
            _ => check_status(response).map(|_| Vec::new()),
        }
    }

    fn save(&self, record: &Record) -> Result<Option<RegistryId>, SyncError> {
        let document = self.node_document(record);
        let response = match &record.id {
            Some(id) => {
                let url = format!("{}/nodes/{}", self.base_url, id);
                self.send_with_retries(|| self.authed(self.client.put(&url)).json(&document))?
            }
            // Never retried: a repeated insert can duplicate the node.
            None => {
                let url = format!("{}/nodes", self.base_url);
                self.send_once(self.authed(self.client.post(&url)).json(&document))?
            }
        };
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(SyncError::RegistryAuth(status));
        }
        if status >= 500 {
            let message = response.text().unwrap_or_default();
            return Err(SyncError::RegistryStatus { status, message });
        }
        if !response.status().is_success() {
            let message = response.text().unwrap_or_default();
            tracing::warn!(status, %message, node_type = %record.node_type, "registry refused save");
            return Ok(None);
        }
        match &record.id {
            Some(id) => Ok(Some(id.clone())),
            None => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| {
                        SyncError::RegistryResponse("insert response without Location".to_string())
                    })?;
                id_from_location(location).map(Some)
            }
        }
    }
}

fn node_document(namespace: &str, record: &Record) -> Value {
    let mut document = json!({
        "ns": namespace,
        "node_type": record.node_type.as_str(),
        "acl": {"read": ["all"], "write": [namespace]},
        "linkage": record.linkage,
        "meta": record.meta_document(),
    });
    if let Some(ver) = record.version {
        document["ver"] = json!(ver);
    }
    document
}

fn id_from_location(location: &str) -> Result<RegistryId, SyncError> {
    location
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .parse()
}

// 422 bodies are either a JSON list of messages or plain text.
fn validation_messages(body: &str) -> Vec<String> {
    let messages = match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(message) => message,
                other => other.to_string(),
            })
            .collect(),
        Ok(Value::Object(map)) => match map.get("errors").or_else(|| map.get("error")) {
            Some(Value::Array(items)) => items.iter().map(value_text).collect(),
            Some(value) => vec![value_text(value)],
            None => vec![body.to_string()],
        },
        _ => body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    };
    if messages.is_empty() {
        vec!["registry rejected the record".to_string()]
    } else {
        messages
    }
}

fn value_text(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status().as_u16();
    if status == 401 || status == 403 {
        return Err(SyncError::RegistryAuth(status));
    }
    if !response.status().is_success() {
        let message = response
            .text()
            .unwrap_or_else(|_| "registry request failed".to_string());
        return Err(SyncError::RegistryStatus { status, message });
    }
    Ok(response)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
