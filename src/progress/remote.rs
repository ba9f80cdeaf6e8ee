use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use super::{CredentialSource, ItemKind, PlaybackItem, RemoteProgressStore, SaveOutcome};
use crate::error::StoreError;
use crate::http::{get_text, post_json};

/// Bearer token captured when the command starts.
#[derive(Debug, Clone, Default)]
pub(crate) struct StaticCredential(Option<String>);

impl StaticCredential {
    pub(crate) fn new(token: Option<String>) -> Self {
        Self(token.filter(|token| !token.trim().is_empty()))
    }
}

impl CredentialSource for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Progress store backed by the catalog API's `/progress` routes.
pub(crate) struct HttpProgressStore {
    base_url: String,
    timeout: Duration,
    credential: Arc<dyn CredentialSource>,
}

impl HttpProgressStore {
    pub(crate) fn new(
        base_url: &str,
        timeout: Duration,
        credential: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            credential,
        }
    }
}

impl RemoteProgressStore for HttpProgressStore {
    fn fetch(&self, item: &PlaybackItem) -> Result<Option<f64>, StoreError> {
        let Some(token) = self.credential.bearer_token() else {
            debug!(item_id = %item.item_id, "no credential; remote progress not queried");
            return Ok(None);
        };
        let url = format!("{}/progress/get", self.base_url);
        let query = vec![(item.kind.id_field().to_string(), item.item_id.clone())];
        match get_text(&url, Some(token.as_str()), &query, self.timeout) {
            Ok(body) => parse_progress_body(&body),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save(&self, item: &PlaybackItem, time_seconds: u64) -> Result<SaveOutcome, StoreError> {
        let Some(token) = self.credential.bearer_token() else {
            return Ok(SaveOutcome::Skipped);
        };
        let url = format!("{}/progress/save", self.base_url);
        post_json(&url, Some(token.as_str()), &save_payload(item, time_seconds), self.timeout)?;
        Ok(SaveOutcome::Saved)
    }

    fn accepts_writes(&self) -> bool {
        self.credential.bearer_token().is_some()
    }
}

pub(crate) fn parse_progress_body(body: &str) -> Result<Option<f64>, StoreError> {
    if body.trim().is_empty() || body.trim() == "null" {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(body).map_err(|err| StoreError::Decode(err.to_string()))?;
    let seconds = match value.get("time_seconds") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(seconds.filter(|seconds| seconds.is_finite() && *seconds > 0.0))
}

/// Numeric ids go out as JSON numbers, like the web client sent them.
pub(crate) fn id_value(raw: &str) -> Value {
    match raw.trim().parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::from(raw),
    }
}

pub(crate) fn save_payload(item: &PlaybackItem, time_seconds: u64) -> Value {
    let mut body = Map::new();
    body.insert(item.kind.id_field().to_string(), id_value(&item.item_id));
    if item.kind == ItemKind::Episode
        && let Some(series_id) = &item.parent_id
    {
        body.insert("series_id".to_string(), id_value(series_id));
    }
    body.insert("time_seconds".to_string(), Value::from(time_seconds));
    Value::Object(body)
}
