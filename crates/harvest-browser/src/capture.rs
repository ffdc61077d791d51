//! Network response capture.
//!
//! Responses whose URL contains one of the configured substrings are read
//! once loading finishes and kept as JSON payloads until drained.

use crate::error::Result;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Requests remembered while waiting for their body.
const MAX_PENDING: usize = 256;

/// Background listener collecting API payloads for one page.
pub struct NetworkCapture {
    payloads: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl NetworkCapture {
    /// Enable the Network domain and start listening.
    ///
    /// With no patterns nothing is captured and no listener is spawned.
    pub async fn start(page: &Page, patterns: Vec<String>) -> Result<Self> {
        let payloads = Arc::new(Mutex::new(Vec::new()));
        if patterns.is_empty() {
            return Ok(Self {
                payloads,
                task: tokio::spawn(async {}),
            });
        }

        page.execute(EnableParams::default()).await?;
        let mut responses = page.event_listener::<EventResponseReceived>().await?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await?;

        let page = page.clone();
        let sink = payloads.clone();
        let task = tokio::spawn(async move {
            let mut pending: HashMap<String, String> = HashMap::new();
            loop {
                tokio::select! {
                    Some(event) = responses.next() => {
                        let url = &event.response.url;
                        if patterns.iter().any(|p| url.contains(p.as_str())) {
                            if pending.len() >= MAX_PENDING {
                                pending.clear();
                            }
                            pending.insert(event.request_id.inner().clone(), url.clone());
                        }
                    }
                    Some(event) = finished.next() => {
                        let Some(url) = pending.remove(event.request_id.inner()) else {
                            continue;
                        };
                        match page.execute(GetResponseBodyParams::new(event.request_id.clone())).await {
                            Ok(body) if body.result.base64_encoded => {
                                debug!(%url, "skipping binary API response");
                            }
                            Ok(body) => match parse_payload(&body.result.body) {
                                Some(value) => {
                                    debug!(%url, "captured API payload");
                                    sink.lock().unwrap_or_else(PoisonError::into_inner).push(value);
                                }
                                None => debug!(%url, "API response is not JSON"),
                            },
                            Err(e) => warn!(%url, error = %e, "failed to read API response body"),
                        }
                    }
                    else => break,
                }
            }
        });

        Ok(Self { payloads, task })
    }

    /// Drain captured payloads.
    pub fn take(&self) -> Vec<Value> {
        std::mem::take(&mut *self.payloads.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for NetworkCapture {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parse a response body as JSON, unwrapping a JSONP callback if present.
pub fn parse_payload(body: &str) -> Option<Value> {
    let body = body.trim();
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }

    let start = body.find('(')?;
    let end = body.rfind(')')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(body[start + 1..end].trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_json() {
        assert_eq!(
            parse_payload(r#" {"data": {"offerList": []}} "#),
            Some(json!({"data": {"offerList": []}}))
        );
    }

    #[test]
    fn test_parse_jsonp() {
        assert_eq!(
            parse_payload(r#"mtopjsonp12({"ret":["SUCCESS::ok"],"data":{"id":1}})"#),
            Some(json!({"ret": ["SUCCESS::ok"], "data": {"id": 1}}))
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_payload("<html></html>"), None);
        assert_eq!(parse_payload(")("), None);
    }
}
