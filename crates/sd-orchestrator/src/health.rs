//! Health gate
//!
//! A node is healthy when its health endpoint answers with a body reporting
//! `"status": "healthy"`, `"status": "ok"` or `"success": true`.

use sd_core::config::NodeProfile;
use sd_core::retry::{retry, RetryPolicy};
use sd_core::GateDecision;

/// Poll the health endpoint under `policy`
pub async fn health_check(
    client: &reqwest::Client,
    node: &NodeProfile,
    policy: &RetryPolicy,
) -> GateDecision {
    let url = node.health_url();
    let subject = format!("{} health", node.name);

    let result = retry(policy, &subject, |attempt| {
        let request = client.get(&url);
        async move {
            let response = request.send().await.map_err(|e| e.to_string())?;
            let status = response.status();
            let body = response.text().await.map_err(|e| e.to_string())?;
            tracing::debug!("Health attempt {}: HTTP {} {}", attempt, status, body.trim());
            if is_healthy_body(&body) {
                Ok::<String, String>(body)
            } else {
                Err(format!("HTTP {}: {}", status, excerpt(&body)))
            }
        }
    })
    .await;

    match result {
        Ok(_) => {
            tracing::info!("{}: healthy", node.name);
            GateDecision::pass(subject, format!("{} reports healthy", url))
        }
        Err(exhausted) => {
            tracing::warn!("{}", exhausted);
            GateDecision::fail(
                subject,
                format!("unhealthy after {} attempt(s): {}", exhausted.attempts, exhausted.last),
            )
        }
    }
}

/// Single best-effort business request; a 2xx answer passes
pub async fn smoke_check(
    client: &reqwest::Client,
    node: &NodeProfile,
    path: &str,
    timeout: Option<std::time::Duration>,
) -> GateDecision {
    let url = node.url(path);
    let subject = format!("{} smoke", node.name);
    let mut request = client.get(&url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    match request.send().await {
        Ok(response) if response.status().is_success() => {
            GateDecision::pass(subject, format!("{} answered {}", url, response.status()))
        }
        Ok(response) => GateDecision::fail(subject, format!("{} answered {}", url, response.status())),
        Err(e) => GateDecision::fail(subject, format!("{}: {}", url, e)),
    }
}

/// Whether a health response body reports a healthy service.
///
/// JSON bodies are inspected structurally; anything else falls back to a
/// textual match.
pub fn is_healthy_body(body: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => {
            let status_ok = value
                .get("status")
                .and_then(|s| s.as_str())
                .map(|s| s.eq_ignore_ascii_case("healthy") || s.eq_ignore_ascii_case("ok"))
                .unwrap_or(false);
            let success = value.get("success").and_then(|s| s.as_bool()).unwrap_or(false);
            status_ok || success
        }
        Err(_) => {
            let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            let compact = compact.to_ascii_lowercase();
            compact.contains(r#""status":"healthy""#)
                || compact.contains(r#""status":"ok""#)
                || compact.contains(r#""success":true"#)
        }
    }
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(120) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
