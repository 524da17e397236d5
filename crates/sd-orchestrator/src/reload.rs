//! Hot reload trigger

use sd_core::config::NodeProfile;
use sd_core::retry::{retry, RetryPolicy};

/// POST the node's reload endpoint until a 2xx answer or the policy runs out.
///
/// Returns `false` on exhaustion; callers decide whether that is fatal.
pub async fn hot_reload(client: &reqwest::Client, node: &NodeProfile, policy: &RetryPolicy) -> bool {
    let url = node.reload_url();
    let label = format!("{} hot reload", node.name);

    let result = retry(policy, &label, |attempt| {
        let request = client.post(&url);
        let url = url.clone();
        async move {
            tracing::debug!("Reload attempt {} -> {}", attempt, url);
            let response = request.send().await.map_err(|e| e.to_string())?;
            let status = response.status();
            if status.is_success() {
                Ok::<(), String>(())
            } else {
                Err(format!("HTTP {}", status))
            }
        }
    })
    .await;

    match result {
        Ok(()) => {
            tracing::info!("{}: hot reload acknowledged", node.name);
            true
        }
        Err(exhausted) => {
            tracing::warn!("{}", exhausted);
            false
        }
    }
}
