//! JSON-over-HTTP helper shared by the remote embedding and generation
//! providers.

use std::time::Duration;

use crate::error::ProviderError;

pub(crate) fn client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST `body` and decode the JSON reply. Non-2xx statuses become
/// [`ProviderError::Http`] so the caller's retry policy can classify them.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(token) = bearer {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::transport(provider, e))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProviderError::transport(provider, e)
            } else {
                ProviderError::invalid(provider, e)
            }
        })
}
