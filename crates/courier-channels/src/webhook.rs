//! Webhook channel: plain HTTP GET with a bounded timeout.

use async_trait::async_trait;
use courier_core::config::WebhookConfig;
use courier_core::error::{CourierError, Result};
use courier_core::traits::{WebhookClient, WebhookResponse};

/// reqwest-backed webhook client.
pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Config(format!("Webhook client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn get(&self, url: &str) -> Result<WebhookResponse> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CourierError::Downstream(format!("Webhook request failed: {e}")))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();

        if (200..300).contains(&status) {
            tracing::info!("✅ Webhook {url} → {status}");
        } else {
            tracing::warn!("⚠️ Webhook {url} → {status}");
        }

        Ok(WebhookResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(timeout_secs: u64) -> HttpWebhookClient {
        HttpWebhookClient::new(&WebhookConfig { timeout_secs }).unwrap()
    }

    #[tokio::test]
    async fn test_success_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drop/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(5)
            .get(&format!("{}/drop/5", server.uri()))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "ok");
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let resp = client(5).get(&server.uri()).await.unwrap();
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body, "boom");
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = client(1).get(&server.uri()).await.unwrap_err();
        assert!(matches!(err, CourierError::Downstream(_)));
    }
}
