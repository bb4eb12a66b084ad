use std::sync::Arc;

use bay_payment_engine::traits::{NotifyOutcome, NotifyTransport};
use log::{debug, trace};
use reqwest::Client;

use crate::{config::NotifyHttpConfig, errors::ServerError};

/// How much of a merchant's answer body we keep for the failure record.
const BODY_SNIPPET_LEN: usize = 200;

/// The production notification transport: one pooled reqwest client POSTing signed forms at
/// merchant callback URLs. The timeouts are the only knobs; everything else about a delivery
/// (payload, retries, circuit breaking) is decided by the engine.
#[derive(Clone)]
pub struct HttpNotifier {
    client: Arc<Client>,
}

impl HttpNotifier {
    pub fn new(config: &NotifyHttpConfig) -> Result<Self, ServerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent("Bay-Payment-Notify/1.0")
            .build()
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { client: Arc::new(client) })
    }
}

impl NotifyTransport for HttpNotifier {
    async fn deliver(&self, url: &str, form: &[(String, String)]) -> NotifyOutcome {
        trace!("📨️ Delivering payment notification to {url}");
        let response = match self.client.post(url).form(form).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("📨️ No answer from {url}: {e}");
                return NotifyOutcome::Timeout(e.to_string());
            },
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!("📨️ Answer from {url} broke off mid-body: {e}");
                return NotifyOutcome::Timeout(format!("reading response body: {e}"));
            },
        };
        if status.is_success() && body.trim().eq_ignore_ascii_case("success") {
            trace!("📨️ Merchant at {url} acknowledged the notification");
            NotifyOutcome::Success
        } else {
            let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
            debug!("📨️ Merchant at {url} answered HTTP {status} without acknowledging: {snippet}");
            NotifyOutcome::BadResponse(format!("HTTP {status}: {snippet}"))
        }
    }
}
