//! SMS delivery capability.
//!
//! Delivery is injected: the issue flow only sees `SmsSender::deliver`,
//! which performs a bounded retry-with-backoff around single send attempts
//! and surfaces the final failure to the caller. The default sender for
//! local dev logs the payload instead of sending real SMS. Every network
//! attempt is bounded by the client timeout; there is no background queue.

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, info, info_span, warn};
use url::Url;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DELIVERY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(300);
const BACKOFF_MAX: Duration = Duration::from_secs(2);

pub enum SmsSender {
    Log(LogSmsSender),
    Http(HttpSmsSender),
}

impl SmsSender {
    #[must_use]
    pub fn log() -> Self {
        Self::Log(LogSmsSender)
    }

    /// Build an HTTP sender for a provider endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn http(endpoint: Url, api_key: SecretString) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::api::APP_USER_AGENT)
            .timeout(SEND_TIMEOUT)
            .build()
            .context("failed to build SMS HTTP client")?;
        Ok(Self::Http(HttpSmsSender {
            client,
            endpoint,
            api_key,
        }))
    }

    /// Deliver a verification code, retrying transient failures with
    /// exponential backoff. Attempts are bounded; the last error wins.
    ///
    /// # Errors
    ///
    /// Returns the final send error after all attempts are exhausted.
    pub async fn deliver(&self, phone: &str, code: &str) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            match self.send(phone, code).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!("SMS delivery attempt {attempt} failed: {err}");
                    last_error = Some(err);
                    if attempt < MAX_DELIVERY_ATTEMPTS {
                        sleep(backoff_delay(attempt, BACKOFF_BASE, BACKOFF_MAX)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("SMS delivery failed")))
    }

    async fn send(&self, phone: &str, code: &str) -> Result<()> {
        match self {
            Self::Log(sender) => sender.send(phone, code),
            Self::Http(sender) => sender.send(phone, code).await,
        }
    }
}

/// Local dev sender that logs instead of sending real SMS.
#[derive(Clone, Debug)]
pub struct LogSmsSender;

impl LogSmsSender {
    fn send(&self, phone: &str, code: &str) -> Result<()> {
        info!(phone = %phone, code = %code, "sms send stub");
        Ok(())
    }
}

#[derive(Serialize)]
struct SmsPayload<'a> {
    to: &'a str,
    message: String,
}

pub struct HttpSmsSender {
    client: Client,
    endpoint: Url,
    api_key: SecretString,
}

impl HttpSmsSender {
    async fn send(&self, phone: &str, code: &str) -> Result<()> {
        let payload = SmsPayload {
            to: phone,
            message: format!("Your verification code is {code}. It expires in 2 minutes."),
        };

        let span = info_span!(
            "sms.send",
            http.method = "POST",
            url = %self.endpoint
        );
        async {
            let response = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(self.api_key.expose_secret())
                .json(&payload)
                .send()
                .await
                .context("failed to send SMS request")?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(anyhow!(
                    "SMS provider responded with status {}",
                    response.status()
                ))
            }
        }
        .instrument(span)
        .await
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sender_always_delivers() -> Result<()> {
        let sender = SmsSender::log();
        sender.deliver("989120000000", "123456").await?;
        Ok(())
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        let base = Duration::from_millis(300);
        let max = Duration::from_secs(2);
        for attempt in 1..=10 {
            let delay = backoff_delay(attempt, base, max);
            assert!(delay <= max, "attempt {attempt} exceeded the cap");
        }
        // Jitter keeps at least half of the nominal delay.
        assert!(backoff_delay(1, base, max) >= Duration::from_millis(150));
    }

    #[test]
    fn http_sender_builds() -> Result<()> {
        let endpoint = Url::parse("https://sms.provider.test/v1/messages")?;
        let sender = SmsSender::http(endpoint, SecretString::from("key"))?;
        assert!(matches!(sender, SmsSender::Http(_)));
        Ok(())
    }
}
