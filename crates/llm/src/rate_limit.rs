//! Client-side request rate limiting.
//!
//! Wraps any [`AIProvider`] and enforces a sliding-window cap on the number of
//! calls issued per window. Calls beyond the cap wait until the oldest call
//! leaves the window.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::LlmResult;
use crate::provider::{AIMessage, AIProvider, AIResponse, GenerateOptions};

/// Default calls allowed per window.
pub const DEFAULT_REQUESTS_PER_MINUTE: usize = 40;

/// Provider decorator that limits call rate.
pub struct RateLimitedProvider {
    inner: Arc<dyn AIProvider>,
    max_requests: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimitedProvider {
    /// Limit `inner` to `requests_per_minute` calls per rolling minute.
    #[must_use]
    pub fn per_minute(inner: Arc<dyn AIProvider>, requests_per_minute: usize) -> Self {
        Self::new(inner, requests_per_minute, Duration::from_secs(60))
    }

    /// Limit `inner` to `max_requests` calls per `window`.
    #[must_use]
    pub fn new(inner: Arc<dyn AIProvider>, max_requests: usize, window: Duration) -> Self {
        Self {
            inner,
            max_requests: max_requests.max(1),
            window,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a call slot is free, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }

                tracing::debug!(
                    in_window = stamps.len(),
                    max = self.max_requests,
                    "Rate limiter check"
                );

                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }

                match stamps.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            tracing::info!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    #[cfg(test)]
    async fn in_flight_window(&self) -> usize {
        let stamps = self.stamps.lock().await;
        let now = Instant::now();
        stamps
            .iter()
            .filter(|s| now.duration_since(**s) < self.window)
            .count()
    }
}

#[async_trait]
impl AIProvider for RateLimitedProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    fn supported_models(&self) -> Vec<&str> {
        self.inner.supported_models()
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> LlmResult<AIResponse> {
        self.acquire().await;
        self.inner.generate_text(model, messages, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TokenUsage;

    struct EchoProvider;

    #[async_trait]
    impl AIProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn supported_models(&self) -> Vec<&str> {
            vec!["echo-1"]
        }

        async fn generate_text(
            &self,
            model: &str,
            messages: &[AIMessage],
            _options: &GenerateOptions,
        ) -> LlmResult<AIResponse> {
            Ok(AIResponse {
                text: messages
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
                usage: TokenUsage::default(),
                model: model.to_string(),
                provider: "echo".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_within_cap_do_not_wait() {
        let limiter = RateLimitedProvider::new(Arc::new(EchoProvider), 3, Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_over_cap_waits_for_window() {
        let limiter = RateLimitedProvider::new(Arc::new(EchoProvider), 2, Duration::from_secs(60));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delegates_to_inner_provider() {
        let limiter = RateLimitedProvider::per_minute(Arc::new(EchoProvider), 40);
        let response = limiter
            .generate_text(
                "echo-1",
                &[AIMessage::user("ping")],
                &GenerateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.text, "ping");
        assert_eq!(limiter.name(), "echo");
        assert!(limiter.supports_model("echo-1"));
    }
}
