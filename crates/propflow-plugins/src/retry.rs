use crate::{ConcurrencyLimiter, ServiceError};
use propflow_core::PipelineConfig;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Exponential backoff applied to rate-limited calls only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            multiplier: 2,
            cap: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            base: Duration::from_millis(config.ai_retry_base_ms),
            multiplier: config.ai_retry_multiplier.max(1),
            cap: Duration::from_millis(config.ai_retry_max_ms),
            max_attempts: config.ai_retry_max_attempts.max(1),
        }
    }

    /// Delay before retry number `retry` (1-based). A server supplied
    /// `Retry-After` wins when it is longer, but never beyond the cap.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        let computed = self.base.saturating_mul(factor).min(self.cap);

        match retry_after {
            Some(hint) if hint > computed => hint.min(self.cap),
            _ => computed,
        }
    }
}

/// Attempt bookkeeping for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptLog {
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Run `op` under the limiter, retrying only rate-limit errors.
///
/// A permit is held for each attempt and released while sleeping, so a
/// backing-off job never starves the others.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &ConcurrencyLimiter,
    item_id: Uuid,
    log: &mut AttemptLog,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    loop {
        let result = {
            let _permit = limiter.acquire().await?;
            log.attempts += 1;
            op().await
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() && log.attempts < policy.max_attempts => {
                let delay = policy.delay_for(log.attempts, err.retry_after());
                tracing::warn!(
                    item_id = %item_id,
                    service = err.service(),
                    attempt = log.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Rate limited, backing off"
                );
                log.last_error = Some(err.to_string());
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                log.last_error = Some(err.to_string());
                return Err(err);
            }
        }
    }
}
