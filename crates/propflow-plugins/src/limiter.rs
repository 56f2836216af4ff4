use crate::ServiceError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps the number of in-flight calls to one external service.
///
/// Clones share the same permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    service: &'static str,
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(service: &'static str, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            service,
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ServiceError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServiceError::unavailable(self.service, "Concurrency limiter closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_are_shared_between_clones() {
        let limiter = ConcurrencyLimiter::new("svc", 2);
        let other = limiter.clone();

        let a = limiter.acquire().await.unwrap();
        let _b = other.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);

        drop(a);
        assert_eq!(other.available(), 1);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new("svc", 0).limit(), 1);
    }
}
