use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// One limiter shared by every quote/swap call in the process
pub type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Build the shared limiter from a requests-per-second budget
pub fn shared_rate_limiter(requests_per_second: u32) -> SharedRateLimiter {
    let quota = Quota::per_second(
        NonZeroU32::new(requests_per_second.max(1)).expect("rate limit must be non-zero"),
    );
    Arc::new(RateLimiter::direct(quota))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_allows_first_request() {
        let limiter = shared_rate_limiter(5);
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_zero_budget_clamps_to_one() {
        let limiter = shared_rate_limiter(0);
        assert!(limiter.check().is_ok());
    }
}
