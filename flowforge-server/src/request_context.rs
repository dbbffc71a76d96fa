//! Per-request tracing context: a `requestId` generated or copied from an
//! inbound `X-Request-ID` header, echoed on every response (§6).
//!
//! Grounded on `ultrafast-gateway/src/request_context.rs`, trimmed of the
//! `user_id`/`api_key` fields — there is no identity layer here (§1 explicit
//! non-goal).

use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn with_request_id(request_id: String) -> Self {
        Self {
            request_id,
            start_time: Instant::now(),
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_fresh_id_when_none_supplied() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn reuses_a_supplied_id() {
        let ctx = RequestContext::with_request_id("req-123".to_string());
        assert_eq!(ctx.request_id, "req-123");
    }
}
