//! Shared gateway state

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use tg_core::config::GatewayConfig;
use tg_core::events::EventSink;

use crate::enroll::token::{
    DisabledValidator, HttpTokenValidator, StaticTokenValidator, TokenValidator,
};
use crate::ratelimit::RateLimiter;
use crate::registry::store::ConnectionStore;

/// State shared between the enrollment listener and its handlers.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub limiter: RateLimiter,
    pub validator: Arc<dyn TokenValidator>,
    pub connections: Arc<dyn ConnectionStore>,
    pub events: Arc<dyn EventSink>,
    start_time: Instant,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        connections: Arc<dyn ConnectionStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_threshold);
        let validator = Self::build_validator(&config);

        Self {
            config,
            limiter,
            validator,
            connections,
            events,
            start_time: Instant::now(),
        }
    }

    /// Endpoint-backed validation when configured, static token otherwise.
    /// A config with no token source at all gets the validator that
    /// refuses every attempt; enrollment never fails open.
    fn build_validator(config: &GatewayConfig) -> Arc<dyn TokenValidator> {
        match (&config.token_endpoint, &config.static_token) {
            (Some(endpoint), _) => Arc::new(HttpTokenValidator::new(
                endpoint.clone(),
                config.shared_secret.clone(),
            )),
            (None, Some(token)) => Arc::new(StaticTokenValidator::new(token.clone())),
            (None, None) => Arc::new(DisabledValidator),
        }
    }

    pub async fn status(&self) -> GatewayStatus {
        let enrolled = self
            .connections
            .list_connections()
            .await
            .map(|c| c.len())
            .unwrap_or(0);

        GatewayStatus {
            uptime_s: self.start_time.elapsed().as_secs(),
            enrolled_connections: enrolled,
            rate_limited_addresses: self.limiter.tracked_addresses(),
            namespace: self.config.namespace.clone(),
        }
    }
}

/// Snapshot of gateway health, logged at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub uptime_s: u64,
    pub enrolled_connections: usize,
    pub rate_limited_addresses: usize,
    pub namespace: String,
}
