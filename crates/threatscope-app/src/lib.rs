#![warn(missing_docs)]
//! # threatscope-app
//!
//! ## Purpose
//! Client-side lifecycle coordination for `threatscope`: submitting a diagram,
//! tracking its analysis to a terminal status, keeping the analyses list fresh
//! and reconciling notification read state.
//!
//! ## Responsibilities
//! - Drive one analysis from submit to settlement ([`AnalysisLifecycleController`]).
//! - Refresh the analyses list on a timer ([`AnalysesCollectionController`]).
//! - Mark notifications read optimistically ([`NotificationCenter`]).
//! - Load runtime configuration and initialise tracing.
//!
//! ## Data flow
//! View event -> controller method -> [`AnalysisGateway`] call -> snapshot
//! commit -> `tokio::sync::watch` receivers -> view.
//!
//! ## Ownership and lifetimes
//! Each controller owns its periodic task and tears it down on `stop`,
//! `teardown` or drop. Snapshots are immutable clones; list payloads are
//! shared as `Arc<[T]>`.
//!
//! ## Error model
//! Controller operations return [`LifecycleError`] or [`GatewayError`] and
//! record a user-facing message in their snapshot. Log fetch failures are
//! absorbed. Wiring failures surface as [`AppError`].
//!
//! ## Security and privacy notes
//! - Staged file bytes are never logged; only name, media type and length.
//! - Log events carry analysis and notification ids, not result payloads.

mod collection;
mod config;
mod lifecycle;
mod notifications;
mod telemetry;

use std::sync::Arc;

use thiserror::Error;
use threatscope_gateway::{AnalysisGateway, GatewayConfig, GatewayError, HttpGateway};

pub use collection::{AnalysesCollectionController, CollectionSnapshot};
pub use config::{
    ControllerConfig, DEFAULT_LIST_REFRESH_MS, DEFAULT_NOTIFICATION_LIMIT, DEFAULT_POLL_INTERVAL_MS,
    ENV_LIST_REFRESH_MS, ENV_MAX_POLL_FAILURES, ENV_NOTIFICATION_LIMIT, ENV_POLL_INTERVAL_MS,
    ENV_READ_FAILURE_POLICY, ReadFailurePolicy,
};
pub use lifecycle::{
    AnalysisLifecycleController, LifecycleError, LifecyclePhase, LifecycleSnapshot, NOTHING_STAGED,
};
pub use notifications::{NotificationCenter, NotificationEntry, NotificationSnapshot};
pub use telemetry::{DEFAULT_LOG_FILTER, ENV_LOG_FILTER, init_tracing, log_filter};

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("THREATSCOPE_VERSION");

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// `User-Agent` sent to the analysis service.
pub fn user_agent() -> String {
    format!("threatscope/{APP_VERSION}")
}

/// Builds the HTTP gateway from the environment.
///
/// # Errors
/// Returns [`AppError::Gateway`] when the base URL override is invalid or the
/// HTTP client cannot be built.
pub fn http_gateway_from_env() -> Result<Arc<dyn AnalysisGateway>, AppError> {
    let config = GatewayConfig::from_env()?.with_user_agent(user_agent());
    tracing::info!(stage = "gateway", action = "configure", base_url = %config.base_url(), timeout_ms = config.timeout().as_millis() as u64, "gateway configured");
    Ok(Arc::new(HttpGateway::new(config)?))
}

/// The three controllers sharing one gateway.
#[derive(Debug)]
pub struct Controllers {
    /// Submit/track controller.
    pub lifecycle: AnalysisLifecycleController,
    /// Analyses list controller.
    pub collection: AnalysesCollectionController,
    /// Notification controller.
    pub notifications: NotificationCenter,
}

impl Controllers {
    /// Wires the controllers onto `gateway`.
    pub fn new(gateway: Arc<dyn AnalysisGateway>, config: &ControllerConfig) -> Self {
        Self {
            lifecycle: AnalysisLifecycleController::new(Arc::clone(&gateway), config.clone()),
            collection: AnalysesCollectionController::new(
                Arc::clone(&gateway),
                config.list_refresh_interval,
            ),
            notifications: NotificationCenter::new(
                gateway,
                config.notification_limit,
                config.read_failure_policy,
            ),
        }
    }

    /// Wires the controllers from environment configuration.
    ///
    /// # Errors
    /// Returns [`AppError::Gateway`] when the gateway cannot be configured.
    pub fn from_env() -> Result<Self, AppError> {
        let gateway = http_gateway_from_env()?;
        Ok(Self::new(gateway, &ControllerConfig::from_env()))
    }
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Gateway configuration or call error.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// Lifecycle controller error.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}
