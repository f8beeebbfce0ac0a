mod assess;
mod health;
mod outcomes;

pub use assess::assess_handler;
pub use health::{health_handler, metrics_handler};
pub use outcomes::outcomes_handler;

use crate::auth::JwtHandler;
use crate::context::ContextEngine;
use crate::orchestrator::RiskOrchestrator;
use crate::store::Store;
use crate::trust::TrustUpdater;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RiskOrchestrator>,
    pub trust_updater: Arc<TrustUpdater>,
    pub store: Store,
    pub context: Arc<ContextEngine>,
    pub jwt: Arc<JwtHandler>,
    pub metrics_handle: Arc<PrometheusHandle>,
}
