//! Risk Orchestrator: wires the Context Engine, Rules Engine, ML Engine,
//! Decision Engine, and Persistent Store into the end-to-end assessment
//! flow, enforcing per-step and overall advisory budgets.

use crate::context::ContextEngine;
use crate::decision::DecisionEngine;
use crate::error::{AppError, AppResult};
use crate::latency::{SpanBuilder, SpanType};
use crate::metrics;
use crate::ml::{self, MlEngine};
use crate::models::{RiskAssessment, RiskEvent, Transaction};
use crate::rules::RulesEngine;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;

pub struct RiskOrchestrator {
    context: Arc<ContextEngine>,
    rules: RulesEngine,
    ml: MlEngine,
    decision: DecisionEngine,
    store: Store,
    total_deadline: Duration,
    ml_deadline: Duration,
    store_write_deadline: Duration,
    ruleset_version: String,
}

impl RiskOrchestrator {
    pub fn new(
        context: Arc<ContextEngine>,
        rules: RulesEngine,
        ml: MlEngine,
        store: Store,
        total_deadline: Duration,
        ml_deadline: Duration,
        store_write_deadline: Duration,
        ruleset_version: String,
    ) -> Self {
        Self {
            context,
            rules,
            ml,
            decision: DecisionEngine::new(),
            store,
            total_deadline,
            ml_deadline,
            store_write_deadline,
            ruleset_version,
        }
    }

    pub async fn assess(
        &self,
        txn: Transaction,
        idempotency_key: Option<String>,
    ) -> AppResult<RiskAssessment> {
        if let Some(key) = &idempotency_key {
            let store = self.store.clone();
            let key_owned = key.clone();
            if let Ok(Some(cached)) =
                tokio::task::spawn_blocking(move || store.get_idempotent_response(&key_owned)).await
                    .map_err(anyhow::Error::from)?
            {
                return Ok(cached);
            }
        }

        let total_span = SpanBuilder::start(SpanType::TotalAssessment);
        let result = tokio::time::timeout(self.total_deadline, self.assess_inner(&txn)).await;
        let duration_ms = total_span.finish().duration_us as f64 / 1000.0;

        let mut assessment = match result {
            Ok(inner) => inner?,
            Err(_) => return Err(AppError::Timeout),
        };
        assessment.processing_ms = duration_ms.round() as u64;

        metrics::record_assessment(&assessment.action, duration_ms, assessment_is_degraded(&assessment));

        if let Some(key) = idempotency_key {
            let store = self.store.clone();
            let assessment_clone = assessment.clone();
            let _ = tokio::task::spawn_blocking(move || {
                store.store_idempotent_response(&key, &assessment_clone)
            })
            .await;
        }

        Ok(assessment)
    }

    async fn assess_inner(&self, txn: &Transaction) -> AppResult<RiskAssessment> {
        let context_span = SpanBuilder::start(SpanType::ContextFetch);
        let (payer_ctx, receiver_ctx) = tokio::try_join!(
            self.context.get_payer_context(txn.payer_id),
            self.context.get_receiver_context(txn.payer_id, &txn.receiver),
        )?;
        context_span.finish_and_record();

        let rules_span = SpanBuilder::start(SpanType::RulesEval);
        let rules_outcome = self.rules.evaluate(txn, &payer_ctx, &receiver_ctx);
        rules_span.finish_and_record();

        let features = ml::engineer_features(txn, &payer_ctx, &receiver_ctx);
        let device_change = rules_outcome
            .flags
            .iter()
            .any(|f| f == crate::rules::RuleCode::DeviceChange.as_str());
        let (ml_score, ml_degraded, model_version) = if rules_outcome.hard_block {
            (0.0, false, "skipped")
        } else {
            let ml_span = SpanBuilder::start(SpanType::MlInference);
            let prediction =
                tokio::time::timeout(self.ml_deadline, async { self.ml.predict(&features, device_change) }).await;
            ml_span.finish_and_record();
            match prediction {
                Ok(outcome) => (outcome.score, outcome.degraded, outcome.model_version),
                Err(_) => (0.0, true, "timeout"),
            }
        };

        let decide_span = SpanBuilder::start(SpanType::DecisionCombine);
        let decision = self
            .decision
            .combine(payer_ctx.tier, &rules_outcome, ml_score);
        decide_span.finish_and_record();

        let assessment = RiskAssessment {
            transaction_id: txn.id,
            final_score: decision.final_score,
            level: decision.level,
            action: decision.action,
            subscores: decision.subscores,
            flags: rules_outcome.flags.clone(),
            factors: decision.factors,
            recommendations: decision.recommendations,
            processing_ms: 0,
            model_version: model_version.to_string(),
            ruleset_version: self.ruleset_version.clone(),
        };

        let event = RiskEvent {
            transaction_id: txn.id,
            payer_id: txn.payer_id,
            triggered_rules: rules_outcome.flags,
            rule_score: rules_outcome.rule_score,
            ml_score,
            final_score: decision.final_score,
            action: decision.action,
            feature_vector: if rules_outcome.hard_block {
                vec![]
            } else {
                features.as_slice().to_vec()
            },
            assessed_at: chrono::Utc::now(),
            ml_degraded,
        };

        self.persist(txn, &event).await?;

        if !payer_ctx.known_device_set.contains(&txn.device_fingerprint) {
            let store = self.store.clone();
            let payer_id = txn.payer_id;
            let device = txn.device_fingerprint.clone();
            let context = self.context.clone();
            tokio::spawn(async move {
                let updated = tokio::task::spawn_blocking(move || store.add_known_device(payer_id, &device)).await;
                if matches!(updated, Ok(Ok(()))) {
                    context.invalidate_payer(payer_id);
                }
            });
        }

        Ok(assessment)
    }

    async fn persist(&self, txn: &Transaction, event: &RiskEvent) -> AppResult<()> {
        let write_span = SpanBuilder::start(SpanType::StoreWrite);
        let store = self.store.clone();
        let txn_owned = txn.clone();
        let event_owned = event.clone();

        let result = tokio::time::timeout(
            self.store_write_deadline,
            tokio::task::spawn_blocking(move || store.persist_assessment(&txn_owned, &event_owned)),
        )
        .await;
        write_span.finish_and_record();

        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            _ => {
                let store = self.store.clone();
                let txn_owned = txn.clone();
                let event_owned = event.clone();
                let enqueue = tokio::task::spawn_blocking(move || store.enqueue_retry(&txn_owned, &event_owned))
                    .await
                    .map_err(anyhow::Error::from)?;
                match enqueue {
                    Ok(()) => Ok(()),
                    Err(_) => Err(AppError::StoreWritePersistenceFailure),
                }
            }
        }
    }
}

fn assessment_is_degraded(assessment: &RiskAssessment) -> bool {
    assessment.model_version == "fallback" || assessment.model_version == "timeout"
}
