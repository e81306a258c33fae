//! The per-utterance pipeline

use crate::breaker::RollbackBreaker;
use crate::error::SpineError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use warden_constitution::{Constitution, ConstitutionSnapshot, ConstitutionStore};
use warden_drafter::{
    DraftRequest, DraftResponse, Drafter, DrafterError, ModulationParams, TemplateDrafter,
};
use warden_gate::{Gate, GateInput};
use warden_ledger::{IslandState, RecordMeta, RecordPayload, StepLedger};
use warden_sensor::{
    ContextTurn, DriftMonitor, Embedder, LexiconEmbedder, Sensor, SensorConfig,
};
use warden_types::{GateAction, GateDecision, IslandId, PoavInputs, RecordId};
use warden_verifier::Verifier;

/// Startup configuration. Endpoints and capacity are fixed at startup;
/// thresholds and weights hot-reload through the constitution instead.
#[derive(Clone, Debug)]
pub struct SpineConfig {
    /// Bound on concurrently outstanding drafter calls.
    pub max_inflight_drafts: usize,
    pub draft_timeout: Duration,
    pub draft_retry_backoff: Duration,
    /// Islands older than this are sealed on the next submission.
    pub island_ttl: Option<Duration>,
}

impl Default for SpineConfig {
    fn default() -> Self {
        Self {
            max_inflight_drafts: 8,
            draft_timeout: Duration::from_secs(2),
            draft_retry_backoff: Duration::from_millis(50),
            island_ttl: None,
        }
    }
}

/// Result of one end-to-end utterance.
#[derive(Clone, Debug)]
pub struct SubmitOutcome {
    pub island_id: IslandId,
    /// The approved draft, or the constitution's fallback string.
    pub response: String,
    /// The decision that settled the utterance.
    pub decision: GateDecision,
    /// Id of the terminal RESPONSE record.
    pub record_id: RecordId,
    /// The upstream drafter was unavailable and the fallback was emitted.
    pub degraded_draft: bool,
    /// The caller's deadline expired mid-utterance.
    pub cancelled: bool,
}

/// The orchestrator. See the crate docs for the state machine it drives.
pub struct Spine {
    constitution: Arc<ConstitutionStore>,
    ledger: Arc<StepLedger>,
    sensor: Sensor,
    drafter: Arc<dyn Drafter>,
    verifier: Verifier,
    breaker: RollbackBreaker,
    drift: DashMap<IslandId, DriftMonitor>,
    draft_permits: Arc<Semaphore>,
    config: SpineConfig,
}

impl Spine {
    pub fn builder() -> SpineBuilder {
        SpineBuilder::default()
    }

    pub fn ledger(&self) -> &Arc<StepLedger> {
        &self.ledger
    }

    pub fn constitution(&self) -> &Arc<ConstitutionStore> {
        &self.constitution
    }

    /// Open a fresh island.
    pub async fn open_island(&self) -> Result<IslandId, SpineError> {
        let version = self.constitution.snapshot().version();
        Ok(self.ledger.create_island(version).await?)
    }

    /// Seal an island at the caller's request. Idempotent.
    pub async fn close_island(&self, island: &IslandId) -> Result<(), SpineError> {
        let version = self.constitution.snapshot().version();
        self.ledger.close(island, "caller_close", version).await?;
        Ok(())
    }

    /// Recompute the island's chain from the persisted log.
    pub async fn verify(&self, island: &IslandId) -> Result<bool, SpineError> {
        Ok(self.ledger.verify_chain(island).await?)
    }

    /// Current island hash.
    pub async fn tip(&self, island: &IslandId) -> Result<String, SpineError> {
        Ok(self.ledger.tip(island).await?)
    }

    /// Swap the constitution between utterances. In-flight utterances keep
    /// the snapshot they captured at RECEIVED.
    pub fn reload_constitution(&self, constitution: Constitution) -> Result<(), SpineError> {
        Ok(self.constitution.reload(constitution)?)
    }

    /// Process one utterance end to end. Creates an island when none is
    /// given; otherwise the island must be ACTIVE and untripped.
    pub async fn submit(
        &self,
        island: Option<IslandId>,
        text: &str,
        deadline: Duration,
    ) -> Result<SubmitOutcome, SpineError> {
        let deadline_at = Instant::now() + deadline;
        // Snapshot discipline: one capture, used for every downstream call.
        let snapshot = self.constitution.snapshot();

        let island_id = match island {
            Some(id) => {
                if self.breaker.is_tripped(&id) {
                    return Err(SpineError::IslandBreakerTripped(id));
                }
                if self.ledger.is_poisoned(&id).await? {
                    return Err(SpineError::ChainCorrupted(id));
                }
                if self.ledger.state(&id).await? != IslandState::Active {
                    return Err(SpineError::IslandNotActive(id));
                }
                if let Some(ttl) = self.config.island_ttl {
                    let age = chrono::Utc::now() - self.ledger.created_at(&id).await?;
                    if age.to_std().unwrap_or_default() >= ttl {
                        info!(island = %id, "island ttl expired; sealing");
                        self.ledger
                            .close(&id, "ttl_expired", snapshot.version())
                            .await?;
                        return Err(SpineError::IslandNotActive(id));
                    }
                }
                id
            }
            None => self.ledger.create_island(snapshot.version()).await?,
        };

        // Before Gate#1 nothing is recorded yet, so expiry is an error
        // rather than a cancellation pair.
        if Instant::now() >= deadline_at {
            return Err(SpineError::CallerDeadlineExceeded);
        }

        let turns = self.recent_turns(&island_id).await?;
        let reading = self.sensor.sense(text, &turns, &snapshot).await;
        if Instant::now() >= deadline_at {
            return Err(SpineError::CallerDeadlineExceeded);
        }

        let drift_alert = {
            let mut monitor = self
                .drift
                .entry(island_id.clone())
                .or_insert_with(DriftMonitor::new);
            monitor.update(reading.triple.drift)
        };
        if drift_alert.triggered {
            warn!(
                island = %island_id,
                accumulated = drift_alert.accumulated,
                "accumulated drift crossed alert threshold"
            );
        }

        self.ledger
            .append(
                &island_id,
                RecordPayload::UserInput {
                    text: text.to_string(),
                    fingerprint: reading.fingerprint.clone(),
                    baseline_digest: reading.baseline_digest.clone(),
                    degraded: reading.degraded,
                    drift_alert: drift_alert.triggered,
                },
                RecordMeta {
                    triple: reading.triple,
                    poav: None,
                    decision: None,
                    constitution_version: snapshot.version(),
                },
            )
            .await?;

        // Gate #1: triple plus the pre-draft POAV estimate.
        let estimate = snapshot
            .weights()
            .score(&PoavInputs::estimate(reading.triple.drift, reading.triple.risk));
        let gate1 = Gate::decide(
            &snapshot,
            &GateInput {
                triple: reading.triple,
                poav: estimate,
                hallucination: 0.0,
                domain_presence: &reading.domain_presence,
                degraded: reading.degraded,
                unparseable: reading.unparseable,
            },
        );
        self.record_decision(&island_id, &snapshot, &gate1, 1).await?;
        debug!(island = %island_id, action = %gate1.action, rule = %gate1.rule, "gate #1");

        if gate1.action == GateAction::Block {
            return self
                .emit_fallback(&island_id, &snapshot, gate1.clone(), gate1.rule.clone(), false, false)
                .await;
        }

        // DRAFTING → VERIFIED → GATED#2, bounded by the rewrite budget.
        let mut budget = snapshot.rewrite_budget();
        let mut attempt: u32 = 0;
        let mut guidance =
            (gate1.action == GateAction::Rewrite).then(|| rewrite_guidance(&gate1));
        let mut previous_hallucination: Option<f64> = None;
        let mut last_decision = gate1;

        let params = ModulationParams::from_triple(&reading.triple);
        let context_texts: Vec<String> = turns
            .iter()
            .map(|t| format!("{}\n{}", t.user, t.response))
            .collect();
        let anchors: Vec<String> = turns
            .iter()
            .flat_map(|t| [t.user.clone(), t.response.clone()])
            .chain([text.to_string()])
            .collect();

        loop {
            if Instant::now() >= deadline_at {
                return self.emit_cancelled(&island_id, &snapshot, last_decision).await;
            }

            let request = DraftRequest {
                prompt: text.to_string(),
                context: context_texts.clone(),
                params,
                attempt,
                guidance: guidance.clone(),
            };
            let response = {
                // Backpressure: refuse rather than queue indefinitely.
                let _permit = self.draft_permits.try_acquire().map_err(|_| {
                    SpineError::DrafterUnavailable("draft capacity saturated".into())
                })?;
                match self.draft_with_retry(&request).await {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(island = %island_id, %err, "drafter failed after retry");
                        return self
                            .emit_degraded(&island_id, &snapshot, last_decision)
                            .await;
                    }
                }
            };

            self.ledger
                .append(
                    &island_id,
                    RecordPayload::Draft {
                        text: response.text.clone(),
                        attempt,
                        prompt: request.prompt.clone(),
                        temperature: params.temperature,
                        grounding: params.grounding,
                        hallucination_self: response.hallucination_self,
                    },
                    RecordMeta {
                        triple: reading.triple,
                        poav: None,
                        decision: None,
                        constitution_version: snapshot.version(),
                    },
                )
                .await?;

            if Instant::now() >= deadline_at {
                return self.emit_cancelled(&island_id, &snapshot, last_decision).await;
            }

            let report = Verifier::with_self_report(
                self.verifier.verify(&response.text, text, &anchors).await,
                response.hallucination_self,
            );
            if let Some(previous) = previous_hallucination {
                if Verifier::amplified(previous, report.hallucination) {
                    warn!(
                        island = %island_id,
                        previous,
                        current = report.hallucination,
                        "rewrite amplified hallucination"
                    );
                }
            }
            previous_hallucination = Some(report.hallucination);

            self.ledger
                .append(
                    &island_id,
                    RecordPayload::Verify {
                        hallucination: report.hallucination,
                        consistent: report.consistent,
                        verification_ratio: report.verification_ratio,
                        details: report.details.clone(),
                    },
                    RecordMeta {
                        triple: reading.triple,
                        poav: None,
                        decision: None,
                        constitution_version: snapshot.version(),
                    },
                )
                .await?;

            // Gate #2: the full POAV, with the verifier's numbers.
            let poav = snapshot.weights().score(&PoavInputs {
                hallucination: report.hallucination,
                drift: reading.triple.drift,
                risk: reading.triple.risk,
                verification: report.verification_ratio,
            });
            let gate2 = Gate::decide(
                &snapshot,
                &GateInput {
                    triple: reading.triple,
                    poav,
                    hallucination: report.hallucination,
                    domain_presence: &reading.domain_presence,
                    degraded: reading.degraded,
                    // The marker describes the inbound utterance; the draft
                    // under judgment here is parseable by construction.
                    unparseable: false,
                },
            );
            self.record_decision(&island_id, &snapshot, &gate2, 2).await?;
            debug!(island = %island_id, action = %gate2.action, rule = %gate2.rule, attempt, "gate #2");
            last_decision = gate2.clone();

            match gate2.action {
                GateAction::Pass => {
                    self.breaker.reset(&island_id);
                    let record = self
                        .ledger
                        .append(
                            &island_id,
                            RecordPayload::Response {
                                text: response.text.clone(),
                                source: None,
                                cancelled: false,
                                degraded_draft: false,
                            },
                            RecordMeta {
                                triple: reading.triple,
                                poav: Some(poav),
                                decision: Some(GateAction::Pass),
                                constitution_version: snapshot.version(),
                            },
                        )
                        .await?;
                    info!(island = %island_id, attempt, "utterance approved");
                    return Ok(SubmitOutcome {
                        island_id,
                        response: response.text,
                        decision: gate2,
                        record_id: record.record_id,
                        degraded_draft: false,
                        cancelled: false,
                    });
                }
                GateAction::Rewrite => {
                    if budget == 0 {
                        let forced = GateDecision {
                            action: GateAction::Block,
                            rule: "budget:exhausted".into(),
                            threshold: None,
                            scores: gate2.scores,
                            escalate: gate2.escalate,
                        };
                        self.record_decision(&island_id, &snapshot, &forced, 2).await?;
                        info!(island = %island_id, "rewrite budget exhausted; blocking");
                        return self
                            .emit_fallback(
                                &island_id,
                                &snapshot,
                                forced.clone(),
                                forced.rule.clone(),
                                false,
                                false,
                            )
                            .await;
                    }
                    budget -= 1;
                    attempt += 1;
                    guidance = Some(rewrite_guidance(&gate2));
                }
                GateAction::Block => {
                    // Rollback reflex: the draft cycle is voided by an
                    // appended record, never by rewriting history.
                    if let Some(target) = self.ledger.last_non_rollback(&island_id).await? {
                        self.ledger
                            .append(
                                &island_id,
                                RecordPayload::Rollback {
                                    voided_record: target.record_id.clone(),
                                    voided_sequence: target.sequence_num,
                                },
                                RecordMeta {
                                    triple: reading.triple,
                                    poav: Some(poav),
                                    decision: None,
                                    constitution_version: snapshot.version(),
                                },
                            )
                            .await?;
                    }
                    let rollbacks = self.breaker.record_rollback(&island_id);
                    let outcome = self
                        .emit_fallback(
                            &island_id,
                            &snapshot,
                            gate2.clone(),
                            gate2.rule.clone(),
                            false,
                            false,
                        )
                        .await?;
                    if rollbacks >= snapshot.rollback_limit() {
                        self.breaker.trip(&island_id);
                        self.ledger
                            .close(&island_id, "breaker_tripped", snapshot.version())
                            .await?;
                    }
                    return Ok(outcome);
                }
            }
        }
    }

    /// Record a gate decision.
    async fn record_decision(
        &self,
        island: &IslandId,
        snapshot: &ConstitutionSnapshot,
        decision: &GateDecision,
        stage: u8,
    ) -> Result<(), SpineError> {
        self.ledger
            .append(
                island,
                RecordPayload::GateDecision {
                    decision: decision.clone(),
                    stage,
                },
                RecordMeta {
                    triple: decision.scores.triple,
                    poav: Some(decision.scores.poav),
                    decision: Some(decision.action),
                    constitution_version: snapshot.version(),
                },
            )
            .await?;
        Ok(())
    }

    /// Emit the constitution's safe string: a FALLBACK record and the
    /// terminal RESPONSE pointing at it.
    async fn emit_fallback(
        &self,
        island: &IslandId,
        snapshot: &ConstitutionSnapshot,
        decision: GateDecision,
        reason: String,
        cancelled: bool,
        degraded_draft: bool,
    ) -> Result<SubmitOutcome, SpineError> {
        let text = snapshot.fallback_text().to_string();
        let meta = RecordMeta {
            triple: decision.scores.triple,
            poav: Some(decision.scores.poav),
            decision: Some(decision.action),
            constitution_version: snapshot.version(),
        };

        let fallback = self
            .ledger
            .append(
                island,
                RecordPayload::Fallback {
                    text: text.clone(),
                    reason,
                },
                meta.clone(),
            )
            .await?;
        let response = self
            .ledger
            .append(
                island,
                RecordPayload::Response {
                    text: text.clone(),
                    source: Some(fallback.record_id.clone()),
                    cancelled,
                    degraded_draft,
                },
                meta,
            )
            .await?;

        Ok(SubmitOutcome {
            island_id: island.clone(),
            response: text,
            decision,
            record_id: response.record_id,
            degraded_draft,
            cancelled,
        })
    }

    async fn emit_cancelled(
        &self,
        island: &IslandId,
        snapshot: &ConstitutionSnapshot,
        decision: GateDecision,
    ) -> Result<SubmitOutcome, SpineError> {
        info!(island = %island, "deadline expired mid-utterance; emitting cancellation pair");
        self.emit_fallback(island, snapshot, decision, "cancelled".into(), true, false)
            .await
    }

    async fn emit_degraded(
        &self,
        island: &IslandId,
        snapshot: &ConstitutionSnapshot,
        decision: GateDecision,
    ) -> Result<SubmitOutcome, SpineError> {
        self.emit_fallback(
            island,
            snapshot,
            decision,
            "drafter_unavailable".into(),
            false,
            true,
        )
        .await
    }

    /// One retry with backoff, then the upstream error stands.
    async fn draft_with_retry(
        &self,
        request: &DraftRequest,
    ) -> Result<DraftResponse, DrafterError> {
        match timeout(self.config.draft_timeout, self.drafter.draft(request)).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(err)) => debug!(%err, "draft attempt failed, retrying"),
            Err(_) => debug!("draft attempt timed out, retrying"),
        }

        sleep(self.config.draft_retry_backoff).await;
        match timeout(self.config.draft_timeout, self.drafter.draft(request)).await {
            Ok(result) => result,
            Err(_) => Err(DrafterError::Timeout),
        }
    }

    /// Prior user/response exchanges on the island, oldest first.
    async fn recent_turns(&self, island: &IslandId) -> Result<Vec<ContextTurn>, SpineError> {
        let records = self.ledger.records(island).await?;
        let mut turns = Vec::new();
        let mut pending: Option<String> = None;
        for record in records {
            match record.payload {
                RecordPayload::UserInput { text, .. } => pending = Some(text),
                RecordPayload::Response { text, .. } => {
                    if let Some(user) = pending.take() {
                        turns.push(ContextTurn {
                            user,
                            response: text,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(turns)
    }
}

/// Upstream guidance matching the rule that forced the rewrite.
fn rewrite_guidance(decision: &GateDecision) -> String {
    if decision.rule.starts_with("critical:risk") {
        "avoid engaging with the risky aspects; answer at a safer level of generality".into()
    } else if decision.rule.starts_with("critical:hallucination") {
        "remove unverified claims or mark them as uncertain".into()
    } else if decision.rule.starts_with("deescalate") {
        "use calmer, more neutral language".into()
    } else if decision.rule == "unparseable_input" {
        "ask for a clarified, plain-text version of the request".into()
    } else {
        "stay closer to the user's question and ground every claim".into()
    }
}

/// Builder wiring the spine's collaborators, with working defaults for
/// every seam.
pub struct SpineBuilder {
    constitution: Option<Arc<ConstitutionStore>>,
    ledger: Option<Arc<StepLedger>>,
    drafter: Option<Arc<dyn Drafter>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: SpineConfig,
}

impl Default for SpineBuilder {
    fn default() -> Self {
        Self {
            constitution: None,
            ledger: None,
            drafter: None,
            embedder: None,
            config: SpineConfig::default(),
        }
    }
}

impl SpineBuilder {
    pub fn constitution(mut self, store: Arc<ConstitutionStore>) -> Self {
        self.constitution = Some(store);
        self
    }

    pub fn ledger(mut self, ledger: Arc<StepLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn drafter(mut self, drafter: Arc<dyn Drafter>) -> Self {
        self.drafter = Some(drafter);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn config(mut self, config: SpineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Spine {
        let constitution = self
            .constitution
            .unwrap_or_else(|| Arc::new(ConstitutionStore::baseline()));
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(StepLedger::in_memory()));
        let embedder: Arc<dyn Embedder> = self.embedder.unwrap_or_else(|| {
            Arc::new(LexiconEmbedder::from_snapshot(&constitution.snapshot()))
        });
        let drafter: Arc<dyn Drafter> = self.drafter.unwrap_or_else(|| Arc::new(TemplateDrafter));
        let draft_permits = Arc::new(Semaphore::new(self.config.max_inflight_drafts));

        Spine {
            sensor: Sensor::new(Arc::clone(&embedder), SensorConfig::default()),
            verifier: Verifier::new(embedder),
            constitution,
            ledger,
            drafter,
            breaker: RollbackBreaker::new(),
            drift: DashMap::new(),
            draft_permits,
            config: self.config,
        }
    }
}
