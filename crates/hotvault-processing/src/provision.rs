//! Proof-set creation for accounts that do not have one yet.

use std::sync::Arc;
use std::time::Duration;

use hotvault_core::models::ProofSet;
use hotvault_core::{AppError, PipelineConfig, PollSettings, ToolConfig};
use hotvault_db::PieceStore;
use hotvault_pdp::parser::{self, TransactionStatus};
use hotvault_pdp::{PdpTool, ToolOutput};

use crate::polling::{AttemptError, PollOutcome, PollStep, Poller};

pub struct ProofSetProvisioner {
    store: Arc<dyn PieceStore>,
    tool: PdpTool,
    record_keeper: Option<String>,
    poll: PollSettings,
    timeout: Duration,
}

impl ProofSetProvisioner {
    pub fn new(
        store: Arc<dyn PieceStore>,
        tool: PdpTool,
        tool_config: &ToolConfig,
        pipeline_config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            tool,
            record_keeper: tool_config.record_keeper.clone(),
            poll: pipeline_config.provision_poll.clone(),
            timeout: pipeline_config.provision_timeout,
        }
    }

    /// Create a proof set for `owner_id` and wait until it has a remote id.
    pub async fn provision(
        &self,
        owner_id: i64,
        extra_data: Option<&str>,
    ) -> Result<String, AppError> {
        let proof_set = self.start(owner_id, extra_data).await?;
        self.await_creation(owner_id, &proof_set.transaction_hash)
            .await
    }

    /// Submit the creation transaction and record it as unprovisioned.
    ///
    /// Uploads for this owner halt in `pending` until [`Self::await_creation`] finishes.
    #[tracing::instrument(skip(self, extra_data))]
    pub async fn start(
        &self,
        owner_id: i64,
        extra_data: Option<&str>,
    ) -> Result<ProofSet, AppError> {
        let record_keeper = self.record_keeper.as_deref().ok_or_else(|| {
            AppError::Configuration("RECORD_KEEPER is not configured".to_string())
        })?;

        if let Some(existing) = self.store.find_proof_set(owner_id).await? {
            if existing.is_provisioned() {
                return Err(AppError::InvalidInput(format!(
                    "Account already has proof set {}",
                    existing.proof_set_id
                )));
            }
        }

        let output = self
            .tool
            .create_proof_set(record_keeper, extra_data, self.timeout)
            .await?;
        let tx_hash = parser::extract_creation_tx_hash(&output.stdout)
            .or_else(|| parser::extract_creation_tx_hash(&output.stderr))
            .ok_or_else(|| AppError::ParseFailure {
                what: "proof set creation transaction hash".to_string(),
            })?;

        let proof_set = self
            .store
            .record_proof_set_creation(
                owner_id,
                &tx_hash,
                self.tool.service_name(),
                self.tool.service_url(),
            )
            .await?;
        tracing::info!(tx_hash = %tx_hash, "Proof set creation submitted");
        Ok(proof_set)
    }

    /// Poll the creation transaction and store the remote id once it is known.
    #[tracing::instrument(skip(self))]
    pub async fn await_creation(&self, owner_id: i64, tx_hash: &str) -> Result<String, AppError> {
        let poller = Poller::new("provision", self.poll.clone());
        let timeout = self.timeout;
        let mut last_seen = TransactionStatus::default();

        let outcome = poller
            .run(
                |_| async move {
                    self.tool
                        .get_proof_set_create_status(tx_hash, timeout)
                        .await
                        .map_err(AttemptError::Retryable)
                },
                |output: ToolOutput| {
                    let status = parser::extract_transaction_status(&output.stdout);
                    if status.is_created() {
                        if let Some(id) = &status.proof_set_id {
                            return PollStep::Done(id.clone());
                        }
                    }
                    if status.is_failed() {
                        return PollStep::Failed(format!(
                            "Proof set creation transaction {} failed",
                            tx_hash
                        ));
                    }
                    let progressed = (last_seen.status, last_seen.success, last_seen.created)
                        != (status.status, status.success, status.created);
                    last_seen = status;
                    PollStep::Continue { progressed }
                },
            )
            .await;

        let attempts = outcome.attempts();
        let proof_set_id = match outcome {
            PollOutcome::Completed { value, .. } => value,
            PollOutcome::Rejected { reason, .. } => {
                return Err(AppError::ToolFailure {
                    operation: "get-proof-set-create-status".to_string(),
                    stderr: reason,
                })
            }
            PollOutcome::Exhausted { .. } => {
                tracing::warn!(attempts, "Proof set creation still unconfirmed");
                return Err(AppError::Timeout {
                    operation: "proof set creation".to_string(),
                    after: self.poll.wall_clock_ceiling(),
                })
            }
            PollOutcome::Aborted { error, .. } => return Err(error.into()),
            PollOutcome::TooManyErrors { last_error, .. } => return Err(last_error.into()),
        };

        self.store
            .set_remote_proof_set_id(owner_id, &proof_set_id)
            .await?;
        tracing::info!(proof_set_id = %proof_set_id, attempts, "Proof set provisioned");
        Ok(proof_set_id)
    }
}
