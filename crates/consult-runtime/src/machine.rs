//! Workflow state store.

use std::sync::Arc;

use chrono::Utc;
use consult_core::{Feedback, SessionId, WorkflowId, WorkflowInstance};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use crate::errors::RuntimeError;
use crate::transition::{Transition, apply_feedback};

/// Exclusive access to one workflow. Other mutations of the same workflow
/// wait until the guard is dropped.
pub type WorkflowGuard = OwnedMutexGuard<WorkflowInstance>;

/// Result of a feedback submission.
#[derive(Clone, Debug)]
pub struct FeedbackOutcome {
    /// The workflow after the feedback was applied.
    pub workflow: WorkflowInstance,
    /// What changed.
    pub transition: Transition,
}

/// Owns every live workflow.
///
/// Each workflow sits behind its own async mutex so that a slow broadcast
/// for one workflow never blocks another.
#[derive(Default)]
pub struct WorkflowStateMachine {
    workflows: DashMap<WorkflowId, Arc<Mutex<WorkflowInstance>>>,
}

impl WorkflowStateMachine {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a workflow in `Initialization`. The session id defaults to
    /// the workflow id.
    #[instrument(skip(self, initial_payload))]
    pub fn create(
        &self,
        session_id: Option<SessionId>,
        initial_payload: Option<Value>,
    ) -> WorkflowInstance {
        let id = WorkflowId::new();
        let session_id = session_id.unwrap_or_else(|| SessionId::for_workflow(&id));
        let instance = WorkflowInstance::new(id.clone(), session_id, initial_payload);
        let _ = self
            .workflows
            .insert(id.clone(), Arc::new(Mutex::new(instance.clone())));
        debug!(workflow_id = %id, "workflow created");
        instance
    }

    /// Whether a workflow exists.
    pub fn contains(&self, id: &WorkflowId) -> bool {
        self.workflows.contains_key(id)
    }

    /// Lock a workflow for exclusive mutation.
    pub async fn lock(&self, id: &WorkflowId) -> Result<WorkflowGuard, RuntimeError> {
        // Clone the Arc out so the DashMap shard lock is released before awaiting.
        let slot = self
            .workflows
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RuntimeError::WorkflowNotFound(id.to_string()))?;
        Ok(slot.lock_owned().await)
    }

    /// Apply feedback and return the transition together with the still-held
    /// lock, so the caller can publish the change before anyone else mutates
    /// the workflow.
    #[instrument(skip(self, feedback), fields(kind = %feedback.kind))]
    pub async fn submit_feedback(
        &self,
        id: &WorkflowId,
        feedback: &Feedback,
    ) -> Result<(WorkflowGuard, Transition), RuntimeError> {
        let mut guard = self.lock(id).await?;
        let transition = apply_feedback(&mut guard, feedback);
        Ok((guard, transition))
    }

    /// Copy of a workflow's current state.
    pub async fn snapshot(&self, id: &WorkflowId) -> Result<WorkflowInstance, RuntimeError> {
        Ok(self.lock(id).await?.clone())
    }

    /// Store an opaque phase output under `key`, replacing any previous
    /// value. The lock is returned still held.
    pub async fn record_phase_output(
        &self,
        id: &WorkflowId,
        key: &str,
        output: Value,
    ) -> Result<WorkflowGuard, RuntimeError> {
        let mut guard = self.lock(id).await?;
        let _ = guard.phase_outputs.insert(key.to_owned(), output);
        guard.updated_at = Utc::now();
        Ok(guard)
    }

    /// Ids of all workflows.
    pub fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.workflows.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of workflows.
    pub fn count(&self) -> usize {
        self.workflows.len()
    }
}
