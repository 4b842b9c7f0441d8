use crate::store::WorkflowStore;
use async_trait::async_trait;
use onboard_bus::{Completion, CompletionListener};
use onboard_core::{Expect, Transition, WorkflowStep, ORCHESTRATOR};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Advances workflows when a step completes through a direct agent call.
///
/// A successful correlated completion of step `S` that the orchestrator did
/// not send moves the workflow to `S.next()`, but only while the workflow is
/// still at `S`, or at `account_setup` when `S` is `schedule`. Both moves go through
/// compare-and-set, so the orchestrator's own advance for the same step is
/// rejected and it skips dispatching `S` a second time.
pub struct Reconciler {
    workflows: Arc<dyn WorkflowStore>,
}

impl Reconciler {
    pub fn new(workflows: Arc<dyn WorkflowStore>) -> Self {
        Self { workflows }
    }
}

#[async_trait]
impl CompletionListener for Reconciler {
    async fn on_completion(&self, completion: &Completion) {
        if completion.source_agent == ORCHESTRATOR || !completion.is_success() {
            return;
        }
        let Some(step) = WorkflowStep::from_method(&completion.method) else {
            return;
        };
        let target = step.next();

        let mut expectations = Vec::with_capacity(2);
        // Only a direct schedule may overtake the step before it.
        if step == WorkflowStep::Schedule {
            expectations.extend(step.previous());
        }
        expectations.push(step);

        for expected in expectations {
            match self
                .workflows
                .compare_and_set(
                    completion.correlation_id,
                    Expect::Step(expected),
                    Transition::Advance(target),
                )
                .await
            {
                Ok(outcome) if outcome.is_applied() => {
                    info!(
                        workflow_id = %completion.correlation_id,
                        source = %completion.source_agent,
                        step = %step,
                        from = %expected,
                        to = %target,
                        "direct completion reconciled"
                    );
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        workflow_id = %completion.correlation_id,
                        error = %e,
                        "completion not tied to a workflow"
                    );
                    return;
                }
            }
        }
        warn!(
            workflow_id = %completion.correlation_id,
            step = %step,
            "direct completion arrived out of sequence, ignored"
        );
    }

    async fn is_closed(&self, correlation_id: Uuid) -> bool {
        matches!(
            self.workflows.get(correlation_id).await,
            Ok(Some(wf)) if wf.is_terminal()
        )
    }
}
