//! The capability ("skill") abstraction and its retry composite
//!
//! A pipeline is an ordered list of skills invoked against one WorkItem.
//! Skills are stateless with respect to the pipeline: everything they learn
//! is written back onto the item they return.

pub mod work_item;

pub use work_item::WorkItem;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What one skill invocation reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Continue the pipeline.
    Success,
    /// This attempt did not work; the composite may retry.
    Failure,
    /// No more retries are worth spending; move to the next stage.
    FailedAndGoNext,
    /// Hard-stop the entire pipeline.
    Rejected,
}

/// A composable, preconditioned pipeline step.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn capability(&self) -> &str;

    /// Pure precondition check: required fields present and non-empty.
    fn can_invoke(&self, item: &WorkItem) -> bool;

    async fn invoke(&self, item: WorkItem, cancel: &CancellationToken) -> (Outcome, WorkItem);
}

/// Retries an ordered group of skills as a unit.
pub struct SkillSet {
    name: String,
    skills: Vec<Arc<dyn Skill>>,
    retry_count: usize,
}

impl SkillSet {
    pub fn new(name: impl Into<String>, skills: Vec<Arc<dyn Skill>>, retry_count: usize) -> Self {
        Self {
            name: name.into(),
            skills,
            retry_count,
        }
    }
}

#[async_trait]
impl Skill for SkillSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> &str {
        "Retry a group of skills as a unit"
    }

    fn can_invoke(&self, item: &WorkItem) -> bool {
        self.skills.iter().any(|skill| skill.can_invoke(item))
    }

    /// Clones the incoming item once, then loops up to `retry_count` passes.
    /// The working copy accumulates edits across retries; intermediate
    /// progress is never discarded, even on failure.
    async fn invoke(&self, item: WorkItem, cancel: &CancellationToken) -> (Outcome, WorkItem) {
        let mut work = item.clone();
        let mut go_next = false;

        for pass in 0..self.retry_count {
            let mut all_success = true;
            let mut invoked_any = false;

            for skill in &self.skills {
                if !skill.can_invoke(&work) {
                    tracing::debug!("skill {} skipped on pass {}", skill.name(), pass + 1);
                    continue;
                }
                invoked_any = true;
                let (outcome, evolved) = skill.invoke(work, cancel).await;
                work = evolved;
                match outcome {
                    Outcome::Rejected => return (Outcome::Rejected, work),
                    Outcome::Success => {}
                    Outcome::Failure => all_success = false,
                    Outcome::FailedAndGoNext => {
                        all_success = false;
                        go_next = true;
                    }
                }
            }

            if invoked_any && all_success {
                return (Outcome::Success, work);
            }
        }

        if go_next {
            (Outcome::FailedAndGoNext, work)
        } else {
            (Outcome::Failure, work)
        }
    }
}

/// How a full pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every stage completed; the item carries the final snippet.
    Completed,
    /// Budgets were exhausted; the item still carries the best snippet seen.
    BestEffort,
    /// The request was rejected; nothing should be rendered.
    Rejected,
}

/// Drive the ordered skills over one request. Strictly sequential: each
/// skill is awaited before the next starts.
pub async fn execute(
    skills: &[Arc<dyn Skill>],
    item: WorkItem,
    cancel: &CancellationToken,
) -> (PipelineOutcome, WorkItem) {
    let mut work = item;
    let mut best_effort = false;

    for skill in skills {
        if cancel.is_cancelled() {
            return (PipelineOutcome::BestEffort, work);
        }
        if !skill.can_invoke(&work) {
            tracing::debug!("pipeline skipped skill {}", skill.name());
            continue;
        }
        let (outcome, evolved) = skill.invoke(work, cancel).await;
        work = evolved;
        match outcome {
            Outcome::Rejected => return (PipelineOutcome::Rejected, work),
            Outcome::Failure | Outcome::FailedAndGoNext => best_effort = true,
            Outcome::Success => {}
        }
    }

    if best_effort {
        (PipelineOutcome::BestEffort, work)
    } else {
        (PipelineOutcome::Completed, work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted skill: pops one outcome per invocation, counts calls.
    struct ScriptedSkill {
        name: String,
        outcomes: std::sync::Mutex<Vec<Outcome>>,
        calls: AtomicUsize,
        invocable: bool,
    }

    impl ScriptedSkill {
        fn new(name: &str, outcomes: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                outcomes: std::sync::Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
                invocable: true,
            })
        }

        fn never_invocable(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                outcomes: std::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                invocable: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Skill for ScriptedSkill {
        fn name(&self) -> &str {
            &self.name
        }

        fn capability(&self) -> &str {
            "test"
        }

        fn can_invoke(&self, _item: &WorkItem) -> bool {
            self.invocable
        }

        async fn invoke(&self, mut item: WorkItem, _cancel: &CancellationToken) -> (Outcome, WorkItem) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // leave a trace so progress accumulation is observable
            item.appendix
                .code_task_breakdown
                .push(format!("{} ran", self.name));
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Outcome::Success);
            (outcome, item)
        }
    }

    #[tokio::test]
    async fn test_all_success_returns_success() {
        let skill = ScriptedSkill::new("a", vec![Outcome::Success]);
        let set = SkillSet::new("set", vec![skill.clone()], 3);
        let (outcome, _) = set
            .invoke(WorkItem::new("x"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(skill.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_short_circuits() {
        let first = ScriptedSkill::new("a", vec![Outcome::Rejected]);
        let second = ScriptedSkill::new("b", vec![Outcome::Success]);
        let set = SkillSet::new("set", vec![first, second.clone()], 3);
        let (outcome, _) = set
            .invoke(WorkItem::new("x"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_until_budget_exhausted() {
        // fails every pass; outcomes pop from the end
        let skill = ScriptedSkill::new("a", vec![Outcome::Failure, Outcome::Failure]);
        let set = SkillSet::new("set", vec![skill.clone()], 2);
        let (outcome, _) = set
            .invoke(WorkItem::new("x"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Outcome::Failure);
        assert_eq!(skill.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_and_go_next_flag_remembered() {
        let skill = ScriptedSkill::new("a", vec![Outcome::Failure, Outcome::FailedAndGoNext]);
        let set = SkillSet::new("set", vec![skill], 2);
        let (outcome, _) = set
            .invoke(WorkItem::new("x"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Outcome::FailedAndGoNext);
    }

    #[tokio::test]
    async fn test_progress_accumulates_across_retries() {
        let skill = ScriptedSkill::new("a", vec![Outcome::Success, Outcome::Failure]);
        let set = SkillSet::new("set", vec![skill], 2);
        let (outcome, item) = set
            .invoke(WorkItem::new("x"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Outcome::Success);
        // both passes left their trace on the same working copy
        assert_eq!(item.appendix.code_task_breakdown.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_skills_do_not_fail_the_pass() {
        let runnable = ScriptedSkill::new("a", vec![Outcome::Success]);
        let skipped = ScriptedSkill::never_invocable("b");
        let set = SkillSet::new("set", vec![runnable, skipped.clone()], 1);
        let (outcome, _) = set
            .invoke(WorkItem::new("x"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(skipped.calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_rejected_halts_pipeline() {
        let first: Arc<dyn Skill> = ScriptedSkill::new("a", vec![Outcome::Rejected]);
        let second = ScriptedSkill::new("b", vec![Outcome::Success]);
        let skills: Vec<Arc<dyn Skill>> = vec![first, second.clone()];
        let (outcome, _) = execute(&skills, WorkItem::new("x"), &CancellationToken::new()).await;
        assert_eq!(outcome, PipelineOutcome::Rejected);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_best_effort_still_runs_later_skills() {
        let first: Arc<dyn Skill> = ScriptedSkill::new("a", vec![Outcome::FailedAndGoNext]);
        let second = ScriptedSkill::new("b", vec![Outcome::Success]);
        let skills: Vec<Arc<dyn Skill>> = vec![first, second.clone()];
        let (outcome, _) = execute(&skills, WorkItem::new("x"), &CancellationToken::new()).await;
        assert_eq!(outcome, PipelineOutcome::BestEffort);
        assert_eq!(second.calls(), 1);
    }
}
