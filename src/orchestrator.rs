//! Ordered, resumable execution of the pipeline stages.

use log::{error, info};

use crate::config::ResumePolicy;
use crate::error::{PipelineError, Result};
use crate::state::{CheckpointState, StateStore, StepStatus};

/// One named unit of pipeline work.
pub trait Stage {
    fn name(&self) -> &str;
    fn run(&mut self) -> Result<()>;
}

/// What happened to a stage during a run.
#[derive(Debug)]
pub enum StageOutcome {
    Completed,
    Skipped,
    Failed(PipelineError),
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Stages in execution order. Stages after a failure are absent.
    pub outcomes: Vec<(String, StageOutcome)>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure().is_none()
    }

    /// The stage that halted the run, with its cause.
    pub fn failure(&self) -> Option<(&str, &PipelineError)> {
        self.outcomes.iter().find_map(|(name, outcome)| match outcome {
            StageOutcome::Failed(e) => Some((name.as_str(), e)),
            _ => None,
        })
    }

    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, outcome)| outcome)
    }
}

struct Slot<'a> {
    stage: Box<dyn Stage + 'a>,
    enabled: bool,
}

pub struct Orchestrator<'a> {
    store: &'a dyn StateStore,
    policy: ResumePolicy,
    stages: Vec<Slot<'a>>,
}

// ISO-8601 local time, e.g. `2024-05-01T10:05:00.123456`.
fn now() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a dyn StateStore, policy: ResumePolicy) -> Self {
        Self {
            store,
            policy,
            stages: Vec::new(),
        }
    }

    /// Append a stage; stages run in the order they were added.
    pub fn add_stage(&mut self, stage: Box<dyn Stage + 'a>, enabled: bool) -> &mut Self {
        self.stages.push(Slot { stage, enabled });
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, persisting each outcome as it happens.
    ///
    /// Stops at the first stage that fails. The returned error is reserved
    /// for checkpoint storage failures; stage failures are in the report.
    pub fn run(&mut self) -> Result<RunReport> {
        let mut state = CheckpointState::load(self.store)?;
        let mut report = RunReport::default();

        for slot in self.stages.iter_mut() {
            let name = slot.stage.name().to_string();

            if !slot.enabled {
                info!("Skipping {} (disabled)", name);
                report.outcomes.push((name, StageOutcome::Skipped));
                continue;
            }
            if self.policy == ResumePolicy::SkipSucceeded
                && state.status(&name) == Some(StepStatus::Success)
            {
                info!("Skipping {} (already succeeded)", name);
                report.outcomes.push((name, StageOutcome::Skipped));
                continue;
            }

            info!("Starting {}", name);
            match slot.stage.run() {
                Ok(()) => {
                    state.record(&name, StepStatus::Success, now());
                    state.save(self.store)?;
                    info!("{} finished successfully", name);
                    report.outcomes.push((name, StageOutcome::Completed));
                }
                Err(e) => {
                    error!("{} failed: {}", name, e);
                    state.record(&name, StepStatus::Failure, now());
                    state.save(self.store)?;
                    report.outcomes.push((name, StageOutcome::Failed(e)));
                    break;
                }
            }
        }

        Ok(report)
    }
}
