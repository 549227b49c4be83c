// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step status tree transitions.

use std::collections::HashMap;

use crate::model::{StepPhase, StepStatus, WorkflowStep, WorkflowStepStatus};

/// Step type of a suspend gate.
pub const STEP_TYPE_SUSPEND: &str = "suspend";

pub const REASON_TERMINATE: &str = "Terminate";
pub const REASON_FAILED_AFTER_RETRIES: &str = "FailedAfterRetries";
pub const REASON_TIMEOUT: &str = "Timeout";

/// Pending status tree mirroring declared steps and their sub-steps.
pub fn pending_steps(steps: &[WorkflowStep]) -> Vec<WorkflowStepStatus> {
    steps
        .iter()
        .map(|step| WorkflowStepStatus {
            step: StepStatus {
                name: step.base.name.clone(),
                alias: step.base.alias.clone(),
                step_type: step.base.step_type.clone(),
                phase: StepPhase::Pending,
                ..Default::default()
            },
            sub_steps: step
                .sub_steps
                .iter()
                .map(|sub| StepStatus {
                    name: sub.name.clone(),
                    alias: sub.alias.clone(),
                    step_type: sub.step_type.clone(),
                    phase: StepPhase::Pending,
                    ..Default::default()
                })
                .collect(),
        })
        .collect()
}

fn for_each_step(steps: &mut [WorkflowStepStatus], mut f: impl FnMut(&mut StepStatus)) {
    for step in steps {
        f(&mut step.step);
        for sub in &mut step.sub_steps {
            f(sub);
        }
    }
}

/// Running steps and sub-steps become Stopped; other phases are kept.
pub fn stop_running_steps(steps: &mut [WorkflowStepStatus]) {
    for_each_step(steps, |step| {
        if step.phase == StepPhase::Running {
            step.phase = StepPhase::Stopped;
        }
    });
}

/// Running suspend gates become Succeeded; other running steps are kept.
pub fn resume_suspend_steps(steps: &mut [WorkflowStepStatus]) {
    for_each_step(steps, |step| {
        if step.step_type == STEP_TYPE_SUSPEND && step.phase == StepPhase::Running {
            step.phase = StepPhase::Succeeded;
        }
    });
}

/// Cut every step short.
///
/// Running steps fail with reason `Terminate`. Failed steps take that reason
/// too unless they failed after retries or on timeout.
pub fn terminate_steps(steps: &mut [WorkflowStepStatus]) {
    for_each_step(steps, |step| match step.phase {
        StepPhase::Failed => {
            if step.reason != REASON_FAILED_AFTER_RETRIES && step.reason != REASON_TIMEOUT {
                step.reason = REASON_TERMINATE.to_string();
            }
        }
        StepPhase::Running => {
            step.phase = StepPhase::Failed;
            step.reason = REASON_TERMINATE.to_string();
        }
        _ => {}
    });
}

/// Append declared steps missing from `status` as Pending, sub-steps
/// included. Existing entries are left as they are.
pub fn merge_declared_steps(status: &mut Vec<WorkflowStepStatus>, declared: &[WorkflowStep]) {
    for step in declared {
        match status.iter_mut().find(|s| s.step.name == step.base.name) {
            None => status.extend(pending_steps(std::slice::from_ref(step))),
            Some(existing) => {
                for sub in &step.sub_steps {
                    if existing.sub_step(&sub.name).is_none() {
                        existing.sub_steps.push(StepStatus {
                            name: sub.name.clone(),
                            step_type: sub.step_type.clone(),
                            phase: StepPhase::Pending,
                            ..Default::default()
                        });
                    }
                }
            }
        }
    }
}

/// Overlay live step statuses onto a record's step tree.
///
/// Aliases are taken from the record since the live object does not carry
/// them. Record steps are replaced by name; a record without steps adopts
/// every live step.
pub fn overlay_live_steps(record_steps: &mut Vec<WorkflowStepStatus>, live: &[WorkflowStepStatus]) {
    let mut aliases: HashMap<String, String> = HashMap::new();
    for step in record_steps.iter() {
        aliases.insert(step.step.name.clone(), step.step.alias.clone());
        for sub in &step.sub_steps {
            aliases.insert(sub.name.clone(), sub.alias.clone());
        }
    }
    let with_alias = |status: &StepStatus| StepStatus {
        alias: aliases.get(&status.name).cloned().unwrap_or_default(),
        ..status.clone()
    };
    let synced: Vec<WorkflowStepStatus> = live
        .iter()
        .map(|step| WorkflowStepStatus {
            step: with_alias(&step.step),
            sub_steps: step.sub_steps.iter().map(&with_alias).collect(),
        })
        .collect();

    if record_steps.is_empty() {
        *record_steps = synced;
        return;
    }
    for step in record_steps.iter_mut() {
        if let Some(found) = synced.iter().find(|s| s.step.name == step.step.name) {
            *step = found.clone();
        }
    }
}
