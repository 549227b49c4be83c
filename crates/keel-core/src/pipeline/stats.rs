// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run statistics of a pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::PipelineRun;
use crate::cluster::WorkflowRun;
use crate::model::WorkflowRunPhase;

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_WEEK: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatInfo {
    pub total: usize,
    pub success: usize,
    pub fail: usize,
}

/// Run counters. `week[6]` covers the last 24 hours, `week[0]` the day
/// six days before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStat {
    pub active_num: usize,
    pub total: RunStatInfo,
    pub week: Vec<RunStatInfo>,
}

impl Default for RunStat {
    fn default() -> Self {
        Self {
            active_num: 0,
            total: RunStatInfo::default(),
            week: vec![RunStatInfo::default(); DAYS_PER_WEEK],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<PipelineRun>,
    pub run_stat: RunStat,
}

fn is_active(run: &WorkflowRun) -> bool {
    !run.status.finished && !run.status.terminated
}

/// Slot of the run in the week histogram, if it started within a week.
fn week_slot(run: &WorkflowRun, now: DateTime<Utc>) -> Option<usize> {
    let started = run.status.start_time?;
    let elapsed = (now - started).num_seconds().max(0);
    let days = usize::try_from(elapsed / SECONDS_PER_DAY).ok()?;
    (days < DAYS_PER_WEEK).then(|| DAYS_PER_WEEK - 1 - days)
}

/// Count runs as active, succeeded or failed, in total and per day of the
/// last week.
///
/// Active runs are neither finished nor terminated; every other run that did
/// not succeed counts as failed.
pub fn run_stat(runs: &[WorkflowRun], now: DateTime<Utc>) -> RunStat {
    let mut stat = RunStat::default();
    stat.total.total = runs.len();

    for run in runs {
        let slot = week_slot(run, now);
        if let Some(day) = slot {
            stat.week[day].total += 1;
        }
        if is_active(run) {
            stat.active_num += 1;
        } else if run.status.phase == WorkflowRunPhase::Succeeded {
            stat.total.success += 1;
            if let Some(day) = slot {
                stat.week[day].success += 1;
            }
        } else {
            stat.total.fail += 1;
            if let Some(day) = slot {
                stat.week[day].fail += 1;
            }
        }
    }
    stat
}

/// The run that started last. Runs without a start time come first.
pub fn last_run(runs: &[WorkflowRun]) -> Option<&WorkflowRun> {
    runs.iter().max_by_key(|run| run.status.start_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run(name: &str, started_ago: Option<Duration>, phase: WorkflowRunPhase, finished: bool, now: DateTime<Utc>) -> WorkflowRun {
        let mut run = WorkflowRun::default();
        run.metadata.name = name.into();
        run.status.start_time = started_ago.map(|ago| now - ago);
        run.status.phase = phase;
        run.status.finished = finished;
        run
    }

    #[test]
    fn test_run_stat_counts() {
        let now = Utc::now();
        let runs = vec![
            run("a", Some(Duration::hours(1)), WorkflowRunPhase::Succeeded, true, now),
            run("b", Some(Duration::hours(30)), WorkflowRunPhase::Failed, true, now),
            run("c", Some(Duration::days(3)), WorkflowRunPhase::Running, false, now),
            run("d", Some(Duration::days(10)), WorkflowRunPhase::Succeeded, true, now),
            run("e", None, WorkflowRunPhase::Terminated, true, now),
        ];
        let stat = run_stat(&runs, now);

        assert_eq!(stat.active_num, 1);
        assert_eq!(
            stat.total,
            RunStatInfo {
                total: 5,
                success: 2,
                fail: 2
            }
        );
        assert_eq!(stat.week.len(), 7);
        assert_eq!(
            stat.week[6],
            RunStatInfo {
                total: 1,
                success: 1,
                fail: 0
            }
        );
        assert_eq!(stat.week[5].fail, 1);
        assert_eq!(stat.week[3].total, 1);
        assert_eq!(stat.week[3].success + stat.week[3].fail, 0);
        assert_eq!(stat.week.iter().map(|d| d.total).sum::<usize>(), 3);
    }

    #[test]
    fn test_suspended_run_is_active() {
        let now = Utc::now();
        let mut suspended = run("s", Some(Duration::minutes(5)), WorkflowRunPhase::Suspending, false, now);
        suspended.status.suspend = true;
        let mut terminated = run("t", Some(Duration::minutes(5)), WorkflowRunPhase::Terminated, false, now);
        terminated.status.terminated = true;

        let stat = run_stat(&[suspended, terminated], now);
        assert_eq!(stat.active_num, 1);
        assert_eq!(stat.total.fail, 1);
    }

    #[test]
    fn test_last_run_is_latest_start() {
        let now = Utc::now();
        let runs = vec![
            run("old", Some(Duration::days(2)), WorkflowRunPhase::Succeeded, true, now),
            run("new", Some(Duration::minutes(1)), WorkflowRunPhase::Running, false, now),
            run("mid", Some(Duration::hours(5)), WorkflowRunPhase::Failed, true, now),
            run("unstarted", None, WorkflowRunPhase::Unknown, false, now),
        ];
        assert_eq!(last_run(&runs).unwrap().metadata.name, "new");
        assert!(last_run(&[]).is_none());
    }

    #[test]
    fn test_empty_stat_has_full_week() {
        let stat = run_stat(&[], Utc::now());
        assert_eq!(stat, RunStat::default());
        assert_eq!(stat.week.len(), 7);
    }
}
