// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use k8s_openapi::api::batch::v1::{Job, JobCondition};
use std::fmt;
use warden_common::state::{ConditionType, CopyBackupsTask};

pub const JOB_CONDITION_COMPLETE: &str = "Complete";
pub const JOB_CONDITION_FAILED: &str = "Failed";

/// Lifecycle phase of a task, derived from the task and its job on every reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// No job yet.
    Pending,
    /// The job exists and has not finished.
    Running,
    Succeeded,
    Failed,
    /// The task is marked for deletion and waits for its job to go away.
    Deleting,
}

impl TaskPhase {
    pub fn of(task: &CopyBackupsTask, job: Option<&Job>) -> Self {
        if task.is_being_deleted() {
            return TaskPhase::Deleting;
        }

        let job = match job {
            None => return TaskPhase::Pending,
            Some(v) => v,
        };

        let finished = job_conditions(job)
            .iter()
            .filter(|c| c.status == "True")
            .find_map(|c| task_condition_type(&c.type_));
        match finished {
            Some(ConditionType::Succeeded) => TaskPhase::Succeeded,
            Some(ConditionType::Failed) => TaskPhase::Failed,
            _ => TaskPhase::Running,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPhase::Pending => "Pending",
            TaskPhase::Running => "Running",
            TaskPhase::Succeeded => "Succeeded",
            TaskPhase::Failed => "Failed",
            TaskPhase::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// Task condition a job condition maps to. Other job condition types map to nothing.
pub fn task_condition_type(job_condition_type: &str) -> Option<ConditionType> {
    match job_condition_type {
        JOB_CONDITION_COMPLETE => Some(ConditionType::Succeeded),
        JOB_CONDITION_FAILED => Some(ConditionType::Failed),
        _ => None,
    }
}

pub fn job_conditions(job: &Job) -> &[JobCondition] {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
}
