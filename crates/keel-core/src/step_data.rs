// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step outputs, inputs and logs read from a workflow context.
//!
//! A workflow context is the key/value blob the workflow engine keeps in a
//! ConfigMap. `vars` holds the exported variables as a JSON document and
//! `mutable` a JSON string map whose `logConfig` entry describes, per step,
//! where its logs can be read.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::cluster::{ClusterClient, ClusterClientExt, Pod};
use crate::error::{Error, Result};
use crate::model::{StepStatus, WorkflowStep, WorkflowStepStatus};

const CONTEXT_KEY_VARS: &str = "vars";
const CONTEXT_KEY_MUTABLE: &str = "mutable";
const CONTEXT_KEY_LOG_CONFIG: &str = "logConfig";

/// Lines kept from the end of each container log.
pub const LOG_TAIL_LINES: i64 = 1000;

pub const LOG_SOURCE_RESOURCE: &str = "Resource";
pub const LOG_SOURCE_URL: &str = "URL";

/// Identity and phase of a step, as shown next to its data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBase {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub phase: String,
}

impl From<&StepStatus> for StepBase {
    fn from(status: &StepStatus) -> Self {
        Self {
            id: status.id.clone(),
            name: status.name.clone(),
            step_type: status.step_type.clone(),
            phase: status.phase.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputValue {
    pub name: String,
    pub value_from: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutputs {
    #[serde(flatten)]
    pub step: StepBase,
    pub values: Vec<OutputValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputValue {
    pub value: String,
    pub from: String,
    /// Step declaring the output this input reads, if known.
    pub from_step: String,
    pub parameter_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInputs {
    #[serde(flatten)]
    pub step: StepBase,
    pub values: Vec<InputValue>,
}

/// Pod selection for resource logs. A name wins over the label selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResource {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub label_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSource {
    #[serde(default)]
    pub resources: Vec<LogResource>,
    #[serde(default)]
    pub url: String,
}

/// Where the logs of one step live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Logs are the engine's own data-passing logs for the step.
    #[serde(default)]
    pub data: bool,
    #[serde(default)]
    pub source: Option<LogSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLog {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_source: String,
    #[serde(flatten)]
    pub step: StepBase,
    pub log: String,
}

/// Exported variables of a context. A context without `vars` has none.
pub fn context_vars(context: &BTreeMap<String, String>) -> Result<Value> {
    match context.get(CONTEXT_KEY_VARS) {
        None => Ok(Value::Object(Default::default())),
        Some(raw) if raw.trim().is_empty() => Ok(Value::Object(Default::default())),
        Some(raw) => serde_json::from_str(raw).map_err(|e| Error::GetContextBackendData(e.to_string())),
    }
}

/// Value at a dotted path such as `deploy.status.url`.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Log source configuration of a step, if the context declares one.
pub fn log_config_for_step(context: &BTreeMap<String, String>, step: &str) -> Result<Option<LogConfig>> {
    let Some(raw_mutable) = context.get(CONTEXT_KEY_MUTABLE).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    let mutable: HashMap<String, String> =
        serde_json::from_str(raw_mutable).map_err(|e| Error::GetContextBackendData(e.to_string()))?;
    let Some(raw_config) = mutable.get(CONTEXT_KEY_LOG_CONFIG).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    let mut configs: HashMap<String, LogConfig> = serde_json::from_str(raw_config)?;
    Ok(configs.remove(step))
}

/// Walk the status tree the way step data is presented.
///
/// Without a step name every step and sub-step is visited. With one, only
/// the matching step (with its sub-steps) or the matching sub-step is.
fn visit_steps<T>(
    statuses: &[WorkflowStepStatus],
    step_name: Option<&str>,
    mut f: impl FnMut(&StepStatus) -> T,
) -> Vec<T> {
    let mut out = Vec::new();
    for status in statuses {
        if let Some(name) = step_name
            && status.step.name != name
        {
            if let Some(sub) = status.sub_step(name) {
                out.push(f(sub));
                break;
            }
            continue;
        }
        out.push(f(&status.step));
        out.extend(status.sub_steps.iter().map(&mut f));
        if step_name.is_some() {
            break;
        }
    }
    out
}

fn declared_steps(declared: &[WorkflowStep]) -> impl Iterator<Item = &crate::model::WorkflowStepBase> {
    declared
        .iter()
        .flat_map(|step| std::iter::once(&step.base).chain(step.sub_steps.iter()))
}

/// Declared outputs of each visited step with their current values.
///
/// Outputs missing from the variables are left out.
pub fn collect_step_outputs(
    declared: &[WorkflowStep],
    statuses: &[WorkflowStepStatus],
    vars: &Value,
    step_name: Option<&str>,
) -> Vec<StepOutputs> {
    let outputs: HashMap<&str, &[crate::model::StepOutput]> = declared_steps(declared)
        .map(|step| (step.name.as_str(), step.outputs.as_slice()))
        .collect();

    visit_steps(statuses, step_name, |status| StepOutputs {
        step: StepBase::from(status),
        values: outputs
            .get(status.name.as_str())
            .copied()
            .unwrap_or_default()
            .iter()
            .filter_map(|output| {
                lookup_path(vars, &output.name).map(|value| OutputValue {
                    name: output.name.clone(),
                    value_from: output.value_from.clone(),
                    value: render(value),
                })
            })
            .collect(),
    })
}

/// Declared inputs of each visited step with their current values and the
/// step whose output they read.
pub fn collect_step_inputs(
    declared: &[WorkflowStep],
    statuses: &[WorkflowStepStatus],
    vars: &Value,
    step_name: Option<&str>,
) -> Vec<StepInputs> {
    let mut producers: HashMap<&str, &str> = HashMap::new();
    let mut inputs: HashMap<&str, &[crate::model::StepInput]> = HashMap::new();
    for step in declared_steps(declared) {
        inputs.insert(step.name.as_str(), step.inputs.as_slice());
        for output in &step.outputs {
            producers.insert(output.name.as_str(), step.name.as_str());
        }
    }

    visit_steps(statuses, step_name, |status| StepInputs {
        step: StepBase::from(status),
        values: inputs
            .get(status.name.as_str())
            .copied()
            .unwrap_or_default()
            .iter()
            .filter_map(|input| {
                lookup_path(vars, &input.from).map(|value| InputValue {
                    value: render(value),
                    from: input.from.clone(),
                    from_step: producers
                        .get(input.from.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                    parameter_key: input.parameter_key.clone(),
                })
            })
            .collect(),
    })
}

/// Tail of every container log of the selected pods.
///
/// Containers are printed in `pod/container` order, each under a header
/// line. When filters are given only lines containing all of them are kept.
/// A container whose log cannot be read is skipped.
pub async fn read_resource_logs(
    cluster: &dyn ClusterClient,
    resources: &[LogResource],
    filters: &[String],
) -> Result<String> {
    let mut pods: Vec<Pod> = Vec::new();
    for resource in resources {
        if !resource.name.is_empty() {
            if let Some(pod) = cluster
                .get_object::<Pod>(&resource.namespace, &resource.name)
                .await?
            {
                pods.push(pod);
            }
        } else {
            pods.extend(
                cluster
                    .list_objects::<Pod>(&resource.namespace, &resource.label_selector)
                    .await?,
            );
        }
    }

    let mut logs: BTreeMap<String, String> = BTreeMap::new();
    for pod in &pods {
        for container in &pod.spec.containers {
            let log = match cluster
                .pod_logs(
                    &pod.metadata.namespace,
                    &pod.metadata.name,
                    &container.name,
                    LOG_TAIL_LINES,
                )
                .await
            {
                Ok(log) => log,
                Err(e) => {
                    error!(error = %e, pod = %pod.metadata.name, container = %container.name, "Failed to read pod logs");
                    continue;
                }
            };
            let mut block = format!("› {} {}\n", pod.metadata.name, container.name);
            for line in log.lines() {
                if filters.iter().all(|f| line.contains(f.as_str())) {
                    block.push_str(line);
                    block.push('\n');
                }
            }
            logs.insert(format!("{}/{}", pod.metadata.name, container.name), block);
        }
    }
    Ok(logs.into_values().collect())
}

/// Body of a log served over HTTP.
pub async fn read_url_log(http: &reqwest::Client, url: &str) -> Result<String> {
    let response = http
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            warn!(error = %e, url = %url, "Failed to fetch logs from URL");
            Error::ReadSourceLog(e.to_string())
        })?;
    response.text().await.map_err(|e| {
        warn!(error = %e, url = %url, "Failed to read logs from URL");
        Error::ReadSourceLog(e.to_string())
    })
}

/// Read logs from a configured source. Returns the source kind and the log.
///
/// Resource sources are read first; a URL, when also set, replaces them.
pub async fn read_source_logs(
    cluster: &dyn ClusterClient,
    http: &reqwest::Client,
    source: &LogSource,
) -> Result<(String, String)> {
    let mut kind = String::new();
    let mut logs = String::new();
    if !source.resources.is_empty() {
        kind = LOG_SOURCE_RESOURCE.to_string();
        logs = read_resource_logs(cluster, &source.resources, &[]).await?;
    }
    if !source.url.is_empty() {
        kind = LOG_SOURCE_URL.to_string();
        logs = read_url_log(http, &source.url).await?;
    }
    Ok((kind, logs))
}
