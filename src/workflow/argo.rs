use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::{Response, StatusCode};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Phase, SubmitOptions, WorkflowEngine, WorkflowError, WorkflowLogs, WorkflowStatus};

/// Container whose output is reported as the execution's logs.
const LOG_CONTAINER: &str = "main";

/// Argo Workflows server REST client.
pub struct ArgoWorkflows {
    http: reqwest::Client,
    addr: String,
    namespace: String,
    timeout: Duration,
}

impl ArgoWorkflows {
    pub fn new(
        http: reqwest::Client,
        addr: impl Into<String>,
        namespace: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            addr: addr.into().trim_end_matches('/').to_owned(),
            namespace: namespace.into(),
            timeout,
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/api/v1/workflows/{}{suffix}", self.addr, self.namespace)
    }

    fn log_url(&self, name: &str, follow: bool) -> String {
        let mut url = self.url(&format!(
            "/{name}/log?logOptions.container={LOG_CONTAINER}"
        ));
        if follow {
            url.push_str("&logOptions.follow=true");
        }
        url
    }

    async fn get_json(&self, url: &str, name: &str) -> Result<Value, WorkflowError> {
        let resp = self.http.get(url).timeout(self.timeout).send().await?;
        let resp = check_status(resp, name).await?;
        resp.json()
            .await
            .map_err(|e| WorkflowError::Backend(format!("undecodable workflow engine response: {e}")))
    }
}

async fn check_status(resp: Response, name: &str) -> Result<Response, WorkflowError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(WorkflowError::NotFound(name.to_owned()));
    }
    let body: Option<Value> = resp.json().await.ok();
    let message = body
        .as_ref()
        .and_then(|b| b.get("message"))
        .and_then(Value::as_str)
        .map_or_else(|| status.to_string(), str::to_owned);
    Err(WorkflowError::Backend(format!(
        "workflow engine returned {}: {message}",
        status.as_u16()
    )))
}

fn timestamp(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Extract the text of one newline-delimited log entry.
fn log_content(line: &[u8]) -> Option<String> {
    let entry: Value = serde_json::from_slice(line).ok()?;
    entry
        .pointer("/result/content")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[async_trait]
impl WorkflowEngine for ArgoWorkflows {
    #[tracing::instrument(skip(self, opts), fields(generate_name = %opts.generate_name), err)]
    async fn submit(&self, template: &str, opts: &SubmitOptions) -> Result<String, WorkflowError> {
        let labels = opts
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let parameters: Vec<String> = opts
            .parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let body = json!({
            "namespace": self.namespace,
            "resourceKind": "WorkflowTemplate",
            "resourceName": template,
            "submitOptions": {
                "generateName": opts.generate_name,
                "labels": labels,
                "parameters": parameters,
            },
        });

        let resp = self
            .http
            .post(self.url("/submit"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp, template).await?;
        let created: Value = resp
            .json()
            .await
            .map_err(|e| WorkflowError::Backend(format!("undecodable workflow engine response: {e}")))?;
        let name = created
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkflowError::Backend("submitted workflow has no name".into()))?;

        tracing::info!(workflow = name, template, "workflow submitted");
        Ok(name.to_owned())
    }

    async fn status(&self, name: &str) -> Result<WorkflowStatus, WorkflowError> {
        let wf = self.get_json(&self.url(&format!("/{name}")), name).await?;
        Ok(WorkflowStatus {
            name: wf
                .pointer("/metadata/name")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_owned(),
            status: Phase::from_engine(wf.pointer("/status/phase").and_then(Value::as_str)),
            created: timestamp(&wf, "/metadata/creationTimestamp"),
            finished: timestamp(&wf, "/status/finishedAt"),
        })
    }

    async fn logs(&self, name: &str) -> Result<WorkflowLogs, WorkflowError> {
        let resp = self
            .http
            .get(self.log_url(name, false))
            .timeout(self.timeout)
            .send()
            .await?;
        let body = check_status(resp, name).await?.bytes().await?;

        let mut logs = String::new();
        for line in body.split(|&b| b == b'\n') {
            if let Some(content) = log_content(line) {
                logs.push_str(&content);
                logs.push('\n');
            }
        }
        Ok(WorkflowLogs { logs })
    }

    #[tracing::instrument(skip(self, sink, cancel), err)]
    async fn log_stream(
        &self,
        name: &str,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), WorkflowError> {
        // No overall deadline: the stream lives as long as the execution.
        let resp = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            resp = self.http.get(self.log_url(name, true)).send() => resp?,
        };
        let mut stream = check_status(resp, name).await?.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("log stream cancelled");
                    return Ok(());
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            pending.extend_from_slice(&chunk?);

            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let Some(content) = log_content(&line) else {
                    continue;
                };
                if sink.send(content).await.is_err() {
                    return Ok(());
                }
            }
        }

        if let Some(content) = log_content(&pending) {
            let _ = sink.send(content).await;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, WorkflowError> {
        let listing = self
            .get_json(&self.url("?fields=items.metadata.name"), &self.namespace)
            .await?;
        Ok(listing
            .get("items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|item| item.pointer("/metadata/name").and_then(Value::as_str))
            .map(str::to_owned)
            .collect())
    }
}
