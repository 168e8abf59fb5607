use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tracing::info;

use wardsync_common::Config;

const GITHUB_API: &str = "https://api.github.com";

/// Extract the workflow file name from a `GITHUB_WORKFLOW_REF` value,
/// e.g. `org/repo/.github/workflows/sync.yml@refs/heads/main` → `sync.yml`.
pub fn workflow_file_from_ref(workflow_ref: &str) -> Option<&str> {
    let rest = workflow_ref.split_once(".github/workflows/")?.1;
    let file = rest.split('@').next()?;
    if file.ends_with(".yml") || file.ends_with(".yaml") {
        Some(file)
    } else {
        None
    }
}

/// Dispatch a follow-up run of the current workflow in continuing mode.
/// Called when the wall-clock budget expires: the replacement process
/// resumes the round instead of this one continuing past its budget.
pub async fn dispatch_followup(config: &Config, timeout_mins: u64) -> Result<()> {
    let repo = config
        .github_repository
        .as_deref()
        .ok_or_else(|| anyhow!("GITHUB_REPOSITORY not set"))?;
    let ref_name = config
        .github_ref_name
        .as_deref()
        .ok_or_else(|| anyhow!("GITHUB_REF_NAME not set"))?;
    let workflow_ref = config
        .github_workflow_ref
        .as_deref()
        .ok_or_else(|| anyhow!("GITHUB_WORKFLOW_REF not set"))?;
    let token = config
        .github_token
        .as_deref()
        .ok_or_else(|| anyhow!("GH_PAT not set"))?;
    let workflow = workflow_file_from_ref(workflow_ref)
        .ok_or_else(|| anyhow!("cannot parse workflow file from {workflow_ref}"))?;

    let url = format!("{GITHUB_API}/repos/{repo}/actions/workflows/{workflow}/dispatches");
    let body = json!({
        "ref": ref_name,
        "inputs": {
            "timeout_mins": timeout_mins.to_string(),
            "trigger_mode": "continuing",
        },
    });

    let resp = reqwest::Client::new()
        .post(&url)
        .bearer_auth(token)
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "wardsync")
        .json(&body)
        .send()
        .await
        .context("Workflow dispatch request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        bail!("workflow dispatch returned {status}: {message}");
    }

    info!(workflow, ref_name, "Dispatched follow-up workflow run");
    Ok(())
}
