use std::path::Path;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

const BASE_URL: &str = "https://slack.com/api";

pub type Result<T> = std::result::Result<T, SlackError>;

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Slack API error: {0}")]
    Api(String),

    #[error("File error: {0}")]
    File(String),
}

impl From<reqwest::Error> for SlackError {
    fn from(err: reqwest::Error) -> Self {
        SlackError::Network(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
}

impl ApiResponse {
    fn into_result(self) -> Result<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(SlackError::Api(self.error.unwrap_or_default()))
        }
    }
}

/// Minimal Slack Web API client: plain-text alerts plus file uploads with
/// a caption. Failure alerts must not take down the pipeline, so callers
/// log and swallow errors from these methods on the error path.
pub struct SlackClient {
    client: reqwest::Client,
    token: String,
}

impl SlackClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    /// Post a plain-text message to a channel.
    pub async fn post_message(&self, channel_id: &str, text: &str) -> Result<()> {
        let body = json!({ "channel": channel_id, "text": text });
        let resp: ApiResponse = self
            .client
            .post(format!("{BASE_URL}/chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        resp.into_result()?;
        Ok(())
    }

    /// Upload a file to a channel with a caption, via the external-upload
    /// flow (get upload URL, POST the bytes, complete the upload).
    pub async fn upload_file(&self, channel_id: &str, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SlackError::File(format!("{}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let resp: ApiResponse = self
            .client
            .get(format!("{BASE_URL}/files.getUploadURLExternal"))
            .bearer_auth(&self.token)
            .query(&[("filename", filename.as_str()), ("length", &bytes.len().to_string())])
            .send()
            .await?
            .json()
            .await?;
        let resp = resp.into_result()?;
        let (upload_url, file_id) = match (resp.upload_url, resp.file_id) {
            (Some(url), Some(id)) => (url, id),
            _ => return Err(SlackError::Api("upload URL response missing fields".into())),
        };

        let status = self
            .client
            .post(&upload_url)
            .body(bytes)
            .send()
            .await?
            .status();
        if !status.is_success() {
            return Err(SlackError::Api(format!("upload POST returned {status}")));
        }

        let body = json!({
            "files": [{ "id": file_id, "title": filename }],
            "channel_id": channel_id,
            "initial_comment": caption,
        });
        let resp: ApiResponse = self
            .client
            .post(format!("{BASE_URL}/files.completeUploadExternal"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        resp.into_result()?;

        info!(file = filename.as_str(), channel = channel_id, "Uploaded file to Slack");
        Ok(())
    }
}

/// The failure alert posted when a sync run dies in prod.
pub fn alert_text(source_name: &str, error: &str, run_url: Option<&str>) -> String {
    let mut text = format!(
        ":warning: Sync for *{source_name}* failed with the following error:\n\n`{error}`"
    );
    if let Some(url) = run_url {
        text.push_str(&format!(
            "\n\nPlease see the GitHub Actions <{url}|workflow run log>."
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_text_includes_source_and_error() {
        let text = alert_text("andhra_pradesh_mlhp", "boom", None);
        assert!(text.contains("*andhra_pradesh_mlhp*"));
        assert!(text.contains("`boom`"));
        assert!(!text.contains("workflow run log"));
    }

    #[test]
    fn alert_text_links_run_url_when_present() {
        let text = alert_text("src", "err", Some("https://github.com/o/r/runs/1"));
        assert!(text.contains("<https://github.com/o/r/runs/1|workflow run log>"));
    }
}
