pub mod error;
pub mod types;

pub use error::{ReportError, Result};
pub use types::ApiEnvelope;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Per-day endpoints take dd-mm-YYYY dates; the range endpoint takes ISO.
/// The upstream API really is inconsistent about this.
const DAY_FORMAT: &str = "%d-%m-%Y";
const RANGE_FORMAT: &str = "%Y-%m-%d";

/// Client for the third-party healthcare reporting API.
///
/// All operations hit a single URL; the upstream routes on boolean flags in
/// the JSON body (including for GET requests). Authentication is a login
/// call returning an `Auth-Key` bearer token; expired tokens are detected
/// from the failure payload and refreshed once per call.
pub struct ReportClient {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl ReportClient {
    pub fn new(url: &str, username: &str, password: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(None),
        }
    }

    /// Authenticate and store the bearer token.
    pub async fn login(&self) -> Result<()> {
        let body = json!({
            "login": true,
            "username": self.username,
            "password": self.password,
        });
        let resp = self.client.get(&self.url).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ReportError::Api { status: status.as_u16(), message });
        }

        let envelope: ApiEnvelope = resp.json().await?;
        if !envelope.is_success() {
            return Err(ReportError::AuthFailed(
                envelope.error.or(envelope.msg).unwrap_or_default(),
            ));
        }
        let key = envelope
            .auth_key
            .ok_or_else(|| ReportError::AuthFailed("login response missing Auth-Key".into()))?;

        info!("Reporting API login successful");
        *self.token.write().await = Some(key);
        Ok(())
    }

    /// Attendance records for patient training sessions on one day.
    pub async fn patient_trainings(&self, date: NaiveDate) -> Result<Vec<Value>> {
        let body = json!({
            "get_total_ccp_class_attendancedata": true,
            "date": date.format(DAY_FORMAT).to_string(),
        });
        let envelope = self.call(&body).await?;
        debug!(%date, "Fetched patient training sessions");
        rows(envelope)
    }

    /// Nurse training sessions on one day.
    pub async fn nurse_trainings(&self, date: NaiveDate) -> Result<Vec<Value>> {
        let body = json!({
            "get_total_nurse_training_sessiondata": true,
            "date": date.format(DAY_FORMAT).to_string(),
        });
        let envelope = self.call(&body).await?;
        debug!(%date, "Fetched nurse training sessions");
        rows(envelope)
    }

    /// Nurse profile keyed by phone number.
    pub async fn nurse_profile(&self, phone_number: &str) -> Result<Vec<Value>> {
        let body = json!({
            "get_nurses_detailes_data": true,
            "username": phone_number,
        });
        let envelope = self.call(&body).await?;
        debug!(phone_suffix = phone_suffix(phone_number), "Fetched nurse profile");
        rows(envelope)
    }

    /// Session records for one entity across an inclusive date range.
    /// Used by the incremental sync; callers chunk the range themselves.
    pub async fn sessions(
        &self,
        username: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Value>> {
        let body = json!({
            "get_sessions_data": true,
            "username": username,
            "fromdate": from.format(RANGE_FORMAT).to_string(),
            "todate": to.format(RANGE_FORMAT).to_string(),
        });
        let envelope = self.call(&body).await?;
        rows(envelope)
    }

    /// Issue one authenticated call, re-authenticating once on an expired
    /// token. A second expiry in a row propagates as an auth failure.
    async fn call(&self, body: &Value) -> Result<ApiEnvelope> {
        let envelope = self.call_once(body).await?;
        if !envelope.token_expired() {
            return Ok(envelope);
        }

        debug!("Token expired, re-authenticating");
        self.login().await?;
        let envelope = self.call_once(body).await?;
        if envelope.token_expired() {
            return Err(ReportError::AuthFailed(
                "token rejected immediately after re-login".into(),
            ));
        }
        Ok(envelope)
    }

    async fn call_once(&self, body: &Value) -> Result<ApiEnvelope> {
        let token = self
            .token
            .read()
            .await
            .clone()
            .ok_or_else(|| ReportError::AuthFailed("not logged in".into()))?;

        let resp = self
            .client
            .get(&self.url)
            .header("Auth-Key", token)
            .header("Username", &self.username)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ReportError::Api { status: status.as_u16(), message });
        }

        Ok(resp.json().await?)
    }
}

/// Last four characters of a phone number, for logging without the full
/// number. Splits on char boundaries, so stray non-ASCII input is safe.
fn phone_suffix(phone: &str) -> &str {
    phone
        .char_indices()
        .rev()
        .nth(3)
        .map_or(phone, |(idx, _)| &phone[idx..])
}

/// Row extraction shared by every data operation. "No Data Found" means an
/// empty window; any other failure payload is an error, never silently
/// empty rows (an empty result advances watermarks downstream).
fn rows(envelope: ApiEnvelope) -> Result<Vec<Value>> {
    if envelope.is_no_data() {
        return Ok(Vec::new());
    }
    if !envelope.is_success() {
        return Err(ReportError::Failed(
            envelope
                .error
                .or(envelope.msg)
                .unwrap_or_else(|| "unrecognized failure payload".into()),
        ));
    }
    Ok(envelope.into_rows())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_suffix_keeps_last_four_chars() {
        assert_eq!(phone_suffix("9876543210"), "3210");
        assert_eq!(phone_suffix("321"), "321");
        assert_eq!(phone_suffix(""), "");
    }

    #[test]
    fn phone_suffix_is_char_boundary_safe() {
        // Dirty upstream data occasionally carries non-ASCII characters.
        assert_eq!(phone_suffix("98765\u{00e9}21"), "5\u{00e9}21");
        assert_eq!(
            phone_suffix("\u{0928}\u{0930}\u{094d}\u{0938}"),
            "\u{0928}\u{0930}\u{094d}\u{0938}"
        );
    }
}
