use serde::Deserialize;
use serde_json::Value;

/// Response envelope shared by every reporting API operation.
///
/// Success payloads carry `result == "success"` and rows under `data`.
/// Failure payloads carry `result == "failed"` plus an `error` string, or
/// the legacy `status`/`msg` pair used by the range endpoint when a window
/// has no rows.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(rename = "Auth-Key", default)]
    pub auth_key: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<Value>>,
}

impl ApiEnvelope {
    pub fn is_success(&self) -> bool {
        self.result.as_deref() == Some("success")
    }

    /// Whether this payload signals an expired or invalid bearer token.
    /// Triggers exactly one re-authentication and retry per call.
    pub fn token_expired(&self) -> bool {
        const EXPIRED: [&str; 2] = ["Invalid or token expired", "Expired token"];
        self.result.as_deref() == Some("failed")
            && self
                .error
                .as_deref()
                .is_some_and(|e| EXPIRED.contains(&e))
    }

    /// The "No Data Found" failure is an empty window, not an error.
    pub fn is_no_data(&self) -> bool {
        self.status.as_deref() == Some("Failed") && self.msg.as_deref() == Some("No Data Found")
    }

    pub fn into_rows(self) -> Vec<Value> {
        if self.is_success() {
            self.data.unwrap_or_default()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_token_payloads_are_detected() {
        for error in ["Invalid or token expired", "Expired token"] {
            let env: ApiEnvelope = serde_json::from_str(&format!(
                r#"{{"result": "failed", "error": "{error}"}}"#
            ))
            .unwrap();
            assert!(env.token_expired());
        }
    }

    #[test]
    fn other_failures_are_not_expiry() {
        let env: ApiEnvelope =
            serde_json::from_str(r#"{"result": "failed", "error": "Server busy"}"#).unwrap();
        assert!(!env.token_expired());
        assert!(env.into_rows().is_empty());
    }

    #[test]
    fn no_data_window_is_empty_not_error() {
        let env: ApiEnvelope =
            serde_json::from_str(r#"{"status": "Failed", "msg": "No Data Found"}"#).unwrap();
        assert!(env.is_no_data());
        assert!(!env.token_expired());
    }

    #[test]
    fn success_rows_are_extracted() {
        let env: ApiEnvelope = serde_json::from_str(
            r#"{"result": "success", "data": [{"id": 1}, {"id": 2}]}"#,
        )
        .unwrap();
        assert!(env.is_success());
        assert_eq!(env.into_rows().len(), 2);
    }
}
