use std::env;

use tracing::info;

/// Deployment environment, derived from the CI branch name unless
/// overridden with `WARDSYNC_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Dev,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Dev => "dev",
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// Loaded once at startup and passed by reference to each component;
/// nothing reads the environment after this.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub source_name: String,

    // Reporting API
    pub report_url: String,
    pub report_username: String,
    pub report_password: String,

    // Warehouse (Postgres)
    pub database_url: String,

    // Slack (optional; alerts are skipped when unset)
    pub slack_token: Option<String>,
    pub slack_channel_id: Option<String>,

    // CI workflow re-dispatch (optional; only present inside Actions runs)
    pub github_repository: Option<String>,
    pub github_ref_name: Option<String>,
    pub github_workflow_ref: Option<String>,
    pub github_token: Option<String>,
    pub run_url: Option<String>,

    // Object storage + messaging API (optional; the attachment mirror
    // validates their presence at startup)
    pub bucket_endpoint: Option<String>,
    pub bucket_name: Option<String>,
    pub bucket_access_key_id: Option<String>,
    pub bucket_secret_access_key: Option<String>,
    /// JSON object mapping channel phone numbers to messaging API tokens.
    pub channel_tokens: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env(source_name: &str) -> Self {
        let github_ref_name = env::var("GITHUB_REF_NAME").ok();
        let environment = match env::var("WARDSYNC_ENV").ok().as_deref() {
            Some("prod") => Environment::Prod,
            Some(_) => Environment::Dev,
            None if github_ref_name.as_deref() == Some("main") => Environment::Prod,
            None => Environment::Dev,
        };

        Self {
            environment,
            source_name: source_name.to_string(),
            report_url: required_env("REPORT_API_URL"),
            report_username: required_env("REPORT_API_USERNAME"),
            report_password: required_env("REPORT_API_PASSWORD"),
            database_url: required_env("DATABASE_URL"),
            slack_token: env::var("SLACK_TOKEN").ok(),
            slack_channel_id: env::var("SLACK_CHANNEL_ID").ok(),
            github_repository: env::var("GITHUB_REPOSITORY").ok(),
            github_ref_name,
            github_workflow_ref: env::var("GITHUB_WORKFLOW_REF").ok(),
            github_token: env::var("GH_PAT").ok(),
            run_url: env::var("RUN_URL").ok(),
            bucket_endpoint: env::var("BUCKET_ENDPOINT_URL").ok(),
            bucket_name: env::var("BUCKET_NAME").ok(),
            bucket_access_key_id: env::var("BUCKET_ACCESS_KEY_ID").ok(),
            bucket_secret_access_key: env::var("BUCKET_SECRET_ACCESS_KEY").ok(),
            channel_tokens: env::var("CHANNEL_API_TOKENS").ok(),
        }
    }

    /// Log the non-secret parts of the configuration.
    pub fn log_redacted(&self) {
        info!(
            environment = self.environment.as_str(),
            source = self.source_name.as_str(),
            report_url = self.report_url.as_str(),
            slack = self.slack_channel_id.is_some(),
            ci_ref = self.github_ref_name.as_deref().unwrap_or("-"),
            "Configuration loaded"
        );
    }

    /// Whether a follow-up CI run can be dispatched from this run.
    pub fn can_dispatch_workflow(&self) -> bool {
        self.github_repository.is_some()
            && self.github_ref_name.is_some()
            && self.github_workflow_ref.is_some()
            && self.github_token.is_some()
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
