#![allow(dead_code)]

use async_trait::async_trait;
use copilot_metrics::config::Config;
use copilot_metrics::{MetricsError, MetricsResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const API: &str = "https://api.test";
pub const APP_ID: &str = "12345";
pub const INSTALLATION_ID: &str = "67890";
pub const TOKEN_URL: &str = "https://api.test/app/installations/67890/access_tokens";

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    fs::read_to_string(fixture_path(name)).expect("fixture exists")
}

pub fn private_key() -> Vec<u8> {
    fs::read(fixture_path("app_key.pem")).expect("test key exists")
}

pub fn public_key() -> Vec<u8> {
    fs::read(fixture_path("app_key.pub.pem")).expect("test key exists")
}

/// Config pointing at the scripted API, writing into `output_dir`, without pacing.
pub fn test_config(output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.github.api_base_url = API.to_string();
    config.github.app_id = APP_ID.to_string();
    config.github.installation_id = INSTALLATION_ID.to_string();
    config.github.private_key_path = Some(fixture_path("app_key.pem"));
    config.fetch.request_delay_ms = 0;
    config.output.directory = output_dir.to_path_buf();
    config
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub bearer: Option<String>,
}

enum Reply {
    Body(String),
    Fail(String),
}

/// In-memory transport answering from a fixed route table and recording every call.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(&'static str, String), Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that already answers the token exchange successfully.
    pub fn authenticated() -> Self {
        let transport = Self::new();
        transport.on_post(
            TOKEN_URL,
            r#"{"token":"ghs_test_token","expires_at":"2030-01-01T00:00:00Z"}"#,
        );
        transport
    }

    pub fn on_get(&self, url: &str, body: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(("GET", url.to_string()), Reply::Body(body.to_string()));
        self
    }

    pub fn on_get_failure(&self, url: &str, reason: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(("GET", url.to_string()), Reply::Fail(reason.to_string()));
        self
    }

    pub fn on_post(&self, url: &str, body: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(("POST", url.to_string()), Reply::Body(body.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "GET")
            .map(|c| c.url)
            .collect()
    }

    fn answer(&self, method: &'static str, url: &str, bearer: Option<&str>) -> MetricsResult<String> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            bearer: bearer.map(str::to_string),
        });
        match self.routes.lock().unwrap().get(&(method, url.to_string())) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Fail(reason)) => Err(MetricsError::Transport(reason.clone())),
            None => Ok(r#"{"message":"Not Found","status":"404"}"#.to_string()),
        }
    }
}

#[async_trait]
impl copilot_metrics::transport::Transport for ScriptedTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> MetricsResult<String> {
        self.answer("GET", url, bearer)
    }

    async fn post(&self, url: &str, bearer: &str) -> MetricsResult<String> {
        self.answer("POST", url, Some(bearer))
    }
}
