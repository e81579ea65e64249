use std::time::Duration;

use async_trait::async_trait;
use flametech_core::{BridgeError, ShadowDocument};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CloudConfig;

type Result<T> = std::result::Result<T, BridgeError>;

/// Remote document store holding the hub's shadow.
#[async_trait]
pub trait ShadowTransport: Send + Sync {
    async fn fetch(&self) -> Result<ShadowDocument>;
    async fn dispatch(&self, command_id: u64, command: &str) -> Result<()>;
}

// Tokens are refreshed this long before the cloud says they expire.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    expires_at: Instant,
}

pub struct CloudClient {
    http: reqwest::Client,
    config: CloudConfig,
    session: Mutex<Option<Session>>,
}

impl CloudClient {
    pub fn new(config: CloudConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BridgeError::TransportUnavailable(format!("http client: {e}")))?;
        Ok(Self { http, config, session: Mutex::new(None) })
    }

    /// Returns a usable access token, logging in again when the cached one is
    /// missing or about to expire.
    pub async fn ensure_session(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            if current.expires_at > Instant::now() + EXPIRY_SKEW {
                return Ok(current.access_token.clone());
            }
            debug!("Cloud token expiring, refreshing");
        }
        let fresh = self.login().await?;
        let token = fresh.access_token.clone();
        *session = Some(fresh);
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.session.lock().await = None;
    }

    async fn login(&self) -> Result<Session> {
        let resp = self
            .http
            .post(&self.config.auth_url)
            .json(&json!({ "username": self.config.username, "password": self.config.password }))
            .send()
            .await
            .map_err(unavailable)?;
        let resp = check_status(resp)?;
        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::Unauthorized(format!("login response: {e}")))?;
        info!(expires_in = body.expires_in, "Cloud session established");
        Ok(Session {
            access_token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }

    /// Sends an authorised request; a 401 drops the token and retries once.
    async fn send_authorized(&self, build: impl Fn(&str) -> RequestBuilder) -> Result<Response> {
        let token = self.ensure_session().await?;
        let resp = build(&token).send().await.map_err(unavailable)?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_status(resp);
        }
        warn!("Cloud rejected token, re-authenticating");
        self.invalidate().await;
        let token = self.ensure_session().await?;
        let resp = build(&token).send().await.map_err(unavailable)?;
        check_status(resp)
    }
}

#[async_trait]
impl ShadowTransport for CloudClient {
    async fn fetch(&self) -> Result<ShadowDocument> {
        let url = self.config.shadow_url();
        let resp = self.send_authorized(|token| self.http.get(&url).bearer_auth(token)).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BridgeError::DataUnavailable(format!("shadow body: {e}")))?;
        ShadowDocument::from_json(body)
    }

    async fn dispatch(&self, command_id: u64, command: &str) -> Result<()> {
        let url = self.config.shadow_url();
        let body = dispatch_body(command_id, command);
        self.send_authorized(|token| self.http.post(&url).bearer_auth(token).json(&body)).await?;
        Ok(())
    }
}

pub fn dispatch_body(command_id: u64, command: &str) -> serde_json::Value {
    json!({
        "state": {
            "desired": {
                "CMD_LST": {
                    "CMD_ID": command_id,
                    "CMD_steps": [ { "C": command } ]
                }
            }
        }
    })
}

fn unavailable(e: reqwest::Error) -> BridgeError {
    BridgeError::TransportUnavailable(e.to_string())
}

fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let msg = format!("{} {}", status.as_u16(), resp.url().path());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BridgeError::Unauthorized(msg)),
        _ => Err(BridgeError::TransportUnavailable(msg)),
    }
}
