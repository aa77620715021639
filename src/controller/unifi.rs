use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ClientSample, DeviceControl};

const CSRF_HEADER: &str = "X-CSRF-Token";

/// UniFi controller connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Base URL, e.g. `https://192.168.1.1`
    pub url: String,

    pub username: String,

    pub password: String,

    /// Controller site name
    #[serde(default = "default_site")]
    pub site: String,

    /// UniFi OS consoles (UDM, UDM Pro, UDR) proxy the network API
    #[serde(default)]
    pub is_udm: bool,

    /// Accept self-signed certificates
    #[serde(default)]
    pub insecure: bool,

    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_site() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl ControllerConfig {
    /// Validate controller settings
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url).context("Invalid controller URL")?;

        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Controller URL must use http or https (got: {})", url.scheme());
        }

        if self.username.is_empty() {
            anyhow::bail!("Controller username cannot be empty");
        }

        if self.site.is_empty() {
            anyhow::bail!("Controller site cannot be empty");
        }

        if self.timeout_secs == 0 {
            anyhow::bail!("Controller timeout must be at least 1 second");
        }

        Ok(())
    }
}

/// Envelope of the classic controller API
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    meta: Option<ApiMeta>,
}

#[derive(Debug, Deserialize)]
struct ApiMeta {
    rc: String,
    #[serde(default)]
    msg: Option<String>,
}

/// UniFi controller API client
///
/// Each instance owns its HTTP session (cookie jar) and CSRF token.
pub struct UnifiClient {
    client: Client,
    config: ControllerConfig,
    base_url: String,
    csrf_token: RwLock<Option<String>>,
}

impl UnifiClient {
    /// Create a new client; no request is made until [`login`](Self::login)
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .user_agent(format!("netquota/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = config.url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            base_url,
            csrf_token: RwLock::new(None),
        })
    }

    fn api_prefix(&self) -> &'static str {
        if self.config.is_udm { "/proxy/network" } else { "" }
    }

    /// Full URL of a site-scoped API endpoint
    pub fn site_url(&self, endpoint: &str) -> String {
        format!(
            "{}{}/api/s/{}/{}",
            self.base_url,
            self.api_prefix(),
            self.config.site,
            endpoint.trim_start_matches('/')
        )
    }

    fn login_url(&self) -> String {
        if self.config.is_udm {
            format!("{}/api/auth/login", self.base_url)
        } else {
            format!("{}/api/login", self.base_url)
        }
    }

    /// Authenticate and start a session
    pub async fn login(&self) -> Result<()> {
        let payload = json!({
            "username": self.config.username,
            "password": self.config.password,
        });

        let response = self
            .send(Method::POST, &self.login_url(), Some(&payload))
            .await
            .context("Login request failed")?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Login failed with status {}: {}", status, body);
        }

        tracing::info!("Logged in to controller at {}", self.base_url);
        Ok(())
    }

    /// Send one request, attaching and refreshing the CSRF token
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let mut request = self.client.request(method, url);

        if let Some(body) = body {
            request = request.json(body);
        }

        if let Some(token) = self.csrf_token.read().await.as_deref() {
            request = request.header(CSRF_HEADER, token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to connect to controller: {}", url))?;

        if let Some(token) = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.csrf_token.write().await = Some(token.to_string());
        }

        Ok(response)
    }

    /// Send a request, logging in again once if the session expired
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let response = self.send(method.clone(), url, body).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!("Controller session expired, logging in again");
        self.login().await?;
        self.send(method, url, body).await
    }

    /// Issue a station manager command (`block-sta`, `unblock-sta`)
    async fn station_command(&self, cmd: &str, mac: &str) -> Result<()> {
        let payload = station_command_payload(cmd, mac);
        let response = self
            .request(Method::POST, &self.site_url("cmd/stamgr"), Some(&payload))
            .await
            .with_context(|| format!("{} request failed", cmd))?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;
        if status != StatusCode::OK {
            anyhow::bail!("{} for {} failed with status {}: {}", cmd, mac, status, body);
        }

        check_meta(&body)
    }
}

#[async_trait]
impl DeviceControl for UnifiClient {
    async fn list_connected_clients(&self) -> Result<Vec<ClientSample>> {
        let response = self
            .request(Method::GET, &self.site_url("stat/sta"), None)
            .await?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;
        if status != StatusCode::OK {
            anyhow::bail!("Failed to get clients: status {}: {}", status, body);
        }

        let clients = parse_clients(&body)?;
        tracing::debug!("Controller reported {} connected clients", clients.len());
        Ok(clients)
    }

    async fn block_client(&self, mac: &str) -> Result<()> {
        self.station_command("block-sta", mac).await
    }

    async fn unblock_client(&self, mac: &str) -> Result<()> {
        self.station_command("unblock-sta", mac).await
    }
}

fn station_command_payload(cmd: &str, mac: &str) -> serde_json::Value {
    json!({
        "cmd": cmd,
        "mac": mac.to_lowercase(),
    })
}

/// Decode a `stat/sta` response body
fn parse_clients(body: &str) -> Result<Vec<ClientSample>> {
    let response: ApiResponse<ClientSample> =
        serde_json::from_str(body).context("Failed to decode client list")?;

    check_api_meta(response.meta.as_ref())?;
    Ok(response.data)
}

fn check_meta(body: &str) -> Result<()> {
    let response: ApiResponse<serde_json::Value> =
        serde_json::from_str(body).context("Failed to decode controller response")?;
    check_api_meta(response.meta.as_ref())
}

fn check_api_meta(meta: Option<&ApiMeta>) -> Result<()> {
    match meta {
        Some(meta) if meta.rc != "ok" => anyhow::bail!(
            "Controller returned error: {}",
            meta.msg.as_deref().unwrap_or(&meta.rc)
        ),
        _ => Ok(()),
    }
}
