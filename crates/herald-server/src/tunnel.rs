//! Optional outbound ngrok tunnel for external exposure.
//!
//! Spawns the `ngrok` agent against the local listener and resolves the
//! public URL from the agent's local API. Start failure is non-fatal for
//! the caller: the server continues local-only.

use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use herald_types::HeraldError;

const AGENT_API: &str = "http://127.0.0.1:4040/api/tunnels";
const START_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A running ngrok tunnel.
pub struct NgrokTunnel {
    child: Child,
    public_url: String,
}

impl NgrokTunnel {
    /// Start `ngrok http <local_addr>` and wait for the public URL.
    pub async fn start(
        local_addr: &str,
        auth_token: &str,
        domain: &str,
    ) -> Result<Self, HeraldError> {
        let mut cmd = Command::new("ngrok");
        cmd.arg("http").arg(local_addr).arg("--log").arg("stdout");
        if !domain.is_empty() {
            cmd.arg("--url").arg(domain);
        }
        if !auth_token.is_empty() {
            cmd.env("NGROK_AUTHTOKEN", auth_token);
        }
        cmd.stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| HeraldError::Server(format!("starting ngrok: {e}")))?;

        let public_url = wait_for_public_url().await?;
        info!(public_url = %public_url, "tunnel established");

        Ok(Self { child, public_url })
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Terminate the agent. Called before HTTP server shutdown.
    pub async fn close(mut self) {
        debug!("closing tunnel");
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill ngrok agent");
        }
    }
}

/// Poll the agent API until it reports a tunnel with a public URL.
async fn wait_for_public_url() -> Result<String, HeraldError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| HeraldError::Server(format!("building http client: {e}")))?;

    let deadline = tokio::time::Instant::now() + START_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if let Ok(response) = client.get(AGENT_API).send().await {
            if let Ok(body) = response.json::<serde_json::Value>().await {
                if let Some(url) = body
                    .get("tunnels")
                    .and_then(|t| t.as_array())
                    .and_then(|tunnels| tunnels.first())
                    .and_then(|tunnel| tunnel.get("public_url"))
                    .and_then(|url| url.as_str())
                {
                    return Ok(url.to_string());
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Err(HeraldError::Server(
        "timed out waiting for ngrok public URL".into(),
    ))
}
