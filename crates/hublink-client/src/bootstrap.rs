// One-call module bootstrap: construct, connect, await readiness, register.
use serde_json::json;

use crate::client::{ClientOptions, ConnectOptions, HubClient};
use crate::config::BrokerConfig;
use crate::error::Result;
use crate::signal::{self, SignalKind};

/// Default WebSocket path on the hub.
pub const DEFAULT_WS_PATH: &str = "/core";

/// Hub endpoint for [`init_module`].
#[derive(Debug, Clone)]
pub struct HubAddress {
    pub host: String,
    pub port: Option<u16>,
    pub tls: bool,
}

#[derive(Debug, Clone)]
pub struct InitModuleOptions {
    pub module_name: String,
    /// When set, registered with the hub so it can proxy this module's
    /// static assets.
    pub server_url: Option<String>,
    pub web_socket_url: String,
    pub hub: HubAddress,
    /// Defaults to the environment-derived configuration.
    pub config: Option<BrokerConfig>,
}

impl InitModuleOptions {
    pub fn new(module_name: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            module_name: module_name.into(),
            server_url: None,
            web_socket_url: DEFAULT_WS_PATH.to_string(),
            hub: HubAddress {
                host: host.into(),
                port,
                tls: false,
            },
            config: None,
        }
    }
}

/// Construct a client, connect it to the hub, await readiness, and register
/// the serving URL when one is given. Returns the ready client.
pub async fn init_module(options: InitModuleOptions) -> Result<HubClient> {
    let client = HubClient::new(ClientOptions {
        module_name: options.module_name.clone(),
        web_socket_url: options.web_socket_url.clone(),
        config: options.config.unwrap_or_else(BrokerConfig::from_env),
    });
    let mut signals = client.signals();
    client.connect(ConnectOptions {
        host: options.hub.host.clone(),
        port: options.hub.port,
        tls: options.hub.tls,
    })?;
    if !client.is_connected() {
        signal::wait_for_any(&mut signals, &[SignalKind::Connect], None).await?;
    }
    if let Some(server_url) = options.server_url {
        client
            .api("hub", "core")
            .call(
                "registerProxyURL",
                vec![json!({
                    "moduleName": options.module_name,
                    "serverURL": server_url,
                })],
            )
            .await?;
        tracing::debug!(module = %options.module_name, "proxy url registered with the hub");
    }
    Ok(client)
}
