//! Shared server state
//!
//! One value owns everything the handlers and pipeline tasks need:
//! configuration, the session registry, the phone bridge state and the
//! remote analyzer clients. Cloning is cheap (`Arc`s and reqwest handles).

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::clients::{AgentClient, PhoneStatusClient, VisionClient, XaiClient};
use crate::config::AppConfig;
use crate::phone::PhoneState;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<SessionRegistry>,
    pub phone: Arc<PhoneState>,
    pub phone_client: PhoneStatusClient,
    pub vision: VisionClient,
    pub xai: XaiClient,
    pub agent: AgentClient,
}

impl AppState {
    /// Build the full service state from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let vision = VisionClient::new(&config.vision_url, config.vision_timeout)
            .context("vision client")?;
        let xai = XaiClient::new(&config.xai_url, config.xai_enabled, config.xai_grid)
            .context("xai client")?;
        let agent =
            AgentClient::new(&config.agent_url, config.agent_timeout).context("agent client")?;
        let phone_client = PhoneStatusClient::new().context("phone client")?;
        let phone = Arc::new(PhoneState::new(config.phone_ip.clone()));

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            phone,
            phone_client,
            vision,
            xai,
            agent,
        })
    }
}
