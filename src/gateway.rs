//! Gateway: wires the transport, session manager, dispatcher, playback
//! scheduler and HTTP API together and runs them until shutdown.

use crate::api::{self, ApiState};
use crate::commands::Dispatcher;
use crate::playback::PlaybackScheduler;
use crate::session::{SessionManager, SessionStreams};
use melodia_core::{
    config::Config,
    traits::{Ledger, Transport},
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The running bot.
pub struct Gateway {
    config: Config,
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn Ledger>,
    playback: Arc<PlaybackScheduler>,
    session: Arc<SessionManager>,
    streams: Option<SessionStreams>,
}

impl Gateway {
    pub fn new(config: Config, transport: Arc<dyn Transport>, ledger: Arc<dyn Ledger>) -> Self {
        let playback = Arc::new(PlaybackScheduler::new(
            transport.clone(),
            ledger.clone(),
            config.playback.clone(),
        ));
        let (session, streams) = SessionManager::new(
            transport.clone(),
            ledger.clone(),
            playback.clone(),
            config.session.clone(),
        );
        Self {
            config,
            transport,
            ledger,
            playback,
            session,
            streams: Some(streams),
        }
    }

    pub fn api_state(&self) -> ApiState {
        let api_key = if self.config.api.api_key.is_empty() {
            None
        } else {
            Some(self.config.api.api_key.clone())
        };
        ApiState {
            session: self.session.clone(),
            playback: self.playback.clone(),
            ledger: self.ledger.clone(),
            transport: self.transport.clone(),
            api_key,
            request_limit: self.config.ledger.request_limit,
        }
    }

    /// Spawn the transport event loop and the dispatcher. Only the first call
    /// spawns anything.
    pub fn spawn_loops(&mut self) -> Vec<JoinHandle<()>> {
        let Some(streams) = self.streams.take() else {
            return Vec::new();
        };
        let events = tokio::spawn(self.session.clone().run_events(streams.events));

        let dispatcher = Dispatcher::new(
            &self.config.commands,
            self.transport.clone(),
            self.ledger.clone(),
            self.playback.clone(),
            self.session.subscribe(),
        );
        let dispatch = tokio::spawn(dispatcher.run(streams.inbound));
        vec![events, dispatch]
    }

    /// Run until Ctrl-C.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "{} running | transport: {} | api: {}",
            self.config.bot.name,
            self.transport.name(),
            if self.config.api.enabled {
                format!("{}:{}", self.config.api.host, self.config.api.port)
            } else {
                "disabled".to_string()
            },
        );

        let mut handles = self.spawn_loops();

        if self.config.api.enabled {
            let api_cfg = self.config.api.clone();
            let state = self.api_state();
            handles.push(tokio::spawn(async move {
                api::serve(api_cfg, state).await;
            }));
        }

        // A failed first connect is not fatal; the API can retry it.
        if let Err(e) = self.session.connect().await {
            warn!("initial connect failed: {e}");
        }

        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");
        self.shutdown(&handles).await;
        Ok(())
    }

    /// Stop loops and jobs, then drop the transport instance. Credentials stay.
    async fn shutdown(&self, handles: &[JoinHandle<()>]) {
        info!("Shutting down...");
        for handle in handles {
            handle.abort();
        }
        self.playback.cancel_all();
        if let Err(e) = self.transport.terminate().await {
            warn!("transport terminate failed: {e}");
        }
    }
}
