use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::ClientError;
use super::client::DeviceClient;
use super::client::HttpDeviceClient;
use super::coordinator::Coordinator;
use super::coordinator::PollResult;
use super::coordinator::Snapshot;
use super::entity::DeviceContext;
use super::entity::EntityError;
use super::entity::EntitySet;
use super::switch::AutoShutOffSwitch;
use super::WatergateConfig;
use crate::engine::CommandError;
use crate::engine::Device;
use crate::engine::Entity;
use crate::engine::EntityState;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

/// Shared entity registry, locked by the fan-out task and by command handling
type SharedEntities = Arc<Mutex<EntitySet>>;

/// Watergate integration for sonicd
///
/// Polls one Sonic valve and exposes its readings and auto shut-off controls as entities.
pub struct WatergateIntegration {
    name: String,
    ctx: DeviceContext,
    config: WatergateConfig,
    coordinator: Arc<Coordinator>,
    entities: SharedEntities,
    refresh_requests: Arc<Notify>,
    to_engine: Option<FromIntegrationSender>,
    /// Handle to the polling loop
    poll_task: Option<JoinHandle<()>>,
    /// Handle to the task fanning poll results out to entities
    update_task: Option<JoinHandle<()>>,
}

impl WatergateIntegration {
    /// Create an integration talking to the valve configured under `entry`
    pub fn new(entry: &str, config: &WatergateConfig) -> Result<Self, ClientError> {
        let client = HttpDeviceClient::new(&config.address, config.request_timeout())?;
        Ok(Self::with_client(entry, config, Arc::new(client)))
    }

    pub fn with_client(
        entry: &str,
        config: &WatergateConfig,
        client: Arc<dyn DeviceClient>,
    ) -> Self {
        let name = format!("watergate.{}", entry);
        let ctx = DeviceContext::new(entry);
        let coordinator = Arc::new(Coordinator::new(
            name.clone(),
            client,
            config.poll_interval(),
        ));
        let entities = Arc::new(Mutex::new(EntitySet::build(&ctx)));
        Self {
            name,
            ctx,
            config: config.clone(),
            coordinator,
            entities,
            refresh_requests: Arc::new(Notify::new()),
            to_engine: None,
            poll_task: None,
            update_task: None,
        }
    }

    /// Device registry entry, with firmware details once the valve has reported them
    fn device(ctx: &DeviceContext, data: Option<&Snapshot>) -> Device {
        let mut device = Device::new(ctx.device_id.clone(), format!("Sonic {}", ctx.entry));
        device.identifiers = vec![("watergate".to_string(), ctx.entry.clone())];
        device.manufacturer = Some("Watergate".to_string());
        device.model = Some("Sonic".to_string());
        if let Some(state) = data.and_then(|data| data.state.as_ref()) {
            device.sw_version = state.firmware_version.clone();
            device.serial_number = state.serial_number.clone();
        }
        device
    }

    /// Fan poll results out to entities in a background task
    ///
    /// Runs once per published result and reports the entities whose state changed.
    async fn process_updates_task(
        coordinator: Arc<Coordinator>,
        entities: SharedEntities,
        ctx: DeviceContext,
        mut results: watch::Receiver<PollResult>,
        to_engine: FromIntegrationSender,
    ) {
        let mut device_details_reported = false;

        while results.changed().await.is_ok() {
            let success = results.borrow_and_update().last_update_success;

            let changed = {
                let mut entities = entities.lock().await;
                entities.handle_coordinator_update(&coordinator)
            };

            if success && !device_details_reported {
                if let Some(data) = coordinator.data().filter(|data| data.state.is_some()) {
                    let device = Self::device(&ctx, Some(&*data));
                    Self::send_static(
                        FromIntegrationMessage::DeviceDiscovered(device),
                        &to_engine,
                    )
                    .await;
                    device_details_reported = true;
                }
            }

            for (entity_id, state) in changed {
                debug!("Entity {} updated: {:?}", entity_id, state.value);
                Self::report_state_static(entity_id, state, &to_engine).await;
            }
        }
    }

    /// Send a message to the engine, logging failures (static version)
    async fn send_static(msg: FromIntegrationMessage, to_engine: &FromIntegrationSender) {
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send message to engine: {}", e);
        }
    }

    /// Report a state change to the engine (static version)
    async fn report_state_static(
        entity_id: String,
        state: EntityState,
        to_engine: &FromIntegrationSender,
    ) {
        let msg = FromIntegrationMessage::EntityStateChanged { entity_id, state };
        if let Err(e) = to_engine.send(msg).await {
            warn!("Failed to send EntityStateChanged message: {}", e);
        }
    }

    async fn report_state(&self, entity_id: &str, state: EntityState) {
        match &self.to_engine {
            Some(to_engine) => {
                Self::report_state_static(entity_id.to_string(), state, to_engine).await
            }
            None => warn!("{}: not set up, dropping state of {}", self.name, entity_id),
        }
    }

    /// Write a threshold to the valve and show it immediately
    ///
    /// The entity lock is not held while the device is being patched.
    async fn set_number(&self, entity_id: &str, value: f64) -> Result<(), EntityError> {
        let (value, patch) = {
            let mut entities = self.entities.lock().await;
            entities.number_mut(entity_id)?.prepare(value)?
        };

        self.coordinator.client().patch_auto_shut_off(&patch).await?;

        let state = {
            let mut entities = self.entities.lock().await;
            let number = entities.number_mut(entity_id)?;
            number.apply_optimistic(value);
            number.state()
        };
        info!("{}: set {} to {}", self.name, entity_id, value);
        self.report_state(entity_id, state).await;
        Ok(())
    }

    /// Enable or disable auto shut-off and show the new state immediately
    async fn set_switch(&self, entity_id: &str, on: bool) -> Result<(), EntityError> {
        // Resolve the entity first so unknown ids never reach the device.
        self.entities.lock().await.switch_mut(entity_id)?;

        self.coordinator
            .client()
            .patch_auto_shut_off(&AutoShutOffSwitch::patch_for(on))
            .await?;

        let state = {
            let mut entities = self.entities.lock().await;
            let switch = entities.switch_mut(entity_id)?;
            switch.apply_optimistic(on);
            switch.state()
        };
        info!("{}: turned {} {}", self.name, entity_id, if on { "on" } else { "off" });
        self.report_state(entity_id, state).await;
        Ok(())
    }
}

#[async_trait]
impl Integration for WatergateIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        // Store sender for sending events to engine
        self.to_engine = Some(tx.clone());

        info!("{}: setting up valve at {}", self.name, self.config.address);
        Self::send_static(
            FromIntegrationMessage::DeviceDiscovered(Self::device(&self.ctx, None)),
            &tx,
        )
        .await;

        {
            let entities = self.entities.lock().await;
            for entity in entities.iter() {
                Self::send_static(
                    FromIntegrationMessage::EntityDiscovered {
                        descriptor: entity.descriptor().clone(),
                        integration_name: self.name.clone(),
                    },
                    &tx,
                )
                .await;
                Self::report_state_static(entity.entity_id().to_string(), entity.state(), &tx)
                    .await;
            }
            info!("{}: registered {} entities", self.name, entities.len());
        }

        if let Some(webhook_id) = &self.config.webhook_id {
            Self::send_static(
                FromIntegrationMessage::WebhookRegistered {
                    webhook_id: webhook_id.clone(),
                    integration_name: self.name.clone(),
                },
                &tx,
            )
            .await;
        }

        // Subscribe before the first cycle so its result reaches the entities.
        let results = self.coordinator.subscribe();
        if let Err(e) = self.coordinator.refresh().await {
            warn!(
                "{}: first refresh failed, entities stay unavailable until the valve answers: {}",
                self.name, e
            );
        }

        let coordinator = self.coordinator.clone();
        let entities = self.entities.clone();
        let ctx = self.ctx.clone();
        self.update_task = Some(tokio::spawn(async move {
            Self::process_updates_task(coordinator, entities, ctx, results, tx).await;
        }));

        let coordinator = self.coordinator.clone();
        let refresh_requests = self.refresh_requests.clone();
        self.poll_task = Some(tokio::spawn(async move {
            coordinator.run(refresh_requests).await;
        }));

        info!(
            "{}: polling every {}s",
            self.name, self.config.poll_interval_secs
        );
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::SetNumber {
                entity_id,
                value,
                reply,
            } => {
                let result = self.set_number(&entity_id, value).await;
                if let Err(e) = &result {
                    warn!("{}: failed to set {}: {}", self.name, entity_id, e);
                }
                let _ = reply.send(result.map_err(CommandError::from));
            }
            ToIntegrationMessage::SetSwitch {
                entity_id,
                on,
                reply,
            } => {
                let result = self.set_switch(&entity_id, on).await;
                if let Err(e) = &result {
                    warn!("{}: failed to switch {}: {}", self.name, entity_id, e);
                }
                let _ = reply.send(result.map_err(CommandError::from));
            }
            ToIntegrationMessage::Refresh => {
                debug!("{}: refresh requested", self.name);
                self.refresh_requests.notify_one();
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("{}: shutting down", self.name);
        for task in [self.poll_task.take(), self.update_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        Ok(())
    }
}
