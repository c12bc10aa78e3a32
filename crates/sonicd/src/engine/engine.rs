use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::entity::Platform;
use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::CommandError;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::EntityRecord;
use super::state::State;
use crate::engine::IntegrationContext;

/// sonicd engine
///
/// This structure handles the flow of events from integrations, routes commands to the
/// integration that owns an entity, and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, the event loop stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> integration name for routing commands
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Map of webhook_id -> integration name for routing callbacks
    webhook_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Fan-out of state changes to subscribers
    events: broadcast::Sender<Event>,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Capacity for the event broadcast; slow subscribers lag instead of blocking the engine
const EVENT_CHANNEL_SIZE: usize = 256;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            webhook_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            events,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every factory in the integration registry; each one returns an integration per
    /// configured instance.
    pub fn register_integrations_from_config(
        &mut self,
        cfg: &crate::config::Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integrations = match constr(&ctx) {
                Ok(integrations) => integrations,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
            };
            for integration in integrations {
                let name = integration.name().to_string();
                self.register_integration(name, integration);
            }
        }

        Ok(())
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Set a number entity, waiting for the owning integration to apply it
    pub async fn set_number(&self, entity_id: &str, value: f64) -> Result<(), CommandError> {
        self.ensure_platform(entity_id, Platform::Number, "set_value")?;
        let (reply, rx) = oneshot::channel();
        let integration = self.send_command(
            entity_id,
            ToIntegrationMessage::SetNumber {
                entity_id: entity_id.to_string(),
                value,
                reply,
            },
        )?;
        rx.await.map_err(|_| CommandError::Unavailable(integration))?
    }

    /// Turn a switch entity on or off, waiting for the owning integration to apply it
    pub async fn set_switch(&self, entity_id: &str, on: bool) -> Result<(), CommandError> {
        let command = if on { "turn_on" } else { "turn_off" };
        self.ensure_platform(entity_id, Platform::Switch, command)?;
        let (reply, rx) = oneshot::channel();
        let integration = self.send_command(
            entity_id,
            ToIntegrationMessage::SetSwitch {
                entity_id: entity_id.to_string(),
                on,
                reply,
            },
        )?;
        rx.await.map_err(|_| CommandError::Unavailable(integration))?
    }

    /// Ask the integration owning a webhook id to refresh its data
    pub fn trigger_webhook(&self, webhook_id: &str) -> Result<(), CommandError> {
        let integration = self
            .webhook_integration_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(webhook_id)
            .cloned()
            .ok_or_else(|| CommandError::UnknownWebhook(webhook_id.to_string()))?;

        debug!("Webhook {} triggers refresh of {}", webhook_id, integration);
        self.send_to_integration(&integration, ToIntegrationMessage::Refresh)
    }

    /// Send a command to the integration that owns `entity_id`
    ///
    /// Returns the name of the integration the command was routed to.
    fn send_command(
        &self,
        entity_id: &str,
        msg: ToIntegrationMessage,
    ) -> Result<String, CommandError> {
        let integration = self
            .entity_integration_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
            .ok_or_else(|| CommandError::UnknownEntity(entity_id.to_string()))?;

        self.send_to_integration(&integration, msg)?;
        Ok(integration)
    }

    fn send_to_integration(
        &self,
        integration: &str,
        msg: ToIntegrationMessage,
    ) -> Result<(), CommandError> {
        let channels = self
            .integration_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = channels
            .get(integration)
            .ok_or_else(|| CommandError::Unavailable(integration.to_string()))?;

        tx.send(msg)
            .map_err(|_| CommandError::Unavailable(integration.to_string()))
    }

    fn ensure_platform(
        &self,
        entity_id: &str,
        platform: Platform,
        command: &'static str,
    ) -> Result<(), CommandError> {
        let state = self.state.load();
        let record = state
            .entities
            .get(entity_id)
            .ok_or_else(|| CommandError::UnknownEntity(entity_id.to_string()))?;

        if record.descriptor.platform != platform {
            return Err(CommandError::Unsupported {
                entity_id: entity_id.to_string(),
                command,
            });
        }
        Ok(())
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Stop all integrations
    ///
    /// Dropping the command channels ends each integration's command loop, after which the
    /// integration's own shutdown runs.
    pub async fn shutdown(&self) {
        self.integration_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let handles = std::mem::take(
            &mut *self
                .integration_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Integration task ended abnormally: {}", e);
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Handle an event from an integration
    pub(crate) fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::DeviceDiscovered(device) => {
                info!("Device discovered: {} ({})", device.id, device.name);

                let device_id = device.id.clone();
                let mut state = State::clone(&self.state.load());
                let is_new = match state.devices.get_mut(&device_id) {
                    Some(existing) => {
                        existing.merge_from(device);
                        false
                    }
                    None => {
                        state.devices.insert(device_id.clone(), device);
                        true
                    }
                };
                self.state.store(Arc::new(state));

                if is_new {
                    let _ = self.events.send(Event::DeviceRegistered { device_id });
                }
            }
            FromIntegrationMessage::EntityDiscovered {
                descriptor,
                integration_name,
            } => {
                let entity_id = descriptor.entity_id.clone();
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                // Record which integration owns this entity for command routing.
                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(entity_id.clone(), integration_name.clone());

                let mut state = State::clone(&self.state.load());
                if let Some(device) = descriptor
                    .device_id
                    .as_ref()
                    .and_then(|id| state.devices.get_mut(id))
                {
                    device.add_entity(entity_id.clone());
                }

                // State is not populated until the first state-change message arrives.
                let previous = state.entities.remove(&entity_id);
                state.entities.insert(
                    entity_id,
                    EntityRecord {
                        descriptor,
                        integration: integration_name,
                        state: previous.as_ref().and_then(|r| r.state.clone()),
                        last_changed: previous.and_then(|r| r.last_changed),
                    },
                );
                self.state.store(Arc::new(state));
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.entities.remove(&entity_id);
                    for device in state.devices.values_mut() {
                        device.entity_ids.retain(|id| id != &entity_id);
                    }
                    self.state.store(Arc::new(state));
                }

                self.entity_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&entity_id);
            }
            FromIntegrationMessage::EntityStateChanged {
                entity_id,
                state: new_state,
            } => {
                let mut state = State::clone(&self.state.load());
                let Some(record) = state.entities.get_mut(&entity_id) else {
                    warn!("State change for unknown entity: {}", entity_id);
                    return;
                };

                if record.state.as_ref() == Some(&new_state) {
                    return;
                }

                debug!(
                    "Entity state changed: {} -> {:?} (available={})",
                    entity_id, new_state.value, new_state.available
                );
                let old_state = record.state.replace(new_state.clone());
                record.last_changed = Some(Utc::now());
                self.state.store(Arc::new(state));

                let _ = self.events.send(Event::EntityStateChanged {
                    entity_id,
                    old_state,
                    new_state,
                });
            }
            FromIntegrationMessage::WebhookRegistered {
                webhook_id,
                integration_name,
            } => {
                info!("Webhook registered for {}", integration_name);
                self.webhook_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(webhook_id, integration_name);
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
