//! Helpers shared by engine and API tests.

use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use super::CommandError;
use super::EntityDescriptor;
use super::FromIntegrationSender;
use super::Integration;
use super::NumberRange;
use super::Platform;
use super::ToIntegrationMessage;

pub(crate) fn sensor_descriptor(entity_id: &str) -> EntityDescriptor {
    EntityDescriptor::new(
        Platform::Sensor,
        entity_id.to_string(),
        format!("fake.{}", entity_id),
        entity_id.to_string(),
    )
}

pub(crate) fn number_descriptor(entity_id: &str) -> EntityDescriptor {
    let mut descriptor = EntityDescriptor::new(
        Platform::Number,
        entity_id.to_string(),
        format!("fake.{}", entity_id),
        entity_id.to_string(),
    );
    descriptor.range = Some(NumberRange::new(50.0, 1000.0));
    descriptor
}

pub(crate) fn switch_descriptor(entity_id: &str) -> EntityDescriptor {
    EntityDescriptor::new(
        Platform::Switch,
        entity_id.to_string(),
        format!("fake.{}", entity_id),
        entity_id.to_string(),
    )
}

/// Integration that records what it is asked to do.
///
/// Number writes above 1000 are refused with a device error.
#[derive(Default)]
pub(crate) struct FakeIntegration {
    pub applied: Arc<Mutex<Vec<f64>>>,
    pub switched: Arc<Mutex<Vec<bool>>>,
    pub refreshes: Arc<AtomicUsize>,
    pub shut_down: Arc<AtomicBool>,
}

#[async_trait]
impl Integration for FakeIntegration {
    fn name(&self) -> &str {
        "fake"
    }

    async fn setup(&mut self, _tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::SetNumber { value, reply, .. } => {
                let result = if value > 1000.0 {
                    Err(CommandError::Device("refused".to_string()))
                } else {
                    self.applied.lock().unwrap().push(value);
                    Ok(())
                };
                let _ = reply.send(result);
            }
            ToIntegrationMessage::SetSwitch { on, reply, .. } => {
                self.switched.lock().unwrap().push(on);
                let _ = reply.send(Ok(()));
            }
            ToIntegrationMessage::Refresh => {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}
