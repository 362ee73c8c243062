//! SD card widget
//!
//! Follows one camera, selected by index. Changing the camera restarts the
//! model so the bindings move to the new sub-index.

use super::keys;
use crate::action::{ActionProgress, ActionTicket};
use crate::catalog::EnumChoices;
use crate::processor::DataProcessor;
use crate::widget::{SetupContext, WidgetLogic, WidgetModel};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Remaining space below which the card is reported as low (MB)
pub const LOW_SPACE_MB: i64 = 1024;

/// Card state as reported by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdCardState {
    Normal,
    NotInserted,
    Full,
    Formatting,
    Slow,
    Error,
}

impl EnumChoices for SdCardState {
    const CHOICES: &'static [(Self, &'static str)] = &[
        (SdCardState::Normal, "Normal"),
        (SdCardState::NotInserted, "NotInserted"),
        (SdCardState::Full, "Full"),
        (SdCardState::Formatting, "Formatting"),
        (SdCardState::Slow, "Slow"),
        (SdCardState::Error, "Error"),
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageState {
    ProductDisconnected,
    NoCard {
        camera: u32,
    },
    Formatting {
        camera: u32,
    },
    Fault {
        camera: u32,
        card: SdCardState,
    },
    Available {
        camera: u32,
        remaining_mb: i64,
        total_mb: i64,
        low: bool,
        recording: bool,
    },
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageState::ProductDisconnected => write!(f, "N/A (disconnected)"),
            StorageState::NoCard { camera } => write!(f, "camera {}: no card", camera),
            StorageState::Formatting { camera } => write!(f, "camera {}: formatting", camera),
            StorageState::Fault { camera, card } => {
                write!(f, "camera {}: card {}", camera, card.label())
            }
            StorageState::Available {
                camera,
                remaining_mb,
                total_mb,
                low,
                recording,
            } => {
                write!(f, "camera {}: {}/{} MB free", camera, remaining_mb, total_mb)?;
                if *low {
                    write!(f, " (low)")?;
                }
                if *recording {
                    write!(f, " [REC]")?;
                }
                Ok(())
            }
        }
    }
}

pub struct SdCardWidget {
    camera: u32,
    card: DataProcessor<SdCardState>,
    remaining: DataProcessor<i64>,
    total: DataProcessor<i64>,
    recording: DataProcessor<bool>,
}

impl SdCardWidget {
    pub fn new(camera: u32) -> Self {
        Self {
            camera,
            card: DataProcessor::new(SdCardState::NotInserted),
            remaining: DataProcessor::new(0),
            total: DataProcessor::new(0),
            recording: DataProcessor::new(false),
        }
    }

    pub fn camera(&self) -> u32 {
        self.camera
    }
}

impl WidgetLogic for SdCardWidget {
    type State = StorageState;

    fn in_setup(&mut self, ctx: &mut SetupContext) {
        let camera = self.camera;
        // Fresh processors so values of the previous camera never leak
        self.card = ctx.bind(&keys::sd_card_state(camera), SdCardState::NotInserted);
        self.remaining = ctx.bind(&keys::sd_card_remaining(camera), 0);
        self.total = ctx.bind(&keys::sd_card_total(camera), 0);
        self.recording = ctx.bind(&keys::is_recording(camera), false);
    }

    fn derive(&self) -> StorageState {
        let camera = self.camera;
        match self.card.value() {
            SdCardState::NotInserted => StorageState::NoCard { camera },
            SdCardState::Formatting => StorageState::Formatting { camera },
            card @ (SdCardState::Slow | SdCardState::Error) => StorageState::Fault { camera, card },
            card @ (SdCardState::Normal | SdCardState::Full) => {
                let remaining_mb = self.remaining.value();
                StorageState::Available {
                    camera,
                    remaining_mb,
                    total_mb: self.total.value(),
                    low: card == SdCardState::Full || remaining_mb < LOW_SPACE_MB,
                    recording: self.recording.value(),
                }
            }
        }
    }

    fn disconnected(&self) -> StorageState {
        StorageState::ProductDisconnected
    }
}

impl WidgetModel<SdCardWidget> {
    pub fn camera(&self) -> u32 {
        self.with_logic(|logic| logic.camera())
    }

    /// Follow another camera and remember the choice
    ///
    /// Returns the ticket of the preference write.
    pub fn select_camera(&self, camera: u32) -> ActionTicket<()> {
        if self.camera() != camera {
            info!(widget = %self.name(), camera, "Selecting camera");
            self.restart_with(|logic| logic.camera = camera);
        }
        self.store().set_value(&keys::last_camera_index(), camera)
    }

    /// Format the card of the selected camera
    pub fn format_card(&self) -> ActionProgress<bool> {
        let key = keys::format_sd_card(self.camera());
        self.store().perform_action_with_progress(&key, ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionEvent;
    use crate::store::{KeyedStore, StoreOptions};
    use crate::transport::memory::ActionScript;
    use crate::transport::MemoryTransport;
    use crate::widget::{Lifecycle, StateEmitter};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    async fn wait_for(model: &WidgetModel<SdCardWidget>, expected: StorageState) {
        let mut states = model.state_stream();
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(state) = states.next().await {
                if state == expected {
                    return;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {:?}, at {:?}", expected, model.current_state()));
    }

    fn seed_camera(transport: &MemoryTransport, camera: u32, state: &str, remaining: i64) {
        transport.seed(keys::sd_card_state(camera).id().clone(), json!(state));
        transport.seed(keys::sd_card_remaining(camera).id().clone(), json!(remaining));
        transport.seed(keys::sd_card_total(camera).id().clone(), json!(30500));
    }

    fn available(camera: u32, remaining_mb: i64, low: bool, recording: bool) -> StorageState {
        StorageState::Available {
            camera,
            remaining_mb,
            total_mb: 30500,
            low,
            recording,
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            available(1, 500, true, true).to_string(),
            "camera 1: 500/30500 MB free (low) [REC]"
        );
        assert_eq!(
            StorageState::Fault {
                camera: 0,
                card: SdCardState::Slow
            }
            .to_string(),
            "camera 0: card Slow"
        );
    }

    #[tokio::test]
    async fn test_card_states() {
        let transport = Arc::new(MemoryTransport::new("sim"));
        seed_camera(&transport, 0, "Normal", 28500);
        let store = KeyedStore::spawn(transport.clone(), StoreOptions::default());
        let model = WidgetModel::new("sd", store, SdCardWidget::new(0));
        model.setup();
        wait_for(&model, available(0, 28500, false, false)).await;

        transport.push(keys::is_recording(0).id(), json!(true));
        transport.push(keys::sd_card_remaining(0).id(), json!(800));
        wait_for(&model, available(0, 800, true, true)).await;

        transport.push(keys::sd_card_state(0).id(), json!("Error"));
        wait_for(
            &model,
            StorageState::Fault {
                camera: 0,
                card: SdCardState::Error,
            },
        )
        .await;

        transport.push(keys::sd_card_state(0).id(), json!("NotInserted"));
        wait_for(&model, StorageState::NoCard { camera: 0 }).await;
    }

    #[tokio::test]
    async fn test_select_camera_rebinds_and_persists() {
        let transport = Arc::new(MemoryTransport::new("sim"));
        seed_camera(&transport, 0, "Normal", 28500);
        seed_camera(&transport, 1, "Full", 0);
        transport.seed(keys::last_camera_index().id().clone(), json!(0));
        let store = KeyedStore::spawn(transport.clone(), StoreOptions::default());

        let model = WidgetModel::new("sd", store, SdCardWidget::new(0));
        model.setup();
        wait_for(&model, available(0, 28500, false, false)).await;
        let mut states = model.state_stream();
        assert_eq!(states.next().await, Some(available(0, 28500, false, false)));

        model.select_camera(1).await.unwrap();
        assert_eq!(model.camera(), 1);
        assert_eq!(transport.value(keys::last_camera_index().id()), Some(json!(1)));
        assert!(model.bound_keys().contains(keys::sd_card_state(1).id()));
        assert!(!model.bound_keys().contains(keys::sd_card_state(0).id()));
        model.store().stats().await.unwrap();
        assert_eq!(transport.unsubscribe_count(keys::sd_card_state(0).id()), 1);

        // Stream opened before the restart keeps flowing
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(state) = states.next().await {
                if state == available(1, 0, true, false) {
                    return;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_select_camera_shows_no_default_state() {
        let transport = Arc::new(MemoryTransport::new("sim"));
        seed_camera(&transport, 0, "Normal", 5000);
        seed_camera(&transport, 1, "Normal", 5000);
        let store = KeyedStore::spawn(transport.clone(), StoreOptions::default());

        let model = WidgetModel::new("sd", store, SdCardWidget::new(0));
        model.setup();
        wait_for(&model, available(0, 5000, false, false)).await;
        let mut states = model.state_stream();
        assert_eq!(states.next().await, Some(available(0, 5000, false, false)));

        model.select_camera(1).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(Some(state)) =
            tokio::time::timeout(Duration::from_millis(100), states.next()).await
        {
            seen.push(state);
        }
        assert_eq!(seen, vec![available(1, 5000, false, false)]);
    }

    #[tokio::test]
    async fn test_format_card_reports_progress() {
        let transport = Arc::new(MemoryTransport::new("sim"));
        seed_camera(&transport, 2, "Normal", 100);
        transport.register_action(
            keys::format_sd_card(2).id().clone(),
            ActionScript::with_progress(
                vec![json!(0.5), json!(1.0)],
                json!(true),
                Duration::from_millis(5),
            ),
        );
        let store = KeyedStore::spawn(transport.clone(), StoreOptions::default());
        let model = WidgetModel::new("sd", store, SdCardWidget::new(2));
        model.setup();

        let events: Vec<ActionEvent<bool>> = model.format_card().collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ActionEvent::Progress(json!(0.5)));
        assert_eq!(events[2], ActionEvent::Finished(Ok(true)));
    }
}
