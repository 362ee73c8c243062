//! Widget host
//!
//! Owns the widgets named in the configuration and keeps them in step with
//! it. A reload is applied as a diff so unchanged widgets keep their
//! bindings and subscribers.

use crate::action::ActionTicket;
use crate::config::{WidgetConfig, WidgetKind};
use crate::processor::ProcessorStream;
use crate::store::KeyedStore;
use crate::widget::{Lifecycle, LifecycleState, StateEmitter, WidgetModel};
use crate::widgets::{
    BatteryState, BatteryWidget, HeightLimitState, HeightLimitWidget, SdCardWidget, StorageState,
};
use anyhow::{bail, Result};
use std::fmt;
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

/// Rendered widget state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLine {
    pub text: String,
    pub connected: bool,
}

pub type StateLines = Pin<Box<dyn Stream<Item = StateLine> + Send>>;

fn lines<S>(stream: ProcessorStream<S>, disconnected: S) -> StateLines
where
    S: Clone + PartialEq + fmt::Display + Send + Sync + 'static,
{
    Box::pin(stream.map(move |state| StateLine {
        text: state.to_string(),
        connected: state != disconnected,
    }))
}

pub enum HostedWidget {
    HeightLimit(WidgetModel<HeightLimitWidget>),
    SdCard(WidgetModel<SdCardWidget>),
    Battery(WidgetModel<BatteryWidget>),
}

impl HostedWidget {
    /// Build an inactive widget for `config`
    pub fn build(config: &WidgetConfig, store: &KeyedStore) -> Self {
        let name = config.name.clone();
        let store = store.clone();
        match config.kind {
            WidgetKind::HeightLimit => {
                HostedWidget::HeightLimit(WidgetModel::new(name, store, HeightLimitWidget::new()))
            }
            WidgetKind::SdCard => {
                HostedWidget::SdCard(WidgetModel::new(name, store, SdCardWidget::new(config.index)))
            }
            WidgetKind::Battery => {
                HostedWidget::Battery(WidgetModel::new(name, store, BatteryWidget::new(config.index)))
            }
        }
    }

    pub fn kind(&self) -> WidgetKind {
        match self {
            HostedWidget::HeightLimit(_) => WidgetKind::HeightLimit,
            HostedWidget::SdCard(_) => WidgetKind::SdCard,
            HostedWidget::Battery(_) => WidgetKind::Battery,
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            HostedWidget::HeightLimit(_) => 0,
            HostedWidget::SdCard(model) => model.camera(),
            HostedWidget::Battery(model) => model.battery(),
        }
    }

    fn lifecycle(&self) -> &dyn Lifecycle {
        match self {
            HostedWidget::HeightLimit(model) => model,
            HostedWidget::SdCard(model) => model,
            HostedWidget::Battery(model) => model,
        }
    }

    pub fn setup(&self) {
        self.lifecycle().setup();
    }

    pub fn cleanup(&self) {
        self.lifecycle().cleanup();
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle().lifecycle()
    }

    pub fn current_line(&self) -> StateLine {
        let (text, connected) = match self {
            HostedWidget::HeightLimit(model) => {
                let state = model.current_state();
                (state.to_string(), state != HeightLimitState::ProductDisconnected)
            }
            HostedWidget::SdCard(model) => {
                let state = model.current_state();
                (state.to_string(), state != StorageState::ProductDisconnected)
            }
            HostedWidget::Battery(model) => {
                let state = model.current_state();
                (state.to_string(), state != BatteryState::ProductDisconnected)
            }
        };
        StateLine { text, connected }
    }

    /// Rendered states, current one first
    pub fn state_lines(&self) -> StateLines {
        match self {
            HostedWidget::HeightLimit(model) => {
                lines(model.state_stream(), HeightLimitState::ProductDisconnected)
            }
            HostedWidget::SdCard(model) => lines(model.state_stream(), StorageState::ProductDisconnected),
            HostedWidget::Battery(model) => lines(model.state_stream(), BatteryState::ProductDisconnected),
        }
    }

    /// Move an indexed widget to another instance
    ///
    /// Camera changes are persisted; the returned ticket tracks that write.
    pub fn select(&self, index: u32) -> Result<Option<ActionTicket<()>>> {
        match self {
            HostedWidget::HeightLimit(_) => bail!("height_limit widgets take no index"),
            HostedWidget::SdCard(model) => Ok(Some(model.select_camera(index))),
            HostedWidget::Battery(model) => {
                model.select_battery(index);
                Ok(None)
            }
        }
    }
}

/// Outcome of [`WidgetHost::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub restarted: Vec<String>,
}

impl HostDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.restarted.is_empty()
    }
}

impl fmt::Display for HostDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} removed, {} restarted",
            self.added.len(),
            self.removed.len(),
            self.restarted.len()
        )
    }
}

struct Entry {
    name: String,
    widget: HostedWidget,
}

/// Registry of configured widgets
pub struct WidgetHost {
    store: KeyedStore,
    entries: Vec<Entry>,
}

impl WidgetHost {
    pub fn new(store: KeyedStore) -> Self {
        Self {
            store,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&HostedWidget> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.widget)
    }

    /// Widgets in configuration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostedWidget)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.widget))
    }

    /// Bring the hosted widgets in line with `configs`
    ///
    /// New widgets are set up, missing ones cleaned up and index changes
    /// restart the existing model. A kind change counts as remove + add.
    pub fn apply(&mut self, configs: &[WidgetConfig]) -> HostDiff {
        let mut diff = HostDiff::default();
        let mut previous: Vec<Entry> = std::mem::take(&mut self.entries);

        for config in configs {
            let existing = previous
                .iter()
                .position(|entry| entry.name == config.name && entry.widget.kind() == config.kind)
                .map(|pos| previous.remove(pos));

            let entry = match existing {
                Some(entry) => {
                    if entry.widget.index() != config.index {
                        match entry.widget.select(config.index) {
                            Ok(ticket) => {
                                if let Some(ticket) = ticket {
                                    detach(&config.name, ticket);
                                }
                                diff.restarted.push(config.name.clone());
                            }
                            Err(e) => warn!(widget = %config.name, "Index change ignored: {:#}", e),
                        }
                    }
                    entry
                }
                None => {
                    let widget = HostedWidget::build(config, &self.store);
                    widget.setup();
                    diff.added.push(config.name.clone());
                    Entry {
                        name: config.name.clone(),
                        widget,
                    }
                }
            };
            self.entries.push(entry);
        }

        for entry in previous {
            entry.widget.cleanup();
            diff.removed.push(entry.name);
        }

        if !diff.is_empty() {
            info!(%diff, widgets = self.entries.len(), "Widgets updated");
        }
        diff
    }

    /// Select another instance for a hosted widget
    pub fn select(&self, name: &str, index: u32) -> Result<Option<ActionTicket<()>>> {
        match self.get(name) {
            Some(widget) => widget.select(index),
            None => bail!("no widget named '{}'", name),
        }
    }

    /// Clean up every widget
    pub fn shutdown(&mut self) {
        for entry in self.entries.drain(..) {
            entry.widget.cleanup();
        }
    }
}

fn detach(name: &str, ticket: ActionTicket<()>) {
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = ticket.await {
            warn!(widget = %name, "Selection not persisted: {}", e);
        }
    });
}
