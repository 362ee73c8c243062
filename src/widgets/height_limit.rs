//! Height limit widget
//!
//! Shows the flight height limit in the preferred unit system and validates
//! new limits against the live range reported by the flight controller.

use super::keys;
use crate::action::ActionTicket;
use crate::catalog::EnumChoices;
use crate::error::CommandError;
use crate::processor::DataProcessor;
use crate::widget::{SetupContext, WidgetLogic, WidgetModel};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const FEET_PER_METER: f64 = 3.280_84;

/// Display unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl EnumChoices for UnitSystem {
    const CHOICES: &'static [(Self, &'static str)] =
        &[(UnitSystem::Metric, "Metric"), (UnitSystem::Imperial, "Imperial")];
}

impl UnitSystem {
    /// Render a length given in meters
    pub fn format_length(self, meters: i32) -> String {
        match self {
            UnitSystem::Metric => format!("{} m", meters),
            UnitSystem::Imperial => format!("{:.0} ft", meters as f64 * FEET_PER_METER),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeightLimitState {
    ProductDisconnected,
    Ready {
        limit: i32,
        min: i32,
        max: i32,
        unit: UnitSystem,
    },
}

impl fmt::Display for HeightLimitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeightLimitState::ProductDisconnected => write!(f, "N/A (disconnected)"),
            HeightLimitState::Ready {
                limit,
                min,
                max,
                unit,
            } => write!(
                f,
                "{} (range {} to {})",
                unit.format_length(*limit),
                unit.format_length(*min),
                unit.format_length(*max)
            ),
        }
    }
}

/// Rejected user input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeightLimitError {
    #[error("{value} m is outside {min}..={max} m")]
    OutOfRange { value: i32, min: i32, max: i32 },
}

pub struct HeightLimitWidget {
    limit: DataProcessor<i32>,
    min: DataProcessor<i32>,
    max: DataProcessor<i32>,
    unit: DataProcessor<UnitSystem>,
}

impl HeightLimitWidget {
    pub const DEFAULT_MIN: i32 = 20;
    pub const DEFAULT_MAX: i32 = 500;

    pub fn new() -> Self {
        Self {
            limit: DataProcessor::new(0),
            min: DataProcessor::new(Self::DEFAULT_MIN),
            max: DataProcessor::new(Self::DEFAULT_MAX),
            unit: DataProcessor::new(UnitSystem::Metric),
        }
    }

    /// Check a new limit against the live range
    pub fn validate(&self, meters: i32) -> Result<i32, HeightLimitError> {
        let (min, max) = (self.min.value(), self.max.value());
        if (min..=max).contains(&meters) {
            Ok(meters)
        } else {
            Err(HeightLimitError::OutOfRange {
                value: meters,
                min,
                max,
            })
        }
    }
}

impl Default for HeightLimitWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetLogic for HeightLimitWidget {
    type State = HeightLimitState;

    fn in_setup(&mut self, ctx: &mut SetupContext) {
        ctx.bind_processor(&keys::height_limit(), &self.limit);
        ctx.bind_processor(&keys::height_limit_min(), &self.min);
        ctx.bind_processor(&keys::height_limit_max(), &self.max);
        ctx.bind_processor(&keys::unit_system(), &self.unit);
    }

    fn derive(&self) -> HeightLimitState {
        HeightLimitState::Ready {
            limit: self.limit.value(),
            min: self.min.value(),
            max: self.max.value(),
            unit: self.unit.value(),
        }
    }

    fn disconnected(&self) -> HeightLimitState {
        HeightLimitState::ProductDisconnected
    }
}

impl WidgetModel<HeightLimitWidget> {
    pub fn validate(&self, meters: i32) -> Result<i32, HeightLimitError> {
        self.with_logic(|logic| logic.validate(meters))
    }

    /// Validate and write a new limit
    pub fn set_height_limit(&self, meters: i32) -> ActionTicket<()> {
        let key = keys::height_limit();
        match self.validate(meters) {
            Ok(meters) => self.store().set_value(&key, meters),
            Err(e) => ActionTicket::ready(
                key.id().clone(),
                Err(CommandError::InvalidValue {
                    key: key.id().clone(),
                    reason: e.to_string(),
                }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyedStore, StoreOptions};
    use crate::transport::MemoryTransport;
    use crate::widget::{Lifecycle, StateEmitter};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    async fn wait_for(model: &WidgetModel<HeightLimitWidget>, expected: HeightLimitState) {
        let mut states = model.state_stream();
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(state) = states.next().await {
                if state == expected {
                    return;
                }
            }
        })
        .await
        .expect("state not reached");
    }

    fn ready(limit: i32, min: i32, max: i32, unit: UnitSystem) -> HeightLimitState {
        HeightLimitState::Ready {
            limit,
            min,
            max,
            unit,
        }
    }

    #[test]
    fn test_format_length() {
        assert_eq!(UnitSystem::Metric.format_length(120), "120 m");
        assert_eq!(UnitSystem::Imperial.format_length(100), "328 ft");
    }

    #[test]
    fn test_validate_uses_defaults_before_values_arrive() {
        let widget = HeightLimitWidget::new();
        assert_eq!(widget.validate(120), Ok(120));
        assert_eq!(
            widget.validate(5),
            Err(HeightLimitError::OutOfRange {
                value: 5,
                min: 20,
                max: 500
            })
        );
    }

    #[tokio::test]
    async fn test_live_range_and_set() {
        let transport = Arc::new(MemoryTransport::new("sim"));
        transport.seed(keys::height_limit().id().clone(), json!(120));
        transport.seed(keys::height_limit_max().id().clone(), json!(300));
        let store = KeyedStore::spawn(transport.clone(), StoreOptions::default());

        let model = WidgetModel::new("height", store, HeightLimitWidget::new());
        model.setup();
        wait_for(&model, ready(120, 20, 300, UnitSystem::Metric)).await;

        assert!(matches!(
            model.set_height_limit(400).await,
            Err(CommandError::InvalidValue { .. })
        ));
        assert_eq!(transport.value(keys::height_limit().id()), Some(json!(120)));

        model.set_height_limit(250).await.unwrap();
        wait_for(&model, ready(250, 20, 300, UnitSystem::Metric)).await;

        transport.push(keys::unit_system().id(), json!("Imperial"));
        wait_for(&model, ready(250, 20, 300, UnitSystem::Imperial)).await;
        assert_eq!(model.current_state().to_string(), "820 ft (range 66 ft to 984 ft)");

        transport.disconnect();
        wait_for(&model, HeightLimitState::ProductDisconnected).await;
        assert_eq!(model.current_state().to_string(), "N/A (disconnected)");
    }
}
