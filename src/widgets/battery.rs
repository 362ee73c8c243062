//! Battery widget
//!
//! Classifies the charge of one battery against the warning thresholds
//! configured on the flight controller.

use super::keys;
use crate::processor::DataProcessor;
use crate::widget::{SetupContext, WidgetLogic, WidgetModel};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatteryLevel {
    Normal,
    Low,
    Critical,
}

impl BatteryLevel {
    /// Classify `percent`; thresholds are inclusive
    pub fn classify(percent: i32, low: i32, critical: i32) -> Self {
        if percent <= critical {
            BatteryLevel::Critical
        } else if percent <= low {
            BatteryLevel::Low
        } else {
            BatteryLevel::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatteryState {
    ProductDisconnected,
    Reading {
        battery: u32,
        percent: i32,
        voltage: f64,
        level: BatteryLevel,
    },
}

impl fmt::Display for BatteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryState::ProductDisconnected => write!(f, "N/A (disconnected)"),
            BatteryState::Reading {
                battery,
                percent,
                voltage,
                level,
            } => write!(
                f,
                "battery {}: {}% {:.1} V {:?}",
                battery, percent, voltage, level
            ),
        }
    }
}

pub struct BatteryWidget {
    battery: u32,
    charge: DataProcessor<i32>,
    voltage: DataProcessor<f64>,
    low: DataProcessor<i32>,
    critical: DataProcessor<i32>,
}

impl BatteryWidget {
    pub const DEFAULT_LOW: i32 = 30;
    pub const DEFAULT_CRITICAL: i32 = 15;

    pub fn new(battery: u32) -> Self {
        Self {
            battery,
            charge: DataProcessor::new(100),
            voltage: DataProcessor::new(0.0),
            low: DataProcessor::new(Self::DEFAULT_LOW),
            critical: DataProcessor::new(Self::DEFAULT_CRITICAL),
        }
    }

    pub fn battery(&self) -> u32 {
        self.battery
    }
}

impl WidgetLogic for BatteryWidget {
    type State = BatteryState;

    fn in_setup(&mut self, ctx: &mut SetupContext) {
        self.charge = ctx.bind(&keys::battery_charge(self.battery), 100);
        self.voltage = ctx.bind(&keys::battery_voltage(self.battery), 0.0);
        ctx.bind_processor(&keys::low_battery_threshold(), &self.low);
        ctx.bind_processor(&keys::critical_battery_threshold(), &self.critical);
    }

    fn derive(&self) -> BatteryState {
        let percent = self.charge.value();
        BatteryState::Reading {
            battery: self.battery,
            percent,
            voltage: self.voltage.value(),
            level: BatteryLevel::classify(percent, self.low.value(), self.critical.value()),
        }
    }

    fn disconnected(&self) -> BatteryState {
        BatteryState::ProductDisconnected
    }
}

impl WidgetModel<BatteryWidget> {
    pub fn battery(&self) -> u32 {
        self.with_logic(|logic| logic.battery())
    }

    /// Follow another battery
    pub fn select_battery(&self, battery: u32) {
        if self.battery() != battery {
            self.restart_with(|logic| logic.battery = battery);
        }
    }
}
