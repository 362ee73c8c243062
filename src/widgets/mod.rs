//! Concrete widget logics
//!
//! Each widget binds a handful of keys and derives a tagged state whose first
//! variant is `ProductDisconnected`. Widget-specific commands live in
//! `impl WidgetModel<...>` blocks next to the logic.

pub mod battery;
pub mod height_limit;
pub mod sd_card;

pub use battery::{BatteryLevel, BatteryState, BatteryWidget};
pub use height_limit::{HeightLimitError, HeightLimitState, HeightLimitWidget, UnitSystem};
pub use sd_card::{SdCardState, SdCardWidget, StorageState};

/// Typed keys used by the widgets
pub mod keys {
    use super::{SdCardState, UnitSystem};
    use crate::key::{domain, Key};

    pub fn height_limit() -> Key<i32> {
        Key::new(domain::FLIGHT_CONTROLLER, "HeightLimit")
    }

    pub fn height_limit_min() -> Key<i32> {
        Key::new(domain::FLIGHT_CONTROLLER, "HeightLimitRangeMin")
    }

    pub fn height_limit_max() -> Key<i32> {
        Key::new(domain::FLIGHT_CONTROLLER, "HeightLimitRangeMax")
    }

    pub fn low_battery_threshold() -> Key<i32> {
        Key::new(domain::FLIGHT_CONTROLLER, "LowBatteryWarningThreshold")
    }

    pub fn critical_battery_threshold() -> Key<i32> {
        Key::new(domain::FLIGHT_CONTROLLER, "SeriousLowBatteryWarningThreshold")
    }

    pub fn altitude() -> Key<f64> {
        Key::new(domain::FLIGHT_CONTROLLER, "Altitude")
    }

    pub fn sd_card_state(camera: u32) -> Key<SdCardState> {
        Key::indexed(domain::CAMERA, "SDCardState", camera)
    }

    pub fn sd_card_remaining(camera: u32) -> Key<i64> {
        Key::indexed(domain::CAMERA, "SDCardRemainingSpace", camera)
    }

    pub fn sd_card_total(camera: u32) -> Key<i64> {
        Key::indexed(domain::CAMERA, "SDCardTotalSpace", camera)
    }

    pub fn is_recording(camera: u32) -> Key<bool> {
        Key::indexed(domain::CAMERA, "IsRecording", camera)
    }

    /// Action; resolves to whether the card was erased
    pub fn format_sd_card(camera: u32) -> Key<bool> {
        Key::indexed(domain::CAMERA, "FormatSDCard", camera)
    }

    pub fn battery_charge(battery: u32) -> Key<i32> {
        Key::indexed(domain::BATTERY, "ChargeRemaining", battery)
    }

    pub fn battery_voltage(battery: u32) -> Key<f64> {
        Key::indexed(domain::BATTERY, "Voltage", battery)
    }

    pub fn unit_system() -> Key<UnitSystem> {
        Key::new(domain::PREFERENCES, "UnitSystem")
    }

    pub fn last_camera_index() -> Key<u32> {
        Key::new(domain::PREFERENCES, "LastCameraIndex")
    }
}
