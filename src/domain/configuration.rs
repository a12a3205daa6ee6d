//! Motor controller configuration record
//!
//! Fields hold the integer values exactly as they travel on the wire. Scaled
//! real values (x10, x1000, div25) are exposed through accessor methods so an
//! edit never loses precision between a read and the next write.

use serde::{Deserialize, Serialize};

/// Number of selectable assist levels
pub const ASSIST_LEVEL_COUNT: usize = 7;

/// Rows in each torque sensor calibration table
pub const TORQUE_CALIBRATION_ROWS: usize = 8;

/// One torque sensor calibration table: `[adc, weight]` pairs
pub type TorqueCalibrationTable = [[u16; 2]; TORQUE_CALIBRATION_ROWS];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub assist_level: u8,
    pub wheel_perimeter: u16,
    pub wheel_max_speed: u8,
    pub units_type: u8,
    pub wh_x10: u32,
    pub wh_x10_100_percent: u32,
    pub battery_soc_enable: u8,
    pub target_max_battery_power_div25: u8,
    pub battery_max_current: u8,
    pub motor_max_current: u8,
    pub motor_current_min_adc: u8,
    pub field_weakening: u8,
    pub ramp_up_amps_per_second_x10: u8,
    pub battery_low_voltage_cut_off_x10: u16,
    pub motor_type: u8,
    pub motor_current_control_mode: u8,
    pub motor_assistance_startup_without_pedal_rotation: u8,
    pub assist_level_factor: [u16; ASSIST_LEVEL_COUNT],
    pub number_of_assist_levels: u8,
    pub startup_motor_power_boost_feature_enabled: u8,
    pub startup_motor_power_boost_always: u8,
    pub startup_motor_power_boost_limit_power: u8,
    pub startup_motor_power_boost_factor: [u16; ASSIST_LEVEL_COUNT],
    pub startup_motor_power_boost_time_x10: u8,
    pub startup_motor_power_boost_fade_time_x10: u8,
    pub temperature_limit_feature_enabled: u8,
    pub motor_temperature_min_value_to_limit: u8,
    pub motor_temperature_max_value_to_limit: u8,
    pub coast_brake_enable: u8,
    pub coast_brake_adc: u8,
    pub battery_voltage_reset_wh_counter_x10: u16,
    pub system_power_off_time_minutes: u8,
    pub battery_pack_resistance_x1000: u16,
    pub odometer_x10: u32,
    pub walk_assist_feature_enabled: u8,
    pub walk_assist_level_factor: [u8; ASSIST_LEVEL_COUNT],
    pub torque_sensor_calibration_feature_enabled: u8,
    pub torque_sensor_calibration_pedal_ground: u8,
    pub torque_sensor_filter: u8,
    pub torque_sensor_adc_threshold: u8,
    pub torque_sensor_calibration_table_left: TorqueCalibrationTable,
    pub torque_sensor_calibration_table_right: TorqueCalibrationTable,
    pub street_mode_function_enabled: u8,
    pub street_mode_enabled: u8,
    pub street_mode_enabled_on_startup: u8,
    pub street_mode_speed_limit: u8,
    pub street_mode_power_limit_div25: u8,
    pub street_mode_throttle_enabled: u8,
    pub street_mode_hotkey_enabled: u8,
    pub pedal_cadence_fast_stop: u8,
    pub throttle_virtual_step: u8,
    pub ant_device_id: u8,
}

impl Default for Configuration {
    /// Firmware defaults used until the first successful read from the device
    fn default() -> Self {
        Self {
            assist_level: 0,
            wheel_perimeter: 750,
            wheel_max_speed: 50,
            units_type: 0,
            wh_x10: 0,
            wh_x10_100_percent: 0,
            battery_soc_enable: 0,
            target_max_battery_power_div25: 0,
            battery_max_current: 0,
            motor_max_current: 0,
            motor_current_min_adc: 0,
            field_weakening: 0,
            ramp_up_amps_per_second_x10: 0,
            battery_low_voltage_cut_off_x10: 0,
            motor_type: 0,
            motor_current_control_mode: 0,
            motor_assistance_startup_without_pedal_rotation: 0,
            assist_level_factor: [0; ASSIST_LEVEL_COUNT],
            number_of_assist_levels: 0,
            startup_motor_power_boost_feature_enabled: 0,
            startup_motor_power_boost_always: 0,
            startup_motor_power_boost_limit_power: 0,
            startup_motor_power_boost_factor: [0; ASSIST_LEVEL_COUNT],
            startup_motor_power_boost_time_x10: 0,
            startup_motor_power_boost_fade_time_x10: 0,
            temperature_limit_feature_enabled: 0,
            motor_temperature_min_value_to_limit: 0,
            motor_temperature_max_value_to_limit: 0,
            coast_brake_enable: 0,
            coast_brake_adc: 0,
            battery_voltage_reset_wh_counter_x10: 0,
            system_power_off_time_minutes: 0,
            battery_pack_resistance_x1000: 0,
            odometer_x10: 0,
            walk_assist_feature_enabled: 0,
            walk_assist_level_factor: [0; ASSIST_LEVEL_COUNT],
            torque_sensor_calibration_feature_enabled: 0,
            torque_sensor_calibration_pedal_ground: 0,
            torque_sensor_filter: 0,
            torque_sensor_adc_threshold: 0,
            torque_sensor_calibration_table_left: [[0; 2]; TORQUE_CALIBRATION_ROWS],
            torque_sensor_calibration_table_right: [[0; 2]; TORQUE_CALIBRATION_ROWS],
            street_mode_function_enabled: 0,
            street_mode_enabled: 0,
            street_mode_enabled_on_startup: 0,
            street_mode_speed_limit: 0,
            street_mode_power_limit_div25: 0,
            street_mode_throttle_enabled: 0,
            street_mode_hotkey_enabled: 0,
            pedal_cadence_fast_stop: 0,
            throttle_virtual_step: 0,
            ant_device_id: 0,
        }
    }
}

fn x10(raw: u32) -> f32 {
    raw as f32 / 10.0
}

// The firmware names these factors "div100" but the wire value is per-mille.
fn div1000(raw: u16) -> f32 {
    f32::from(raw) / 1000.0
}

impl Configuration {
    /// Energy counter in watt-hours
    pub fn wh(&self) -> f32 {
        x10(self.wh_x10)
    }

    /// Battery capacity in watt-hours at 100% state of charge
    pub fn wh_100_percent(&self) -> f32 {
        x10(self.wh_x10_100_percent)
    }

    pub fn ramp_up_amps_per_second(&self) -> f32 {
        x10(u32::from(self.ramp_up_amps_per_second_x10))
    }

    pub fn battery_low_voltage_cut_off(&self) -> f32 {
        x10(u32::from(self.battery_low_voltage_cut_off_x10))
    }

    pub fn battery_voltage_reset_wh_counter(&self) -> f32 {
        x10(u32::from(self.battery_voltage_reset_wh_counter_x10))
    }

    pub fn startup_motor_power_boost_time(&self) -> f32 {
        x10(u32::from(self.startup_motor_power_boost_time_x10))
    }

    pub fn startup_motor_power_boost_fade_time(&self) -> f32 {
        x10(u32::from(self.startup_motor_power_boost_fade_time_x10))
    }

    /// Odometer in the configured distance unit
    pub fn odometer(&self) -> f32 {
        x10(self.odometer_x10)
    }

    /// Battery pack resistance in ohms
    pub fn battery_pack_resistance(&self) -> f32 {
        f32::from(self.battery_pack_resistance_x1000) / 1000.0
    }

    pub fn target_max_battery_power(&self) -> u32 {
        u32::from(self.target_max_battery_power_div25) * 25
    }

    pub fn street_mode_power_limit(&self) -> u32 {
        u32::from(self.street_mode_power_limit_div25) * 25
    }

    pub fn assist_level_factor_div100(&self, level: usize) -> Option<f32> {
        self.assist_level_factor.get(level).copied().map(div1000)
    }

    pub fn startup_motor_power_boost_factor_div100(&self, level: usize) -> Option<f32> {
        self.startup_motor_power_boost_factor
            .get(level)
            .copied()
            .map(div1000)
    }

    /// Raw assist factor of the currently selected assist level
    pub fn current_assist_level_factor(&self) -> Option<u16> {
        self.assist_level_factor
            .get(usize::from(self.assist_level))
            .copied()
    }
}
