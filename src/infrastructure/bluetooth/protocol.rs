//! TSDZ Controller Protocol
//!
//! GATT identifiers and the codec for the two fixed-size frames exchanged
//! with the motor controller. All multi-byte fields are little-endian.

use crate::domain::configuration::{Configuration, ASSIST_LEVEL_COUNT, TORQUE_CALIBRATION_ROWS};
use crate::domain::settings::LinkSettings;
use crate::domain::telemetry::{TelemetryControl, TelemetryReport};
use crate::infrastructure::bluetooth::error::{DecodeError, FrameKind};
#[cfg(debug_assertions)]
use tracing::trace;
use uuid::Uuid;

/// TSDZ wireless service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xdac21400_cfdd_462f_bfaf_7f6e4ccbb45f);

/// Periodic characteristic: telemetry reads, control writes
pub const PERIODIC_CHAR_UUID: Uuid = Uuid::from_u128(0xdac21401_cfdd_462f_bfaf_7f6e4ccbb45f);

/// Configuration characteristic: full configuration frame, read and write
pub const CONFIGURATION_CHAR_UUID: Uuid =
    Uuid::from_u128(0xdac21402_cfdd_462f_bfaf_7f6e4ccbb45f);

pub const CONFIGURATION_FRAME_SIZE: usize = 161;
pub const TELEMETRY_FRAME_SIZE: usize = 37;

/// Format tag carried in byte 0 of every configuration frame
pub const CONFIGURATION_VERSION: u8 = 0xA6;

/// A service/characteristic pair on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// The identifiers the session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service: Uuid,
    pub periodic: Uuid,
    pub configuration: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            periodic: PERIODIC_CHAR_UUID,
            configuration: CONFIGURATION_CHAR_UUID,
        }
    }
}

impl GattProfile {
    pub fn from_settings(settings: &LinkSettings) -> Result<Self, uuid::Error> {
        Ok(Self {
            service: Uuid::parse_str(&settings.service_uuid)?,
            periodic: Uuid::parse_str(&settings.periodic_char_uuid)?,
            configuration: Uuid::parse_str(&settings.configuration_char_uuid)?,
        })
    }

    pub fn periodic_target(&self) -> GattTarget {
        GattTarget {
            service: self.service,
            characteristic: self.periodic,
        }
    }

    pub fn configuration_target(&self) -> GattTarget {
        GattTarget {
            service: self.service,
            characteristic: self.configuration,
        }
    }
}

/// Byte offsets inside the configuration frame
pub mod config_offset {
    pub const VERSION: usize = 0;
    pub const ASSIST_LEVEL: usize = 1;
    pub const WHEEL_PERIMETER: usize = 2;
    pub const WHEEL_MAX_SPEED: usize = 4;
    pub const UNITS_TYPE: usize = 5;
    pub const WH_X10: usize = 6;
    pub const WH_X10_100_PERCENT: usize = 10;
    pub const BATTERY_SOC_ENABLE: usize = 14;
    pub const TARGET_MAX_BATTERY_POWER_DIV25: usize = 15;
    pub const BATTERY_MAX_CURRENT: usize = 16;
    pub const MOTOR_MAX_CURRENT: usize = 17;
    pub const MOTOR_CURRENT_MIN_ADC: usize = 18;
    pub const FIELD_WEAKENING: usize = 19;
    pub const RAMP_UP_AMPS_PER_SECOND_X10: usize = 20;
    pub const BATTERY_LOW_VOLTAGE_CUT_OFF_X10: usize = 21;
    pub const MOTOR_TYPE: usize = 23;
    pub const MOTOR_CURRENT_CONTROL_MODE: usize = 24;
    pub const MOTOR_ASSISTANCE_STARTUP_WITHOUT_PEDAL_ROTATION: usize = 25;
    /// Seven u16 factors, 26..=39
    pub const ASSIST_LEVEL_FACTOR: usize = 26;
    pub const NUMBER_OF_ASSIST_LEVELS: usize = 40;
    pub const STARTUP_BOOST_FEATURE_ENABLED: usize = 41;
    pub const STARTUP_BOOST_ALWAYS: usize = 42;
    pub const STARTUP_BOOST_LIMIT_POWER: usize = 43;
    /// First six u16 boost factors, 44..=55
    pub const STARTUP_BOOST_FACTOR: usize = 44;
    /// The seventh boost factor lives at the end of the frame
    pub const STARTUP_BOOST_FACTOR_LAST: usize = 159;
    pub const STARTUP_BOOST_TIME_X10: usize = 56;
    pub const STARTUP_BOOST_FADE_TIME_X10: usize = 57;
    pub const TEMPERATURE_LIMIT_FEATURE_ENABLED: usize = 58;
    pub const MOTOR_TEMPERATURE_MIN_VALUE_TO_LIMIT: usize = 59;
    pub const MOTOR_TEMPERATURE_MAX_VALUE_TO_LIMIT: usize = 60;
    pub const COAST_BRAKE_ENABLE: usize = 61;
    pub const COAST_BRAKE_ADC: usize = 62;
    pub const BATTERY_VOLTAGE_RESET_WH_COUNTER_X10: usize = 63;
    pub const SYSTEM_POWER_OFF_TIME_MINUTES: usize = 65;
    pub const BATTERY_PACK_RESISTANCE_X1000: usize = 66;
    pub const ODOMETER_X10: usize = 68;
    pub const WALK_ASSIST_FEATURE_ENABLED: usize = 72;
    /// Seven u8 factors, 73..=79
    pub const WALK_ASSIST_LEVEL_FACTOR: usize = 73;
    pub const TORQUE_CALIBRATION_FEATURE_ENABLED: usize = 80;
    pub const TORQUE_CALIBRATION_PEDAL_GROUND: usize = 81;
    pub const TORQUE_SENSOR_FILTER: usize = 82;
    pub const TORQUE_SENSOR_ADC_THRESHOLD: usize = 83;
    /// 8 rows of two u16, 84..=115
    pub const TORQUE_TABLE_LEFT: usize = 84;
    /// 8 rows of two u16, 116..=147
    pub const TORQUE_TABLE_RIGHT: usize = 116;
    pub const STREET_MODE_FUNCTION_ENABLED: usize = 148;
    pub const STREET_MODE_ENABLED: usize = 149;
    pub const STREET_MODE_ENABLED_ON_STARTUP: usize = 150;
    pub const STREET_MODE_SPEED_LIMIT: usize = 151;
    pub const STREET_MODE_POWER_LIMIT_DIV25: usize = 152;
    pub const STREET_MODE_THROTTLE_ENABLED: usize = 153;
    pub const STREET_MODE_HOTKEY_ENABLED: usize = 154;
    pub const PEDAL_CADENCE_FAST_STOP: usize = 155;
    pub const THROTTLE_VIRTUAL_STEP: usize = 156;
    /// Second copy of the street mode flag; the firmware reads this one last
    pub const STREET_MODE_ENABLED_MIRROR: usize = 157;
    pub const ANT_DEVICE_ID: usize = 158;
}

/// Byte offsets inside the periodic telemetry frame
///
/// ```text
/// [0-1]   : Battery voltage x10
/// [2]     : Battery current x5
/// [3-4]   : Wheel speed x10
/// [5]     : bit 0 braking, bit 1 light
/// [6-10]  : Hall sensors, PAS right, throttle ADC, motor temperature, throttle
/// [11-12] : Pedal torque sensor ADC
/// [13-16] : Pedal weight with offset, pedal weight, cadence, duty cycle
/// [17-18] : Motor speed ERPS
/// [19-21] : FOC angle, error state, motor current x5
/// [22-23] : Battery current ADC
/// [24]    : Assist level code
/// [25-26] : Human pedal power
/// [27]    : Battery SOC
/// [28-31] : Odometer (also read as watt-hours x10)
/// [32]    : Motor state
/// [33-34] : Motor power
/// [35-36] : Estimated battery resistance x1000
/// ```
pub mod telemetry_offset {
    pub const BATTERY_VOLTAGE_X10: usize = 0;
    pub const BATTERY_CURRENT_X5: usize = 2;
    pub const WHEEL_SPEED_X10: usize = 3;
    pub const FLAGS: usize = 5;
    pub const MOTOR_HALL_SENSORS: usize = 6;
    pub const PAS_PEDAL_RIGHT: usize = 7;
    pub const ADC_THROTTLE: usize = 8;
    pub const MOTOR_TEMPERATURE: usize = 9;
    pub const THROTTLE: usize = 10;
    pub const ADC_PEDAL_TORQUE_SENSOR: usize = 11;
    pub const PEDAL_WEIGHT_WITH_OFFSET: usize = 13;
    pub const PEDAL_WEIGHT: usize = 14;
    pub const PEDAL_CADENCE: usize = 15;
    pub const DUTY_CYCLE: usize = 16;
    pub const MOTOR_SPEED_ERPS: usize = 17;
    pub const FOC_ANGLE: usize = 19;
    pub const ERROR_STATE: usize = 20;
    pub const MOTOR_CURRENT_X5: usize = 21;
    pub const ADC_BATTERY_CURRENT: usize = 22;
    pub const ASSIST_LEVEL: usize = 24;
    pub const HUMAN_PEDAL_POWER: usize = 25;
    pub const BATTERY_SOC: usize = 27;
    pub const ODOMETER: usize = 28;
    pub const MOTOR_STATE: usize = 32;
    pub const MOTOR_POWER: usize = 33;
    pub const BATTERY_RESISTANCE_X1000: usize = 35;

    /// Outbound control frame
    pub const ASSIST_LEVEL_TARGET: usize = 0;
    pub const MOTOR_STATE_TARGET: usize = 1;

    pub const FLAG_BRAKING: u8 = 0b0000_0001;
    pub const FLAG_LIGHT: u8 = 0b0000_0010;
}

type ConfigurationFrame = [u8; CONFIGURATION_FRAME_SIZE];
type TelemetryFrame = [u8; TELEMETRY_FRAME_SIZE];

fn read_u16<const N: usize>(frame: &[u8; N], offset: usize) -> u16 {
    u16::from_le_bytes([frame[offset], frame[offset + 1]])
}

fn read_u32<const N: usize>(frame: &[u8; N], offset: usize) -> u32 {
    u32::from_le_bytes([
        frame[offset],
        frame[offset + 1],
        frame[offset + 2],
        frame[offset + 3],
    ])
}

fn write_u16<const N: usize>(frame: &mut [u8; N], offset: usize, value: u16) {
    frame[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32<const N: usize>(frame: &mut [u8; N], offset: usize, value: u32) {
    frame[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn assist_factor_offset(level: usize) -> usize {
    config_offset::ASSIST_LEVEL_FACTOR + level * 2
}

fn boost_factor_offset(level: usize) -> usize {
    if level == ASSIST_LEVEL_COUNT - 1 {
        config_offset::STARTUP_BOOST_FACTOR_LAST
    } else {
        config_offset::STARTUP_BOOST_FACTOR + level * 2
    }
}

fn torque_table_offset(base: usize, row: usize, column: usize) -> usize {
    base + (row * 2 + column) * 2
}

/// Decode a 161-byte configuration frame
pub fn decode_configuration(bytes: &[u8]) -> Result<Configuration, DecodeError> {
    let frame: &ConfigurationFrame =
        bytes
            .try_into()
            .map_err(|_| DecodeError::SizeMismatch {
                frame: FrameKind::Configuration,
                expected: CONFIGURATION_FRAME_SIZE,
                actual: bytes.len(),
            })?;

    let version = frame[config_offset::VERSION];
    if version != CONFIGURATION_VERSION {
        return Err(DecodeError::VersionMismatch {
            expected: CONFIGURATION_VERSION,
            actual: version,
        });
    }

    #[cfg(debug_assertions)]
    trace!("Raw configuration frame: {:02X?}", frame);

    use config_offset as o;

    let mut assist_level_factor = [0u16; ASSIST_LEVEL_COUNT];
    let mut startup_motor_power_boost_factor = [0u16; ASSIST_LEVEL_COUNT];
    let mut walk_assist_level_factor = [0u8; ASSIST_LEVEL_COUNT];
    for level in 0..ASSIST_LEVEL_COUNT {
        assist_level_factor[level] = read_u16(frame, assist_factor_offset(level));
        startup_motor_power_boost_factor[level] = read_u16(frame, boost_factor_offset(level));
        walk_assist_level_factor[level] = frame[o::WALK_ASSIST_LEVEL_FACTOR + level];
    }

    let mut left = [[0u16; 2]; TORQUE_CALIBRATION_ROWS];
    let mut right = [[0u16; 2]; TORQUE_CALIBRATION_ROWS];
    for row in 0..TORQUE_CALIBRATION_ROWS {
        for column in 0..2 {
            left[row][column] =
                read_u16(frame, torque_table_offset(o::TORQUE_TABLE_LEFT, row, column));
            right[row][column] =
                read_u16(frame, torque_table_offset(o::TORQUE_TABLE_RIGHT, row, column));
        }
    }

    Ok(Configuration {
        assist_level: frame[o::ASSIST_LEVEL],
        wheel_perimeter: read_u16(frame, o::WHEEL_PERIMETER),
        wheel_max_speed: frame[o::WHEEL_MAX_SPEED],
        units_type: frame[o::UNITS_TYPE],
        wh_x10: read_u32(frame, o::WH_X10),
        wh_x10_100_percent: read_u32(frame, o::WH_X10_100_PERCENT),
        battery_soc_enable: frame[o::BATTERY_SOC_ENABLE],
        target_max_battery_power_div25: frame[o::TARGET_MAX_BATTERY_POWER_DIV25],
        battery_max_current: frame[o::BATTERY_MAX_CURRENT],
        motor_max_current: frame[o::MOTOR_MAX_CURRENT],
        motor_current_min_adc: frame[o::MOTOR_CURRENT_MIN_ADC],
        field_weakening: frame[o::FIELD_WEAKENING],
        ramp_up_amps_per_second_x10: frame[o::RAMP_UP_AMPS_PER_SECOND_X10],
        battery_low_voltage_cut_off_x10: read_u16(frame, o::BATTERY_LOW_VOLTAGE_CUT_OFF_X10),
        motor_type: frame[o::MOTOR_TYPE],
        motor_current_control_mode: frame[o::MOTOR_CURRENT_CONTROL_MODE],
        motor_assistance_startup_without_pedal_rotation: frame
            [o::MOTOR_ASSISTANCE_STARTUP_WITHOUT_PEDAL_ROTATION],
        assist_level_factor,
        number_of_assist_levels: frame[o::NUMBER_OF_ASSIST_LEVELS],
        startup_motor_power_boost_feature_enabled: frame[o::STARTUP_BOOST_FEATURE_ENABLED],
        startup_motor_power_boost_always: frame[o::STARTUP_BOOST_ALWAYS],
        startup_motor_power_boost_limit_power: frame[o::STARTUP_BOOST_LIMIT_POWER],
        startup_motor_power_boost_factor,
        startup_motor_power_boost_time_x10: frame[o::STARTUP_BOOST_TIME_X10],
        startup_motor_power_boost_fade_time_x10: frame[o::STARTUP_BOOST_FADE_TIME_X10],
        temperature_limit_feature_enabled: frame[o::TEMPERATURE_LIMIT_FEATURE_ENABLED],
        motor_temperature_min_value_to_limit: frame[o::MOTOR_TEMPERATURE_MIN_VALUE_TO_LIMIT],
        motor_temperature_max_value_to_limit: frame[o::MOTOR_TEMPERATURE_MAX_VALUE_TO_LIMIT],
        coast_brake_enable: frame[o::COAST_BRAKE_ENABLE],
        coast_brake_adc: frame[o::COAST_BRAKE_ADC],
        battery_voltage_reset_wh_counter_x10: read_u16(
            frame,
            o::BATTERY_VOLTAGE_RESET_WH_COUNTER_X10,
        ),
        system_power_off_time_minutes: frame[o::SYSTEM_POWER_OFF_TIME_MINUTES],
        battery_pack_resistance_x1000: read_u16(frame, o::BATTERY_PACK_RESISTANCE_X1000),
        odometer_x10: read_u32(frame, o::ODOMETER_X10),
        walk_assist_feature_enabled: frame[o::WALK_ASSIST_FEATURE_ENABLED],
        walk_assist_level_factor,
        torque_sensor_calibration_feature_enabled: frame[o::TORQUE_CALIBRATION_FEATURE_ENABLED],
        torque_sensor_calibration_pedal_ground: frame[o::TORQUE_CALIBRATION_PEDAL_GROUND],
        torque_sensor_filter: frame[o::TORQUE_SENSOR_FILTER],
        torque_sensor_adc_threshold: frame[o::TORQUE_SENSOR_ADC_THRESHOLD],
        torque_sensor_calibration_table_left: left,
        torque_sensor_calibration_table_right: right,
        street_mode_function_enabled: frame[o::STREET_MODE_FUNCTION_ENABLED],
        // 149 and 157 both carry the flag; 157 wins
        street_mode_enabled: frame[o::STREET_MODE_ENABLED_MIRROR],
        street_mode_enabled_on_startup: frame[o::STREET_MODE_ENABLED_ON_STARTUP],
        street_mode_speed_limit: frame[o::STREET_MODE_SPEED_LIMIT],
        street_mode_power_limit_div25: frame[o::STREET_MODE_POWER_LIMIT_DIV25],
        street_mode_throttle_enabled: frame[o::STREET_MODE_THROTTLE_ENABLED],
        street_mode_hotkey_enabled: frame[o::STREET_MODE_HOTKEY_ENABLED],
        pedal_cadence_fast_stop: frame[o::PEDAL_CADENCE_FAST_STOP],
        throttle_virtual_step: frame[o::THROTTLE_VIRTUAL_STEP],
        ant_device_id: frame[o::ANT_DEVICE_ID],
    })
}

/// Encode a configuration into the 161-byte frame the controller expects
pub fn encode_configuration(cfg: &Configuration) -> [u8; CONFIGURATION_FRAME_SIZE] {
    use config_offset as o;

    let mut frame = [0u8; CONFIGURATION_FRAME_SIZE];
    frame[o::VERSION] = CONFIGURATION_VERSION;
    frame[o::ASSIST_LEVEL] = cfg.assist_level;
    write_u16(&mut frame, o::WHEEL_PERIMETER, cfg.wheel_perimeter);
    frame[o::WHEEL_MAX_SPEED] = cfg.wheel_max_speed;
    frame[o::UNITS_TYPE] = cfg.units_type;
    write_u32(&mut frame, o::WH_X10, cfg.wh_x10);
    write_u32(&mut frame, o::WH_X10_100_PERCENT, cfg.wh_x10_100_percent);
    frame[o::BATTERY_SOC_ENABLE] = cfg.battery_soc_enable;
    frame[o::TARGET_MAX_BATTERY_POWER_DIV25] = cfg.target_max_battery_power_div25;
    frame[o::BATTERY_MAX_CURRENT] = cfg.battery_max_current;
    frame[o::MOTOR_MAX_CURRENT] = cfg.motor_max_current;
    frame[o::MOTOR_CURRENT_MIN_ADC] = cfg.motor_current_min_adc;
    frame[o::FIELD_WEAKENING] = cfg.field_weakening;
    frame[o::RAMP_UP_AMPS_PER_SECOND_X10] = cfg.ramp_up_amps_per_second_x10;
    write_u16(
        &mut frame,
        o::BATTERY_LOW_VOLTAGE_CUT_OFF_X10,
        cfg.battery_low_voltage_cut_off_x10,
    );
    frame[o::MOTOR_TYPE] = cfg.motor_type;
    frame[o::MOTOR_CURRENT_CONTROL_MODE] = cfg.motor_current_control_mode;
    frame[o::MOTOR_ASSISTANCE_STARTUP_WITHOUT_PEDAL_ROTATION] =
        cfg.motor_assistance_startup_without_pedal_rotation;
    frame[o::NUMBER_OF_ASSIST_LEVELS] = cfg.number_of_assist_levels;
    frame[o::STARTUP_BOOST_FEATURE_ENABLED] = cfg.startup_motor_power_boost_feature_enabled;
    frame[o::STARTUP_BOOST_ALWAYS] = cfg.startup_motor_power_boost_always;
    frame[o::STARTUP_BOOST_LIMIT_POWER] = cfg.startup_motor_power_boost_limit_power;

    for level in 0..ASSIST_LEVEL_COUNT {
        write_u16(
            &mut frame,
            assist_factor_offset(level),
            cfg.assist_level_factor[level],
        );
        write_u16(
            &mut frame,
            boost_factor_offset(level),
            cfg.startup_motor_power_boost_factor[level],
        );
        frame[o::WALK_ASSIST_LEVEL_FACTOR + level] = cfg.walk_assist_level_factor[level];
    }

    frame[o::STARTUP_BOOST_TIME_X10] = cfg.startup_motor_power_boost_time_x10;
    frame[o::STARTUP_BOOST_FADE_TIME_X10] = cfg.startup_motor_power_boost_fade_time_x10;
    frame[o::TEMPERATURE_LIMIT_FEATURE_ENABLED] = cfg.temperature_limit_feature_enabled;
    frame[o::MOTOR_TEMPERATURE_MIN_VALUE_TO_LIMIT] = cfg.motor_temperature_min_value_to_limit;
    frame[o::MOTOR_TEMPERATURE_MAX_VALUE_TO_LIMIT] = cfg.motor_temperature_max_value_to_limit;
    frame[o::COAST_BRAKE_ENABLE] = cfg.coast_brake_enable;
    frame[o::COAST_BRAKE_ADC] = cfg.coast_brake_adc;
    write_u16(
        &mut frame,
        o::BATTERY_VOLTAGE_RESET_WH_COUNTER_X10,
        cfg.battery_voltage_reset_wh_counter_x10,
    );
    frame[o::SYSTEM_POWER_OFF_TIME_MINUTES] = cfg.system_power_off_time_minutes;
    write_u16(
        &mut frame,
        o::BATTERY_PACK_RESISTANCE_X1000,
        cfg.battery_pack_resistance_x1000,
    );
    write_u32(&mut frame, o::ODOMETER_X10, cfg.odometer_x10);
    frame[o::WALK_ASSIST_FEATURE_ENABLED] = cfg.walk_assist_feature_enabled;
    frame[o::TORQUE_CALIBRATION_FEATURE_ENABLED] = cfg.torque_sensor_calibration_feature_enabled;
    frame[o::TORQUE_CALIBRATION_PEDAL_GROUND] = cfg.torque_sensor_calibration_pedal_ground;
    frame[o::TORQUE_SENSOR_FILTER] = cfg.torque_sensor_filter;
    frame[o::TORQUE_SENSOR_ADC_THRESHOLD] = cfg.torque_sensor_adc_threshold;

    for row in 0..TORQUE_CALIBRATION_ROWS {
        for column in 0..2 {
            write_u16(
                &mut frame,
                torque_table_offset(o::TORQUE_TABLE_LEFT, row, column),
                cfg.torque_sensor_calibration_table_left[row][column],
            );
            write_u16(
                &mut frame,
                torque_table_offset(o::TORQUE_TABLE_RIGHT, row, column),
                cfg.torque_sensor_calibration_table_right[row][column],
            );
        }
    }

    frame[o::STREET_MODE_FUNCTION_ENABLED] = cfg.street_mode_function_enabled;
    frame[o::STREET_MODE_ENABLED] = cfg.street_mode_enabled;
    frame[o::STREET_MODE_ENABLED_ON_STARTUP] = cfg.street_mode_enabled_on_startup;
    frame[o::STREET_MODE_SPEED_LIMIT] = cfg.street_mode_speed_limit;
    frame[o::STREET_MODE_POWER_LIMIT_DIV25] = cfg.street_mode_power_limit_div25;
    frame[o::STREET_MODE_THROTTLE_ENABLED] = cfg.street_mode_throttle_enabled;
    frame[o::STREET_MODE_HOTKEY_ENABLED] = cfg.street_mode_hotkey_enabled;
    frame[o::PEDAL_CADENCE_FAST_STOP] = cfg.pedal_cadence_fast_stop;
    frame[o::THROTTLE_VIRTUAL_STEP] = cfg.throttle_virtual_step;
    frame[o::STREET_MODE_ENABLED_MIRROR] = cfg.street_mode_enabled;
    frame[o::ANT_DEVICE_ID] = cfg.ant_device_id;

    frame
}

/// Decode a 37-byte periodic telemetry frame
pub fn decode_telemetry(bytes: &[u8]) -> Result<TelemetryReport, DecodeError> {
    let frame: &TelemetryFrame = bytes
        .try_into()
        .map_err(|_| DecodeError::SizeMismatch {
            frame: FrameKind::Telemetry,
            expected: TELEMETRY_FRAME_SIZE,
            actual: bytes.len(),
        })?;

    #[cfg(debug_assertions)]
    trace!("Raw telemetry frame: {:02X?}", frame);

    use telemetry_offset as o;

    let flags = frame[o::FLAGS];
    let odometer = read_u32(frame, o::ODOMETER);

    Ok(TelemetryReport {
        battery_voltage: f32::from(read_u16(frame, o::BATTERY_VOLTAGE_X10)) / 10.0,
        battery_current: f32::from(frame[o::BATTERY_CURRENT_X5]) / 5.0,
        wheel_speed: f32::from(read_u16(frame, o::WHEEL_SPEED_X10)) / 10.0,
        braking: flags & o::FLAG_BRAKING != 0,
        light: flags & o::FLAG_LIGHT != 0,
        motor_hall_sensors: frame[o::MOTOR_HALL_SENSORS],
        pas_pedal_right: frame[o::PAS_PEDAL_RIGHT],
        adc_throttle: frame[o::ADC_THROTTLE],
        motor_temperature: frame[o::MOTOR_TEMPERATURE],
        throttle: frame[o::THROTTLE],
        adc_pedal_torque_sensor: read_u16(frame, o::ADC_PEDAL_TORQUE_SENSOR),
        pedal_weight_with_offset: frame[o::PEDAL_WEIGHT_WITH_OFFSET],
        pedal_weight: frame[o::PEDAL_WEIGHT],
        pedal_cadence: frame[o::PEDAL_CADENCE],
        duty_cycle: frame[o::DUTY_CYCLE],
        motor_speed_erps: read_u16(frame, o::MOTOR_SPEED_ERPS),
        foc_angle: frame[o::FOC_ANGLE],
        error_state: frame[o::ERROR_STATE],
        motor_current: f32::from(frame[o::MOTOR_CURRENT_X5]) / 5.0,
        adc_battery_current: read_u16(frame, o::ADC_BATTERY_CURRENT),
        assist_level: frame[o::ASSIST_LEVEL],
        human_pedal_power: read_u16(frame, o::HUMAN_PEDAL_POWER),
        battery_soc: frame[o::BATTERY_SOC],
        odometer,
        watts_hour: odometer as f32 / 10.0,
        motor_state: frame[o::MOTOR_STATE],
        motor_power: read_u16(frame, o::MOTOR_POWER),
        battery_resistance_estimated: f32::from(read_u16(frame, o::BATTERY_RESISTANCE_X1000))
            / 1000.0,
    })
}

/// Encode the outbound periodic frame. Only the two target bytes are
/// meaningful; the rest is zero so no stale report bytes go back out.
pub fn encode_telemetry_control(control: &TelemetryControl) -> [u8; TELEMETRY_FRAME_SIZE] {
    let mut frame = [0u8; TELEMETRY_FRAME_SIZE];
    frame[telemetry_offset::ASSIST_LEVEL_TARGET] = control.assist_level_target;
    frame[telemetry_offset::MOTOR_STATE_TARGET] = control.motor_state_target;
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn blank_configuration_frame() -> Vec<u8> {
        let mut frame = vec![0u8; CONFIGURATION_FRAME_SIZE];
        frame[0] = CONFIGURATION_VERSION;
        frame
    }

    #[test]
    fn test_configuration_size_rejection() {
        for len in [160, 162] {
            let mut frame = vec![0u8; len];
            frame[0] = CONFIGURATION_VERSION;
            assert_eq!(
                decode_configuration(&frame),
                Err(DecodeError::SizeMismatch {
                    frame: FrameKind::Configuration,
                    expected: 161,
                    actual: len,
                })
            );
        }
    }

    #[test]
    fn test_configuration_version_rejection() {
        let mut frame = blank_configuration_frame();
        frame[0] = 0xA5;
        assert_eq!(
            decode_configuration(&frame),
            Err(DecodeError::VersionMismatch {
                expected: 0xA6,
                actual: 0xA5,
            })
        );
    }

    #[test]
    fn test_wheel_perimeter_is_unscaled() {
        let mut frame = blank_configuration_frame();
        frame[2] = 0xE8;
        frame[3] = 0x03;
        let cfg = decode_configuration(&frame).unwrap();
        assert_eq!(cfg.wheel_perimeter, 1000);
    }

    #[test]
    fn test_multi_byte_fields_are_little_endian() {
        let mut frame = blank_configuration_frame();
        frame[6..10].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
        frame[21] = 0x86;
        frame[22] = 0x01;
        let cfg = decode_configuration(&frame).unwrap();
        assert_eq!(cfg.wh_x10, 0x1234_5678);
        assert_eq!(cfg.battery_low_voltage_cut_off_x10, 390);
        assert!(close(cfg.battery_low_voltage_cut_off(), 39.0));
    }

    #[test]
    fn test_seventh_boost_factor_lives_at_end_of_frame() {
        let cfg = Configuration {
            startup_motor_power_boost_factor: [1, 2, 3, 4, 5, 6, 0x0BB8],
            startup_motor_power_boost_time_x10: 0x11,
            startup_motor_power_boost_fade_time_x10: 0x22,
            ..Default::default()
        };
        let frame = encode_configuration(&cfg);

        assert_eq!(&frame[159..161], &[0xB8, 0x0B]);
        // 56-57 stay with the boost timings
        assert_eq!(frame[56], 0x11);
        assert_eq!(frame[57], 0x22);
        assert_eq!(&frame[54..56], &[6, 0]);

        let decoded = decode_configuration(&frame).unwrap();
        assert_eq!(decoded.startup_motor_power_boost_factor[6], 3000);
        assert!(close(
            decoded.startup_motor_power_boost_factor_div100(6).unwrap(),
            3.0
        ));
    }

    #[test]
    fn test_fifth_assist_factor_uses_contiguous_offsets() {
        let mut frame = blank_configuration_frame();
        frame[33] = 0x7F;
        frame[34] = 0x34;
        frame[35] = 0x12;
        let cfg = decode_configuration(&frame).unwrap();
        assert_eq!(cfg.assist_level_factor[4], 0x1234);
        assert_eq!(cfg.assist_level_factor[3], 0x7F00);

        let encoded = encode_configuration(&cfg);
        assert_eq!(&encoded[32..36], &[0x00, 0x7F, 0x34, 0x12]);
    }

    #[test]
    fn test_street_mode_flag_is_mirrored() {
        let mut frame = blank_configuration_frame();
        frame[149] = 0;
        frame[157] = 1;
        let cfg = decode_configuration(&frame).unwrap();
        assert_eq!(cfg.street_mode_enabled, 1);

        let encoded = encode_configuration(&cfg);
        assert_eq!(encoded[149], 1);
        assert_eq!(encoded[157], 1);
    }

    #[test]
    fn test_torque_tables_layout() {
        let mut cfg = Configuration::default();
        cfg.torque_sensor_calibration_table_left[0] = [0x0101, 0x0202];
        cfg.torque_sensor_calibration_table_left[7] = [0x0303, 0x0404];
        cfg.torque_sensor_calibration_table_right[0] = [0x0505, 0x0606];
        cfg.torque_sensor_calibration_table_right[7][1] = 0xBEEF;

        let frame = encode_configuration(&cfg);
        assert_eq!(&frame[84..88], &[0x01, 0x01, 0x02, 0x02]);
        assert_eq!(&frame[112..116], &[0x03, 0x03, 0x04, 0x04]);
        assert_eq!(&frame[116..120], &[0x05, 0x05, 0x06, 0x06]);
        assert_eq!(&frame[146..148], &[0xEF, 0xBE]);
    }

    #[test]
    fn test_configuration_round_trip() {
        let cfg = Configuration {
            assist_level: 3,
            wheel_perimeter: 2200,
            wh_x10_100_percent: 6_000,
            battery_max_current: 16,
            battery_pack_resistance_x1000: 180,
            odometer_x10: 0x00AB_CDEF,
            assist_level_factor: [500, 1000, 1500, 2000, 2500, 3000, 3500],
            startup_motor_power_boost_factor: [300, 250, 200, 150, 100, 80, 60],
            walk_assist_level_factor: [10, 20, 30, 40, 50, 60, 70],
            street_mode_enabled: 1,
            ant_device_id: 42,
            ..Default::default()
        };
        let frame = encode_configuration(&cfg);
        assert_eq!(frame[0], CONFIGURATION_VERSION);
        assert_eq!(decode_configuration(&frame).unwrap(), cfg);
    }

    fn telemetry_frame() -> Vec<u8> {
        vec![0u8; TELEMETRY_FRAME_SIZE]
    }

    #[test]
    fn test_telemetry_size_rejection() {
        for len in [36, 38] {
            assert_eq!(
                decode_telemetry(&vec![0u8; len]),
                Err(DecodeError::SizeMismatch {
                    frame: FrameKind::Telemetry,
                    expected: 37,
                    actual: len,
                })
            );
        }
    }

    #[test]
    fn test_battery_voltage_scaling() {
        let mut frame = telemetry_frame();
        frame[0..2].copy_from_slice(&480u16.to_le_bytes());
        let report = decode_telemetry(&frame).unwrap();
        assert!(close(report.battery_voltage, 48.0));
    }

    #[test]
    fn test_flag_packing() {
        let mut frame = telemetry_frame();
        frame[5] = 0b0000_0011;
        let report = decode_telemetry(&frame).unwrap();
        assert!(report.braking);
        assert!(report.light);

        frame[5] = 0b0000_0010;
        let report = decode_telemetry(&frame).unwrap();
        assert!(!report.braking);
        assert!(report.light);
    }

    #[test]
    fn test_telemetry_fields() {
        let mut frame = telemetry_frame();
        frame[2] = 50; // 10 A
        frame[3..5].copy_from_slice(&253u16.to_le_bytes());
        frame[9] = 41;
        frame[15] = 85;
        frame[21] = 35; // 7 A
        frame[24] = 4;
        frame[25..27].copy_from_slice(&180u16.to_le_bytes());
        frame[28..32].copy_from_slice(&123_456u32.to_le_bytes());
        frame[32] = 1;
        frame[33..35].copy_from_slice(&350u16.to_le_bytes());
        frame[35..37].copy_from_slice(&250u16.to_le_bytes());

        let report = decode_telemetry(&frame).unwrap();
        assert!(close(report.battery_current, 10.0));
        assert!(close(report.wheel_speed, 25.3));
        assert_eq!(report.motor_temperature, 41);
        assert_eq!(report.pedal_cadence, 85);
        assert!(close(report.motor_current, 7.0));
        assert_eq!(report.assist_level, 4);
        assert_eq!(report.human_pedal_power, 180);
        assert_eq!(report.odometer, 123_456);
        assert!(close(report.watts_hour, 12_345.6));
        assert_eq!(report.motor_state, 1);
        assert_eq!(report.motor_power, 350);
        assert!(close(report.battery_resistance_estimated, 0.25));
    }

    #[test]
    fn test_control_frame_is_zero_filled() {
        let frame = encode_telemetry_control(&TelemetryControl {
            assist_level_target: 5,
            motor_state_target: 1,
        });
        assert_eq!(frame.len(), TELEMETRY_FRAME_SIZE);
        assert_eq!(frame[0], 5);
        assert_eq!(frame[1], 1);
        assert!(frame[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_profile_from_default_settings() {
        let profile = GattProfile::from_settings(&LinkSettings::default()).unwrap();
        assert_eq!(profile, GattProfile::default());
        assert_eq!(profile.periodic_target().characteristic, PERIODIC_CHAR_UUID);
    }

    #[test]
    fn test_profile_rejects_bad_uuid() {
        let settings = LinkSettings {
            service_uuid: "not-a-uuid".to_string(),
            ..Default::default()
        };
        assert!(GattProfile::from_settings(&settings).is_err());
    }

    fn valid_configuration_frame() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), CONFIGURATION_FRAME_SIZE).prop_map(|mut frame| {
            frame[config_offset::VERSION] = CONFIGURATION_VERSION;
            frame[config_offset::STREET_MODE_ENABLED] =
                frame[config_offset::STREET_MODE_ENABLED_MIRROR];
            frame
        })
    }

    proptest! {
        // Every byte of the frame belongs to a field, so a consistent frame
        // must survive decode -> encode unchanged, and the decoded record must
        // survive encode -> decode unchanged.
        #[test]
        fn prop_configuration_round_trip(frame in valid_configuration_frame()) {
            let cfg = decode_configuration(&frame).unwrap();
            let encoded = encode_configuration(&cfg);
            prop_assert_eq!(&encoded[..], &frame[..]);
            prop_assert_eq!(decode_configuration(&encoded).unwrap(), cfg);
        }

        #[test]
        fn prop_telemetry_accepts_any_full_frame(frame in prop::collection::vec(any::<u8>(), TELEMETRY_FRAME_SIZE)) {
            let report = decode_telemetry(&frame).unwrap();
            prop_assert_eq!(report.braking, frame[5] & 1 == 1);
            prop_assert_eq!(report.light, frame[5] & 2 == 2);
        }
    }
}
