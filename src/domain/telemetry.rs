//! Periodic telemetry exchanged with the motor controller
//!
//! The periodic characteristic is asymmetric: the controller reports a full
//! operating state ([`TelemetryReport`]) but only accepts two target values
//! back ([`TelemetryControl`]).

use serde::{Deserialize, Serialize};

/// Decoded periodic frame (controller → client)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    /// Volts
    pub battery_voltage: f32,
    /// Amps
    pub battery_current: f32,
    /// km/h
    pub wheel_speed: f32,
    pub braking: bool,
    pub light: bool,
    pub motor_hall_sensors: u8,
    pub pas_pedal_right: u8,
    pub adc_throttle: u8,
    /// Degrees Celsius
    pub motor_temperature: u8,
    pub throttle: u8,
    pub adc_pedal_torque_sensor: u16,
    pub pedal_weight_with_offset: u8,
    pub pedal_weight: u8,
    /// RPM
    pub pedal_cadence: u8,
    pub duty_cycle: u8,
    pub motor_speed_erps: u16,
    pub foc_angle: u8,
    pub error_state: u8,
    /// Amps
    pub motor_current: f32,
    pub adc_battery_current: u16,
    pub assist_level: u8,
    /// Watts
    pub human_pedal_power: u16,
    /// Percent
    pub battery_soc: u8,
    pub odometer: u32,
    pub watts_hour: f32,
    pub motor_state: u8,
    /// Watts
    pub motor_power: u16,
    /// Ohms
    pub battery_resistance_estimated: f32,
}

impl TelemetryReport {
    pub fn motor_state(&self) -> MotorState {
        MotorState::from_code(self.motor_state)
    }

    pub fn assist(&self) -> Option<AssistLevel> {
        AssistLevel::from_code(self.assist_level)
    }

    pub fn error(&self) -> ControllerError {
        ControllerError::from_code(self.error_state)
    }
}

/// Target values written back on the periodic characteristic (client → controller)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryControl {
    pub assist_level_target: u8,
    pub motor_state_target: u8,
}

impl TelemetryControl {
    pub fn new(assist: AssistLevel, motor_on: bool) -> Self {
        Self {
            assist_level_target: assist.code(),
            motor_state_target: u8::from(motor_on),
        }
    }
}

/// Motor state code reported at byte 32 of the periodic frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Off,
    On,
    /// Any other code: the controller is still running its startup calibration
    Calibrating(u8),
}

impl MotorState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Off,
            1 => Self::On,
            other => Self::Calibrating(other),
        }
    }
}

/// Assist level code, 0-7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssistLevel {
    Off,
    Percent15,
    Percent30,
    Percent45,
    Percent60,
    Percent75,
    Percent90,
    Maximum,
}

impl AssistLevel {
    pub const ALL: [AssistLevel; 8] = [
        Self::Off,
        Self::Percent15,
        Self::Percent30,
        Self::Percent45,
        Self::Percent60,
        Self::Percent75,
        Self::Percent90,
        Self::Maximum,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Percent15 => "15%",
            Self::Percent30 => "30%",
            Self::Percent45 => "45%",
            Self::Percent60 => "60%",
            Self::Percent75 => "75%",
            Self::Percent90 => "90%",
            Self::Maximum => "MAXIMUM",
        }
    }
}

/// Controller error codes (byte 20)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    None,
    MotorBlocked,
    TorqueSensor,
    /// Controller needs at least 15 V
    LowControllerVoltage,
    Overvoltage,
    TemperatureLimit,
    TemperatureMax,
    Unknown(u8),
}

impl ControllerError {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::None,
            1 => Self::MotorBlocked,
            2 => Self::TorqueSensor,
            6 => Self::LowControllerVoltage,
            8 => Self::Overvoltage,
            9 => Self::TemperatureLimit,
            10 => Self::TemperatureMax,
            other => Self::Unknown(other),
        }
    }
}
