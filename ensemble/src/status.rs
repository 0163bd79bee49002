use bitflags::bitflags;

use crate::error::{EnsembleError, Result};

bitflags!(
    /// `AXISSTATUS()` word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AxisStatus: u32 {
        const ENABLED = 1 << 0;
        const HOMED = 1 << 1;
        const IN_POSITION = 1 << 2;
        const MOVE_ACTIVE = 1 << 3;
        const ACCEL_PHASE = 1 << 4;
        const DECEL_PHASE = 1 << 5;
        const POSITION_CAPTURE = 1 << 6;
        const CURRENT_CLAMP = 1 << 7;
        const BRAKE_OUTPUT = 1 << 8;
        const MOTION_IS_CW = 1 << 9;
        const MASTER_SLAVE_CONTROL = 1 << 10;
        const CALIBRATION_ACTIVE = 1 << 11;
        const CALIBRATION_ENABLED = 1 << 12;
        const JOYSTICK_CONTROL = 1 << 13;
        const HOMING = 1 << 14;
        const MASTER_MOTION_SUPPRESSED = 1 << 15;
        const GANTRY_MODE_ACTIVE = 1 << 16;
        const GANTRY_MASTER_ACTIVE = 1 << 17;
        const AUTOFOCUS_ACTIVE = 1 << 18;
        const COMMAND_FILTER_DONE = 1 << 19;
        const IN_POSITION_2 = 1 << 20;
        const SERVO_CONTROL = 1 << 21;
        const CW_END_OF_TRAVEL_LIMIT = 1 << 22;
        const CCW_END_OF_TRAVEL_LIMIT = 1 << 23;
        const HOME_LIMIT = 1 << 24;
        const MARKER_INPUT = 1 << 25;
        const HALL_A_INPUT = 1 << 26;
        const HALL_B_INPUT = 1 << 27;
        const HALL_C_INPUT = 1 << 28;
        const SINE_ENCODER_ERROR = 1 << 29;
        const COSINE_ENCODER_ERROR = 1 << 30;
        const EMERGENCY_STOP_INPUT = 1 << 31;
    }
);

bitflags!(
    /// `AXISFAULT()` word. Zero means the axis is healthy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AxisFault: u32 {
        const POSITION_ERROR = 1 << 0;
        const OVER_CURRENT = 1 << 1;
        const CW_END_OF_TRAVEL = 1 << 2;
        const CCW_END_OF_TRAVEL = 1 << 3;
        const CW_SOFT_LIMIT = 1 << 4;
        const CCW_SOFT_LIMIT = 1 << 5;
        const AMPLIFIER_FAULT = 1 << 6;
        const POSITION_FEEDBACK = 1 << 7;
        const VELOCITY_FEEDBACK = 1 << 8;
        const HALL_SENSOR = 1 << 9;
        const MAX_VELOCITY = 1 << 10;
        const EMERGENCY_STOP = 1 << 11;
        const VELOCITY_ERROR = 1 << 12;
        const EXTERNAL_FAULT = 1 << 15;
        const MOTOR_TEMPERATURE = 1 << 17;
        const AMPLIFIER_TEMPERATURE = 1 << 18;
        const ENCODER_FAULT = 1 << 19;
        const COMMUNICATION_LOST = 1 << 20;
        const FEEDBACK_SCALING = 1 << 23;
        const MARKER_SEARCH = 1 << 24;
    }
);

/// Status words are 32 bits wide; the controller may print them signed.
fn word_from_i64(value: i64) -> Option<u32> {
    u32::try_from(value)
        .ok()
        .or_else(|| i32::try_from(value).ok().map(|signed| signed as u32))
}

/// Integer replies may come back as `5` or `5.000000` depending on firmware.
pub(crate) fn parse_word(what: &'static str, payload: &str) -> Result<u32> {
    let trimmed = payload.trim();

    let word = match trimmed.parse::<i64>() {
        Ok(value) => word_from_i64(value),
        Err(_) => match trimmed.parse::<f64>() {
            Ok(value)
                if value.fract() == 0.0
                    && value >= f64::from(i32::MIN)
                    && value <= f64::from(u32::MAX) =>
            {
                word_from_i64(value as i64)
            }
            _ => None,
        },
    };

    word.ok_or_else(|| EnsembleError::Parse {
        what,
        value: payload.to_string(),
    })
}

impl AxisStatus {
    pub fn parse(payload: &str) -> Result<Self> {
        parse_word("axis status", payload).map(Self::from_bits_retain)
    }
}

impl AxisFault {
    pub fn parse(payload: &str) -> Result<Self> {
        parse_word("axis fault", payload).map(Self::from_bits_retain)
    }
}
