//! Motor configuration and control-loop timing parameters.

/// Motor construction type. Selects the control law in the inner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorType {
    /// Low-resistance motor driven with closed-loop current control.
    HighCurrent,
    /// High-inductance gimbal motor driven open-loop in voltage mode.
    Gimbal,
    /// AC induction motor: current control plus slip/rotor-flux tracking.
    Acim,
}

impl TryFrom<u8> for MotorType {
    type Error = u8;

    /// Decode the wire encoding used by the supervisor protocol. Raw value
    /// 1 (low-current) has no control law and is rejected.
    fn try_from(raw: u8) -> Result<Self, u8> {
        match raw {
            0 => Ok(MotorType::HighCurrent),
            2 => Ok(MotorType::Gimbal),
            3 => Ok(MotorType::Acim),
            other => Err(other),
        }
    }
}

/// Reason a configuration update was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    NonFiniteParameter,
    NonPositiveTorqueConstant,
    ZeroPolePairs,
    InvalidDirection,
    NegativeCurrentLimit,
    NegativeTorqueLim,
}

/// User-writable motor parameters. Validated on every change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorConfig {
    pub motor_type: MotorType,
    /// Phase resistance [Ω]. Identified by calibration unless pre-set.
    pub phase_resistance: f32,
    /// Phase inductance [H]. Identified by calibration unless pre-set.
    pub phase_inductance: f32,
    /// Torque constant [Nm/A].
    pub torque_constant: f32,
    pub pole_pairs: u32,
    /// Configured current cap [A].
    pub current_lim: f32,
    /// Tolerated overshoot beyond the effective limit [A].
    pub current_lim_margin: f32,
    /// Torque cap [Nm].
    pub torque_lim: f32,
    /// Requested current-sense range [A]; sets the amplifier gain.
    pub requested_current_range: f32,
    /// Test current for resistance identification [A].
    pub calibration_current: f32,
    /// Voltage clamp during resistance identification [V].
    pub resistance_calib_max_voltage: f32,
    /// Current controller bandwidth [rad/s].
    pub current_control_bandwidth: f32,
    /// +1.0 or -1.0, applied to phase, velocity and current setpoint.
    pub direction: f32,
    /// Enable resistance and ωL decoupling feed-forward.
    pub r_wl_ff_enable: bool,
    /// Enable back-EMF feed-forward.
    pub bemf_ff_enable: bool,
    /// Rated slip velocity [rad/s electrical].
    pub acim_slip_velocity: f32,
    /// Flux floor used in the torque-to-current map [A].
    pub acim_gain_min_flux: f32,
    pub acim_autoflux_enable: bool,
    /// Lower clamp on the autoflux Id setpoint [A].
    pub acim_autoflux_min_id: f32,
    pub acim_autoflux_attack_gain: f32,
    pub acim_autoflux_decay_gain: f32,
    /// Trust the stored resistance/inductance instead of calibrating.
    pub pre_calibrated: bool,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            motor_type: MotorType::HighCurrent,
            phase_resistance: 0.0,
            phase_inductance: 0.0,
            torque_constant: 0.04,
            pole_pairs: 7,
            current_lim: 10.0,
            current_lim_margin: 8.0,
            torque_lim: f32::INFINITY,
            requested_current_range: 60.0,
            calibration_current: 10.0,
            resistance_calib_max_voltage: 2.0,
            current_control_bandwidth: 1000.0,
            direction: 1.0,
            r_wl_ff_enable: false,
            bemf_ff_enable: false,
            acim_slip_velocity: 14.706,
            acim_gain_min_flux: 10.0,
            acim_autoflux_enable: false,
            acim_autoflux_min_id: 10.0,
            acim_autoflux_attack_gain: 10.0,
            acim_autoflux_decay_gain: 1.0,
            pre_calibrated: false,
        }
    }
}

impl MotorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = self.torque_constant.is_finite()
            && self.phase_resistance.is_finite()
            && self.phase_inductance.is_finite()
            && self.current_lim.is_finite()
            && self.current_lim_margin.is_finite()
            && self.requested_current_range.is_finite()
            && self.current_control_bandwidth.is_finite();
        if !finite {
            return Err(ConfigError::NonFiniteParameter);
        }
        if self.torque_constant <= 0.0 {
            return Err(ConfigError::NonPositiveTorqueConstant);
        }
        if self.pole_pairs == 0 {
            return Err(ConfigError::ZeroPolePairs);
        }
        if self.direction != 1.0 && self.direction != -1.0 {
            return Err(ConfigError::InvalidDirection);
        }
        if self.current_lim < 0.0 {
            return Err(ConfigError::NegativeCurrentLimit);
        }
        // Infinity is the "uncapped" default, NaN is not.
        if !(self.torque_lim >= 0.0) {
            return Err(ConfigError::NegativeTorqueLim);
        }
        Ok(())
    }
}

/// Timing constants of the control loop, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTiming {
    /// Control period [s]. One PWM period per current measurement.
    pub current_meas_period: f32,
    /// Control frequency [Hz].
    pub current_meas_hz: f32,
    /// Timer counts per PWM period; duty timings scale to this.
    pub pwm_period_clocks: u16,
}

impl LoopTiming {
    pub fn from_hz(current_meas_hz: f32, pwm_period_clocks: u16) -> Self {
        Self {
            current_meas_period: 1.0 / current_meas_hz,
            current_meas_hz,
            pwm_period_clocks,
        }
    }
}
