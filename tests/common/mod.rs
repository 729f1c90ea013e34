//! Simulated hardware for driving the motor core end to end: trivial gate
//! driver / amplifier / thermistor fakes, and an axis whose measurement
//! wait consumes the published duty timings like the reload interrupt
//! would, runs a one-period plant model, and hands back the resulting
//! phase currents.

#![allow(dead_code)]

use drive_core::{
    Axis, CurrentAmplifier, CurrentLimiter, ErrorFlags, GateDriver, LoopTiming, Motor,
    MotorConfig, MotorType, PhaseCurrents, PwmGate,
};

pub const VBUS: f32 = 24.0;
// 0.5 mOhm shunt.
pub const SHUNT_CONDUCTANCE: f32 = 2000.0;
pub const PERIOD_CLOCKS: u16 = 3500;
pub const CURRENT_MEAS_HZ: f32 = 8000.0;

pub fn default_timing() -> LoopTiming {
    LoopTiming::from_hz(CURRENT_MEAS_HZ, PERIOD_CLOCKS)
}

pub struct FakeGateDriver {
    pub init_ok: bool,
    pub healthy: bool,
}

impl Default for FakeGateDriver {
    fn default() -> Self {
        Self {
            init_ok: true,
            healthy: true,
        }
    }
}

impl GateDriver for FakeGateDriver {
    fn init(&mut self) -> bool {
        self.init_ok
    }

    fn check_fault(&mut self) -> bool {
        self.healthy
    }
}

/// Ideal programmable-gain amplifier: accepts any requested gain exactly.
pub struct FakeOpAmp;

impl CurrentAmplifier for FakeOpAmp {
    fn set_gain(&mut self, requested_gain: f32) -> Option<f32> {
        Some(requested_gain)
    }
}

pub struct FakeThermistor {
    pub ok: bool,
    pub limit: f32,
}

impl Default for FakeThermistor {
    fn default() -> Self {
        Self {
            ok: true,
            limit: f32::INFINITY,
        }
    }
}

impl CurrentLimiter for FakeThermistor {
    fn do_checks(&mut self) -> bool {
        self.ok
    }

    fn get_current_limit(&self, requested: f32) -> f32 {
        requested.min(self.limit)
    }
}

/// Electrical model driven by the applied alpha-axis voltage.
pub enum Plant {
    /// No motor connected: the current is always zero.
    Open,
    /// Steady-state resistive response within one period, `I = V / R`.
    Resistive { resistance: f32 },
    /// Pure inductance, `dI/dt = V / L`.
    Inductive { inductance: f32 },
}

/// Simulated axis: synchronizes the supervisor loop with a simulated
/// current-measurement interrupt.
///
/// Each wait models one PWM period: the sample returned reflects the period
/// that just ended, then the pending timings are latched (exactly as the
/// reload ISR would) and the plant integrates them for the next period.
pub struct SimAxis<'a> {
    pub gate: &'a PwmGate,
    pub errors: &'a ErrorFlags,
    pub plant: Plant,
    pub i_alpha: f32,
    pub ts: f32,
    pub reset_calls: u32,
    pub failure_notices: u32,
    pub encoder_samples: u32,
}

impl<'a> SimAxis<'a> {
    pub fn new(gate: &'a PwmGate, errors: &'a ErrorFlags, plant: Plant) -> Self {
        Self {
            gate,
            errors,
            plant,
            i_alpha: 0.0,
            ts: 1.0 / CURRENT_MEAS_HZ,
            reset_calls: 0,
            failure_notices: 0,
            encoder_samples: 0,
        }
    }
}

/// Recover the modulation vector from a published duty triple.
pub fn decode_modulation(timings: [u16; 3]) -> (f32, f32) {
    const SQRT3_BY_2: f32 = 0.866_025_4;
    let t_a = timings[0] as f32 / PERIOD_CLOCKS as f32;
    let t_b = timings[1] as f32 / PERIOD_CLOCKS as f32;
    let t_c = timings[2] as f32 / PERIOD_CLOCKS as f32;
    let alpha = (t_b - t_a) + 0.5 * (t_c - t_b);
    let beta = SQRT3_BY_2 * (t_c - t_b);
    (alpha, beta)
}

impl Axis for SimAxis<'_> {
    fn wait_for_current_meas(&mut self) -> Option<PhaseCurrents> {
        // The boundary sample sees the period that just ran.
        let sample = self.i_alpha;

        let v_alpha = match self.gate.on_pwm_reload(self.errors) {
            Some(timings) => {
                let (mod_alpha, _mod_beta) = decode_modulation(timings);
                mod_alpha * (2.0 / 3.0) * VBUS
            }
            // Bridge floating: no drive.
            None => 0.0,
        };

        match self.plant {
            Plant::Open => self.i_alpha = 0.0,
            Plant::Resistive { resistance } => self.i_alpha = v_alpha / resistance,
            Plant::Inductive { inductance } => self.i_alpha += v_alpha * self.ts / inductance,
        }

        // Balanced split across the two sensed phases.
        Some(PhaseCurrents {
            ph_b: -0.5 * sample,
            ph_c: -0.5 * sample,
        })
    }

    fn sample_encoder_now(&mut self) {
        self.encoder_samples += 1;
    }

    fn reset_control(&mut self) {
        self.reset_calls += 1;
    }

    fn on_motor_failure(&mut self) {
        self.failure_notices += 1;
    }
}

/// Axis whose measurement interrupt never fires.
pub struct TimeoutAxis;

impl Axis for TimeoutAxis {
    fn wait_for_current_meas(&mut self) -> Option<PhaseCurrents> {
        None
    }

    fn sample_encoder_now(&mut self) {}

    fn reset_control(&mut self) {}

    fn on_motor_failure(&mut self) {}
}

pub type SimMotor<'a> =
    Motor<'a, FakeGateDriver, FakeOpAmp, FakeThermistor, FakeThermistor, SimAxis<'a>>;

pub fn make_motor<'a>(
    config: MotorConfig,
    plant: Plant,
    gate: &'a PwmGate,
    errors: &'a ErrorFlags,
) -> SimMotor<'a> {
    let axis = SimAxis::new(gate, errors, plant);
    let mut motor = Motor::new(
        config,
        default_timing(),
        SHUNT_CONDUCTANCE,
        FakeGateDriver::default(),
        FakeOpAmp,
        FakeThermistor::default(),
        FakeThermistor::default(),
        axis,
        gate,
        errors,
    );
    motor.set_vbus_voltage(VBUS);
    motor
}

/// Configuration of a motor whose plant parameters are already known.
pub fn precalibrated_config(motor_type: MotorType) -> MotorConfig {
    MotorConfig {
        motor_type,
        phase_resistance: 0.1,
        phase_inductance: 100e-6,
        pre_calibrated: true,
        ..MotorConfig::default()
    }
}
