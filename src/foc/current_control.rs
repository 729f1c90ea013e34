//! State of the dq current controller.
//!
//! One bag of per-motor controller state: PI gains and integrators, filtered
//! measurement reports, trip levels from the amplifier setup, and the slip /
//! rotor-flux tracking state of induction motors. Written only from the
//! control context.

/// Fraction of the amplifier output swing treated as linear.
pub const CURRENT_SENSE_MARGIN: f32 = 0.90;

/// Current controller state and telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentControl {
    /// Proportional gain [V/A], `bandwidth * L`.
    pub p_gain: f32,
    /// Integral gain [V/As], `(R / L) * p_gain`.
    pub i_gain: f32,
    /// d-axis voltage integrator [V].
    pub v_integral_d: f32,
    /// q-axis voltage integrator [V].
    pub v_integral_q: f32,
    /// Filtered measured currents, for reporting.
    pub id_measured: f32,
    pub iq_measured: f32,
    /// Setpoints as last commanded, for reporting and ACIM autoflux.
    pub id_setpoint: f32,
    pub iq_setpoint: f32,
    /// Estimated DC bus current [A].
    pub i_bus: f32,
    /// Largest current the sense path can represent [A]; set by `setup`.
    pub max_allowed_current: f32,
    /// Per-phase trip level at the edge of the amplifier's linear range.
    pub overcurrent_trip_level: f32,
    /// Rotor flux estimate, normalized to [A] tracking Id.
    pub acim_rotor_flux: f32,
    /// Slip velocity added on top of the rotor velocity [rad/s].
    pub async_phase_vel: f32,
    /// Integrated slip angle, wrapped to [-π, π).
    pub async_phase_offset: f32,
    /// Stationary-frame voltage actually applied, for sensorless estimators.
    pub final_v_alpha: f32,
    pub final_v_beta: f32,
    /// First-order IIR coefficient for the measurement reports.
    pub i_measured_report_filter_k: f32,
}

impl CurrentControl {
    pub const fn new() -> Self {
        Self {
            p_gain: 0.0,
            i_gain: 0.0,
            v_integral_d: 0.0,
            v_integral_q: 0.0,
            id_measured: 0.0,
            iq_measured: 0.0,
            id_setpoint: 0.0,
            iq_setpoint: 0.0,
            i_bus: 0.0,
            max_allowed_current: 0.0,
            overcurrent_trip_level: 0.0,
            acim_rotor_flux: 0.0,
            async_phase_vel: 0.0,
            async_phase_offset: 0.0,
            final_v_alpha: 0.0,
            final_v_beta: 0.0,
            i_measured_report_filter_k: 1.0,
        }
    }

    /// Zero the accumulating state. Runs while arming so the loop starts
    /// from rest.
    pub fn reset(&mut self) {
        self.v_integral_d = 0.0;
        self.v_integral_q = 0.0;
        self.acim_rotor_flux = 0.0;
        self.i_bus = 0.0;
    }

    /// Retune from the identified plant. Invoked whenever resistance or
    /// inductance changes.
    pub fn update_gains(&mut self, resistance: f32, inductance: f32, bandwidth: f32) {
        self.p_gain = bandwidth * inductance;
        let plant_pole = resistance / inductance;
        self.i_gain = plant_pole * self.p_gain;
    }
}

impl Default for CurrentControl {
    fn default() -> Self {
        Self::new()
    }
}
