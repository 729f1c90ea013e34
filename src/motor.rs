//! The motor control core: torque-to-current mapping, the FOC inner loop,
//! limit supervision and the fault path that gates PWM output.
//!
//! Everything here runs either in the control interrupt (`update`,
//! `foc_current`, `foc_voltage`, the enqueue path) or in the supervisor
//! context under the disarmed/synchronized preconditions (`setup`, `arm`,
//! `do_checks`, configuration changes). The hot path allocates nothing and
//! never blocks; the one shared object, the PWM gate, is lock-free.

use libm::{fabsf, roundf, sqrtf};

use crate::config::{ConfigError, LoopTiming, MotorConfig, MotorType};
use crate::error::{ErrorFlags, MotorError};
use crate::foc::current_control::CURRENT_SENSE_MARGIN;
use crate::foc::transforms::{self, wrap_pm_pi};
use crate::foc::{svm::svm, CurrentControl};
use crate::hardware::{Axis, CurrentAmplifier, CurrentLimiter, GateDriver, PhaseCurrents};
use crate::pwm_gate::PwmGate;

const ONE_BY_SQRT3: f32 = 0.577_350_26;
const SQRT3_BY_2: f32 = 0.866_025_4;

/// Instrumented stages of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimingLogSlot {
    MeasR = 0,
    MeasL = 1,
    FocVoltage = 2,
    FocCurrent = 3,
}

/// Latency trace: last timer count recorded per stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingLog {
    slots: [u16; 4],
}

impl TimingLog {
    fn record(&mut self, slot: TimingLogSlot, count: u16) {
        self.slots[slot as usize] = count;
    }

    pub fn get(&self, slot: TimingLogSlot) -> u16 {
        self.slots[slot as usize]
    }
}

/// A single motor channel.
///
/// Owns its gate driver and current-sense amplifier, holds the thermistor
/// limiters and the parent axis behind traits, and shares the PWM gate and
/// fault mask with the reload interrupt by reference.
pub struct Motor<'a, D, A, FT, MT, X> {
    config: MotorConfig,
    timing: LoopTiming,
    shunt_conductance: f32,
    gate_driver: D,
    opamp: A,
    fet_thermistor: FT,
    motor_thermistor: MT,
    axis: X,
    gate: &'a PwmGate,
    errors: &'a ErrorFlags,
    pub(crate) current_control: CurrentControl,
    pub(crate) current_meas: PhaseCurrents,
    vbus_voltage: f32,
    phase_current_rev_gain: f32,
    effective_current_lim: f32,
    is_calibrated: bool,
    timing_log: TimingLog,
}

impl<'a, D, A, FT, MT, X> Motor<'a, D, A, FT, MT, X>
where
    D: GateDriver,
    A: CurrentAmplifier,
    FT: CurrentLimiter,
    MT: CurrentLimiter,
    X: Axis,
{
    pub fn new(
        config: MotorConfig,
        timing: LoopTiming,
        shunt_conductance: f32,
        gate_driver: D,
        opamp: A,
        fet_thermistor: FT,
        motor_thermistor: MT,
        axis: X,
        gate: &'a PwmGate,
        errors: &'a ErrorFlags,
    ) -> Self {
        let mut motor = Self {
            effective_current_lim: config.current_lim,
            is_calibrated: config.pre_calibrated,
            config,
            timing,
            shunt_conductance,
            gate_driver,
            opamp,
            fet_thermistor,
            motor_thermistor,
            axis,
            gate,
            errors,
            current_control: CurrentControl::new(),
            current_meas: PhaseCurrents::default(),
            vbus_voltage: 0.0,
            phase_current_rev_gain: 1.0,
            timing_log: TimingLog::default(),
        };
        motor.update_current_controller_gains();
        motor
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    // Calibration writes identified parameters directly, without the
    // user-facing validation round trip.
    pub(crate) fn config_mut(&mut self) -> &mut MotorConfig {
        &mut self.config
    }

    pub(crate) fn set_calibrated(&mut self) {
        self.is_calibrated = true;
    }

    /// Replace the configuration. Rejected values leave the old one active.
    pub fn set_config(&mut self, config: MotorConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.is_calibrated = config.pre_calibrated;
        self.update_current_controller_gains();
        Ok(())
    }

    pub fn current_control(&self) -> &CurrentControl {
        &self.current_control
    }

    pub fn current_control_mut(&mut self) -> &mut CurrentControl {
        &mut self.current_control
    }

    pub fn timing(&self) -> &LoopTiming {
        &self.timing
    }

    pub fn axis(&self) -> &X {
        &self.axis
    }

    pub fn axis_mut(&mut self) -> &mut X {
        &mut self.axis
    }

    pub fn gate(&self) -> &PwmGate {
        self.gate
    }

    pub fn errors(&self) -> &ErrorFlags {
        self.errors
    }

    pub fn is_calibrated(&self) -> bool {
        self.is_calibrated
    }

    pub fn timing_log(&self) -> &TimingLog {
        &self.timing_log
    }

    /// Refresh the bus voltage reading. Shared input, written between ticks.
    pub fn set_vbus_voltage(&mut self, vbus_voltage: f32) {
        self.vbus_voltage = vbus_voltage;
    }

    pub fn vbus_voltage(&self) -> f32 {
        self.vbus_voltage
    }

    /// Store the sample the ADC layer produced for this control tick.
    pub fn set_current_meas(&mut self, meas: PhaseCurrents) {
        self.current_meas = meas;
    }

    pub fn current_meas(&self) -> PhaseCurrents {
        self.current_meas
    }

    /// Convert a raw 12-bit bipolar ADC code to a phase current in amperes.
    pub fn phase_current_from_adcval(&self, adcval: u32) -> f32 {
        let adcval_bal = adcval as i32 - (1 << 11);
        let amp_out_volt = (3.3 / 4096.0) * adcval_bal as f32;
        let shunt_volt = amp_out_volt * self.phase_current_rev_gain;
        shunt_volt * self.shunt_conductance
    }

    /// Retune the current controller from the identified plant. Must run
    /// whenever resistance or inductance changes.
    pub fn update_current_controller_gains(&mut self) {
        self.current_control.update_gains(
            self.config.phase_resistance,
            self.config.phase_inductance,
            self.config.current_control_bandwidth,
        );
    }

    /// Bring up the gate driver and negotiate the current-sense gain.
    ///
    /// Solves for the exact gain covering the requested current range, lets
    /// the amplifier snap to what it supports, and derives the usable
    /// current range and the per-phase trip level from the result.
    pub fn setup(&mut self) -> bool {
        if !self.gate_driver.init() {
            self.set_error(MotorError::DRV_FAULT);
            return false;
        }

        // Trip level sits at the edge of the amplifier's linear range.
        const K_TRIP_MARGIN: f32 = 1.0;
        // Amplifier output swing [V].
        const MAX_OUTPUT_SWING: f32 = 1.35;
        let max_unity_gain_current =
            CURRENT_SENSE_MARGIN * MAX_OUTPUT_SWING * self.shunt_conductance;
        let requested_gain = max_unity_gain_current / self.config.requested_current_range;

        let actual_gain = match self.opamp.set_gain(requested_gain) {
            Some(gain) => gain,
            None => return false,
        };

        self.phase_current_rev_gain = 1.0 / actual_gain;
        self.current_control.max_allowed_current =
            max_unity_gain_current * self.phase_current_rev_gain;
        self.current_control.overcurrent_trip_level =
            (K_TRIP_MARGIN / CURRENT_SENSE_MARGIN) * self.current_control.max_allowed_current;

        debug!(
            "current sense gain: requested {} actual {}",
            requested_gain, actual_gain
        );
        true
    }

    /// Record a fault: latch the kind, float the bridge, tell the axis.
    pub fn set_error(&mut self, error: MotorError) {
        self.errors.set(error);
        self.gate.disarm();
        self.axis.on_motor_failure();
    }

    /// Drop all latched faults. The motor stays disarmed; the supervisor
    /// decides when to arm again.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Arm the PWM outputs.
    ///
    /// This unlocks the outputs but does not yet activate them: from the
    /// moment the gate is armed, the control loop must publish fresh duty
    /// timings between any two reload interrupts or the next reload floats
    /// the bridge and records a missed deadline.
    ///
    /// Waits out two measurement interrupts so the loop gets a full period
    /// quantum before the deadline check starts.
    pub fn arm(&mut self) -> bool {
        if self.errors.any() {
            warn!("arm refused: faults pending");
            return false;
        }

        // Start the outer loops and the current controller from rest.
        self.axis.reset_control();
        self.current_control.reset();

        self.gate.begin_arm();
        for _ in 0..2 {
            match self.axis.wait_for_current_meas() {
                Some(meas) => self.current_meas = meas,
                None => {
                    self.set_error(MotorError::CURRENT_MEASUREMENT_TIMEOUT);
                    return false;
                }
            }
        }
        self.gate.finish_arm();
        debug!("motor armed");
        true
    }

    /// Background health checks, run once per supervisor tick: gate driver
    /// fault line, thermistor limiters, and the effective current limit.
    pub fn do_checks(&mut self) -> bool {
        if !self.gate_driver.check_fault() {
            self.set_error(MotorError::DRV_FAULT);
            return false;
        }
        if !self.motor_thermistor.do_checks() {
            self.set_error(MotorError::MOTOR_THERMISTOR_OVER_TEMP);
            return false;
        }
        if !self.fet_thermistor.do_checks() {
            self.set_error(MotorError::FET_THERMISTOR_OVER_TEMP);
            return false;
        }
        self.effective_current_lim();
        true
    }

    /// Recompute the effective current limit: the configured cap, bounded by
    /// what the sense path can represent (or by bus voltage for gimbal
    /// motors, which run voltage control) and by both thermal limiters.
    pub fn effective_current_lim(&mut self) -> f32 {
        let mut current_lim = self.config.current_lim;
        current_lim = match self.config.motor_type {
            MotorType::Gimbal => current_lim.min(0.98 * ONE_BY_SQRT3 * self.vbus_voltage),
            _ => current_lim.min(self.current_control.max_allowed_current),
        };

        current_lim = current_lim.min(
            self.motor_thermistor
                .get_current_limit(self.config.current_lim),
        );
        current_lim = current_lim.min(
            self.fet_thermistor
                .get_current_limit(self.config.current_lim),
        );

        self.effective_current_lim = current_lim;
        current_lim
    }

    /// Maximum torque deliverable under the present limits.
    ///
    /// For induction motors the rotor flux scales the torque constant, so
    /// the available torque is allowed to be zero while the flux builds.
    pub fn max_available_torque(&self) -> f32 {
        let torque = match self.config.motor_type {
            MotorType::Acim => {
                self.effective_current_lim
                    * self.config.torque_constant
                    * self.current_control.acim_rotor_flux
            }
            _ => self.effective_current_lim * self.config.torque_constant,
        };
        torque.clamp(0.0, self.config.torque_lim)
    }

    pub(crate) fn log_timing(&mut self, slot: TimingLogSlot) {
        let count = self.axis.cycle_count();
        self.timing_log.record(slot, count);
    }

    /// Timer update hook. When the timer counts up the sample window is the
    /// active SVM vector, so the encoder snapshot belongs to this moment;
    /// counting down means the zero vector and is ignored.
    pub fn tim_update_cb(&mut self, counting_down: bool) {
        if counting_down {
            return;
        }
        self.axis.sample_encoder_now();
    }

    /// Convert a modulation vector to duty counts and hand it to the ISR.
    pub fn enqueue_modulation_timings(&mut self, mod_alpha: f32, mod_beta: f32) -> bool {
        if mod_alpha.is_nan() || mod_beta.is_nan() {
            self.set_error(MotorError::MODULATION_IS_NAN);
            return false;
        }
        let (t_a, t_b, t_c) = match svm(mod_alpha, mod_beta) {
            Some(timings) => timings,
            None => {
                self.set_error(MotorError::MODULATION_MAGNITUDE);
                return false;
            }
        };
        let period = self.timing.pwm_period_clocks as f32;
        self.gate.publish([
            roundf(t_a * period) as u16,
            roundf(t_b * period) as u16,
            roundf(t_c * period) as u16,
        ]);
        true
    }

    /// Scale a stationary-frame voltage by the bus voltage and enqueue it.
    pub fn enqueue_voltage_timings(&mut self, v_alpha: f32, v_beta: f32) -> bool {
        let vfactor = 1.0 / ((2.0 / 3.0) * self.vbus_voltage);
        if !self.enqueue_modulation_timings(vfactor * v_alpha, vfactor * v_beta) {
            return false;
        }
        self.log_timing(TimingLogSlot::FocVoltage);
        true
    }

    /// Voltage-mode inner loop: rotate the dq voltage command to the frame
    /// of the upcoming PWM cycle and enqueue it.
    pub fn foc_voltage(&mut self, v_d: f32, v_q: f32, pwm_phase: f32) -> bool {
        let (v_alpha, v_beta) = transforms::inverse_park(v_d, v_q, pwm_phase);
        self.enqueue_voltage_timings(v_alpha, v_beta)
    }

    /// Current-mode inner loop.
    ///
    /// `i_phase` un-rotates the measured currents; `pwm_phase` re-rotates
    /// the commanded voltage for the upcoming PWM cycle, half a period
    /// ahead of the measurement.
    pub fn foc_current(
        &mut self,
        id_des: f32,
        iq_des: f32,
        i_phase: f32,
        pwm_phase: f32,
        phase_vel: f32,
    ) -> bool {
        self.current_control.iq_setpoint = iq_des;

        // A phase current at the amplifier's linear-range edge means the
        // measurement can no longer be trusted.
        let trip_level = self.current_control.overcurrent_trip_level;
        if fabsf(self.current_meas.ph_b) > trip_level
            || fabsf(self.current_meas.ph_c) > trip_level
        {
            self.set_error(MotorError::CURRENT_SENSE_SATURATION);
            return false;
        }

        let (i_alpha, i_beta) = transforms::clarke(self.current_meas.ph_b, self.current_meas.ph_c);
        let (i_d, i_q) = transforms::park(i_alpha, i_beta, i_phase);

        let filter_k = self.current_control.i_measured_report_filter_k;
        self.current_control.id_measured += filter_k * (i_d - self.current_control.id_measured);
        self.current_control.iq_measured += filter_k * (i_q - self.current_control.iq_measured);

        let i_trip = self.effective_current_lim + self.config.current_lim_margin;
        if i_d * i_d + i_q * i_q > i_trip * i_trip {
            self.set_error(MotorError::CURRENT_LIMIT_VIOLATION);
            return false;
        }

        let i_err_d = id_des - i_d;
        let i_err_q = iq_des - i_q;

        let mut v_d = self.current_control.v_integral_d + i_err_d * self.current_control.p_gain;
        let mut v_q = self.current_control.v_integral_q + i_err_q * self.current_control.p_gain;

        if self.config.r_wl_ff_enable {
            v_d -= phase_vel * self.config.phase_inductance * iq_des;
            v_q += phase_vel * self.config.phase_inductance * id_des;
            v_d += self.config.phase_resistance * id_des;
            v_q += self.config.phase_resistance * iq_des;
        }

        if self.config.bemf_ff_enable {
            v_q += phase_vel * (2.0 / 3.0)
                * (self.config.torque_constant / self.config.pole_pairs as f32);
        }

        let mod_to_v = (2.0 / 3.0) * self.vbus_voltage;
        let v_to_mod = 1.0 / mod_to_v;
        let mut mod_d = v_to_mod * v_d;
        let mut mod_q = v_to_mod * v_q;

        // Modulation saturation: scale into 80% of the linear range and hold
        // the integrator, decaying it so it cannot stay pinned.
        let mod_scalefactor =
            0.80 * SQRT3_BY_2 / sqrtf(mod_d * mod_d + mod_q * mod_q);
        if mod_scalefactor < 1.0 {
            mod_d *= mod_scalefactor;
            mod_q *= mod_scalefactor;
            self.current_control.v_integral_d *= 0.99;
            self.current_control.v_integral_q *= 0.99;
        } else {
            let i_gain_dt = self.current_control.i_gain * self.timing.current_meas_period;
            self.current_control.v_integral_d += i_err_d * i_gain_dt;
            self.current_control.v_integral_q += i_err_q * i_gain_dt;
        }

        self.current_control.i_bus = mod_d * i_d + mod_q * i_q;

        let (mod_alpha, mod_beta) = transforms::inverse_park(mod_d, mod_q, pwm_phase);

        // Applied stationary-frame voltage, reported for sensorless
        // estimators.
        self.current_control.final_v_alpha = mod_to_v * mod_alpha;
        self.current_control.final_v_beta = mod_to_v * mod_beta;

        if !self.enqueue_modulation_timings(mod_alpha, mod_beta) {
            return false;
        }
        self.log_timing(TimingLogSlot::FocCurrent);
        true
    }

    /// One control tick: map the torque setpoint to currents, advance the
    /// induction-motor flux model, and dispatch on the motor type.
    ///
    /// `phase` and `phase_vel` are electrical, as produced by the encoder
    /// or estimator.
    pub fn update(&mut self, torque_setpoint: f32, phase: f32, phase_vel: f32) -> bool {
        let direction = self.config.direction;
        let mut phase = phase * direction;
        let mut phase_vel = phase_vel * direction;

        let mut current_setpoint = match self.config.motor_type {
            MotorType::Acim => {
                let flux = self
                    .current_control
                    .acim_rotor_flux
                    .max(self.config.acim_gain_min_flux);
                torque_setpoint / (self.config.torque_constant * flux)
            }
            _ => torque_setpoint / self.config.torque_constant,
        };
        current_setpoint *= direction;

        // TODO: 2-norm clamping; the combined vector can be sqrt(2) larger.
        let i_lim = self.effective_current_lim;
        let mut i_d = self.current_control.id_setpoint.clamp(-i_lim, i_lim);
        let i_q = current_setpoint.clamp(-i_lim, i_lim);

        if self.config.motor_type == MotorType::Acim {
            // The commanded currents actually take hold ~1.5 PWM cycles
            // later, but the rotor time constant dwarfs that, so the flux
            // model treats the effect as immediate.
            if self.config.acim_autoflux_enable {
                let abs_iq = fabsf(i_q);
                let gain = if abs_iq > i_d {
                    self.config.acim_autoflux_attack_gain
                } else {
                    self.config.acim_autoflux_decay_gain
                };
                i_d += gain * (abs_iq - i_d) * self.timing.current_meas_period;
                // The current limit wins over the flux floor when thermal
                // throttling pushes them past each other.
                i_d = i_d.max(self.config.acim_autoflux_min_id).min(i_lim);
                self.current_control.id_setpoint = i_d;
            }

            // Rotor flux is normalized to amperes, tracking Id first order.
            let dflux_by_dt =
                self.config.acim_slip_velocity * (i_d - self.current_control.acim_rotor_flux);
            self.current_control.acim_rotor_flux +=
                dflux_by_dt * self.timing.current_meas_period;

            let mut slip_velocity =
                self.config.acim_slip_velocity * (i_q / self.current_control.acim_rotor_flux);
            // Guard the small-flux denominator.
            if slip_velocity.is_nan()
                || fabsf(slip_velocity) > 0.1 * self.timing.current_meas_hz
            {
                slip_velocity = 0.0;
            }
            phase_vel += slip_velocity;
            self.current_control.async_phase_vel = slip_velocity;

            self.current_control.async_phase_offset = wrap_pm_pi(
                self.current_control.async_phase_offset
                    + slip_velocity * self.timing.current_meas_period,
            );
            phase = wrap_pm_pi(phase + self.current_control.async_phase_offset);
        }

        // Predict the phase at the middle of the upcoming PWM cycle.
        let pwm_phase = phase + 1.5 * self.timing.current_meas_period * phase_vel;

        match self.config.motor_type {
            MotorType::HighCurrent | MotorType::Acim => {
                self.foc_current(i_d, i_q, phase, pwm_phase, phase_vel)
            }
            MotorType::Gimbal => self.foc_voltage(i_d, i_q, pwm_phase),
        }
    }
}
