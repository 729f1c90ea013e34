//! Open-loop identification of the motor's electrical parameters.
//!
//! Both measurements drive phase A directly and watch the alpha current:
//! resistance with a slow integrating voltage regulator, inductance with a
//! square-wave voltage and the resulting current slope. The loops run in
//! the supervisor context, one iteration per current measurement, with the
//! reload interrupt consuming the voltage timings they queue.

use libm::fabsf;

use crate::config::MotorType;
use crate::error::MotorError;
use crate::hardware::{Axis, CurrentAmplifier, CurrentLimiter, GateDriver};
use crate::motor::{Motor, TimingLogSlot};

/// Integrator gain of the resistance measurement regulator [(V/s)/A].
const RESISTANCE_REGULATOR_KI: f32 = 10.0;

/// Seconds the resistance measurement runs for.
const RESISTANCE_MEAS_DURATION: f32 = 3.0;

/// Square-wave half-periods accumulated per polarity during inductance
/// measurement.
const INDUCTANCE_NUM_CYCLES: u32 = 5000;

impl<'a, D, A, FT, MT, X> Motor<'a, D, A, FT, MT, X>
where
    D: GateDriver,
    A: CurrentAmplifier,
    FT: CurrentLimiter,
    MT: CurrentLimiter,
    X: Axis,
{
    /// Synchronous tick pump: run `body` once per control period until it
    /// returns false or something faults.
    ///
    /// Each iteration runs the background checks, executes the body (which
    /// queues the next voltage timings), then parks on the measurement
    /// event so the next iteration sees a fresh sample. Any latched fault
    /// aborts the loop.
    pub(crate) fn run_control_loop(&mut self, mut body: impl FnMut(&mut Self) -> bool) -> bool {
        loop {
            if !self.do_checks() {
                return false;
            }

            let keep_going = body(self);

            match self.axis_mut().wait_for_current_meas() {
                Some(meas) => self.set_current_meas(meas),
                None => {
                    self.set_error(MotorError::CURRENT_MEASUREMENT_TIMEOUT);
                    return false;
                }
            }

            if self.errors().any() {
                return false;
            }
            if !keep_going {
                return true;
            }
        }
    }

    /// Identify the phase resistance by regulating a DC current through
    /// phase A and reading off the steady-state voltage.
    ///
    /// The integrating regulator `V += kI * Ts * (I_target - I_alpha)`
    /// settles at `V = R * I_target`; hitting the voltage clamp means the
    /// winding resistance is outside the drivable range.
    pub fn measure_phase_resistance(&mut self, test_current: f32, max_voltage: f32) -> bool {
        let num_test_cycles =
            (RESISTANCE_MEAS_DURATION / self.timing().current_meas_period) as u32;
        let ki_dt = RESISTANCE_REGULATOR_KI * self.timing().current_meas_period;

        let mut test_voltage = 0.0f32;
        let mut cycle = 0u32;
        let completed = self.run_control_loop(|motor| {
            let i_alpha = motor.current_meas().alpha();
            test_voltage += ki_dt * (test_current - i_alpha);
            if fabsf(test_voltage) > max_voltage {
                motor.set_error(MotorError::PHASE_RESISTANCE_OUT_OF_RANGE);
                return false;
            }

            // Test voltage along phase A.
            if !motor.enqueue_voltage_timings(test_voltage, 0.0) {
                return false;
            }
            motor.log_timing(TimingLogSlot::MeasR);

            cycle += 1;
            cycle < num_test_cycles
        });
        if !completed || self.errors().any() {
            return false;
        }

        // De-energize before handing the bridge back.
        if !self.enqueue_voltage_timings(0.0, 0.0) {
            return false;
        }

        let resistance = test_voltage / test_current;
        self.config_mut().phase_resistance = resistance;
        info!("measured phase resistance: {} ohm", resistance);
        true
    }

    /// Identify the phase inductance from the current slope under a
    /// square-wave voltage on phase A.
    ///
    /// Accumulates the alpha current separately for the two polarities;
    /// the difference over the run time gives dI/dt. The finite-timestep
    /// discrepancy in this estimate is inverted by the same discretization
    /// in the current loop, so no correction is applied.
    pub fn measure_phase_inductance(&mut self, voltage_low: f32, voltage_high: f32) -> bool {
        let test_voltages = [voltage_low, voltage_high];
        let mut i_alphas = [0.0f32; 2];

        let mut tick = 0u32;
        let completed = self.run_control_loop(|motor| {
            let phase = (tick & 1) as usize;
            i_alphas[phase] += motor.current_meas().alpha();

            // Test voltage along phase A.
            if !motor.enqueue_voltage_timings(test_voltages[phase], 0.0) {
                return false;
            }
            motor.log_timing(TimingLogSlot::MeasL);

            tick += 1;
            tick < (INDUCTANCE_NUM_CYCLES << 1)
        });
        if !completed || self.errors().any() {
            return false;
        }

        if !self.enqueue_voltage_timings(0.0, 0.0) {
            return false;
        }

        let v_l = 0.5 * (voltage_high - voltage_low);
        let di_by_dt = (i_alphas[1] - i_alphas[0])
            / (self.timing().current_meas_period * INDUCTANCE_NUM_CYCLES as f32);
        let inductance = v_l / di_by_dt;

        self.config_mut().phase_inductance = inductance;
        if !(2e-6..=4000e-6).contains(&inductance) {
            self.set_error(MotorError::PHASE_INDUCTANCE_OUT_OF_RANGE);
            return false;
        }
        info!("measured phase inductance: {} H", inductance);
        true
    }

    /// Run the identification sequence the motor type needs, then retune
    /// the current controller from the result.
    pub fn run_calibration(&mut self) -> bool {
        let max_voltage = self.config().resistance_calib_max_voltage;
        let calibration_current = self.config().calibration_current;

        if !self.arm() {
            return false;
        }

        match self.config().motor_type {
            MotorType::HighCurrent | MotorType::Acim => {
                if !self.measure_phase_resistance(calibration_current, max_voltage) {
                    return false;
                }
                if !self.measure_phase_inductance(-max_voltage, max_voltage) {
                    return false;
                }
            }
            // Gimbal motors run voltage control; resistance and inductance
            // stay whatever the user configured.
            MotorType::Gimbal => {}
        }

        self.update_current_controller_gains();
        self.set_calibrated();
        info!("motor calibration complete");
        true
    }
}
