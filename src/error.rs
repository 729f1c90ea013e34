//! Motor fault bitmask.
//!
//! Faults are sticky: every failure path ORs its kind into a shared bitmask
//! that stays set until the supervisor explicitly clears it and re-arms.
//! The mask is shared by reference between the control context and the PWM
//! reload interrupt, so it lives in an atomic.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Motor fault kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MotorError: u32 {
        /// Resistance measurement hit the test-voltage clamp.
        const PHASE_RESISTANCE_OUT_OF_RANGE = 0x0001;
        /// Measured inductance outside 2 µH .. 4 mH.
        const PHASE_INDUCTANCE_OUT_OF_RANGE = 0x0002;
        /// Gate driver reported a fault or failed to initialize.
        const DRV_FAULT                     = 0x0004;
        /// Motor thermistor limiter tripped.
        const MOTOR_THERMISTOR_OVER_TEMP    = 0x0008;
        /// Bridge FET thermistor limiter tripped.
        const FET_THERMISTOR_OVER_TEMP      = 0x0010;
        /// Timed out waiting for a current measurement.
        const CURRENT_MEASUREMENT_TIMEOUT   = 0x0020;
        /// A PWM reload fired without fresh duty timings queued.
        const CONTROL_DEADLINE_MISSED       = 0x0040;
        /// A phase current exceeded the amplifier's linear range.
        const CURRENT_SENSE_SATURATION      = 0x0080;
        /// Measured dq current magnitude exceeded limit plus margin.
        const CURRENT_LIMIT_VIOLATION       = 0x0100;
        /// Modulation vector outside the linear SVM range.
        const MODULATION_MAGNITUDE          = 0x0200;
        /// NaN reached the modulation stage.
        const MODULATION_IS_NAN             = 0x0400;
        /// Commanded motor type has no control law.
        const NOT_IMPLEMENTED_MOTOR_TYPE    = 0x0800;
    }
}

/// Sticky fault mask shared between the control context and the reload ISR.
///
/// Sets are a relaxed OR; the disarm that accompanies every fault provides
/// the release edge the ISR synchronizes on.
pub struct ErrorFlags {
    bits: AtomicU32,
}

impl ErrorFlags {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn set(&self, error: MotorError) {
        self.bits.fetch_or(error.bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> MotorError {
        MotorError::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    pub fn any(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }

    pub fn contains(&self, error: MotorError) -> bool {
        self.get().contains(error)
    }

    /// External reset path: faults stay latched until the supervisor calls
    /// this and re-arms.
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }
}

impl Default for ErrorFlags {
    fn default() -> Self {
        Self::new()
    }
}
