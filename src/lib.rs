//! Field-oriented motor control core.
//!
//! The inner loop of a brushless/induction motor drive: Clarke/Park
//! transforms and space-vector modulation, a PI current controller with
//! feed-forward and anti-windup, open-loop identification of the phase
//! resistance and inductance, limit supervision, and the safety gate that
//! decides whether the PWM bridge follows the control loop or floats.
//!
//! The crate is hardware- and executor-agnostic: the embedding firmware
//! implements the [`hardware`] traits, calls [`motor::Motor::update`] from
//! its control interrupt, and latches the duty timings the reload interrupt
//! obtains from [`pwm_gate::PwmGate::on_pwm_reload`]. Every hot-path
//! operation is deterministic: no allocation, no blocking, no locks.

#![no_std]

// This module must come first so the others see its macros.
mod fmt;

pub mod calibration;
pub mod config;
pub mod error;
pub mod foc;
pub mod hardware;
pub mod motor;
pub mod pwm_gate;

pub use config::{ConfigError, LoopTiming, MotorConfig, MotorType};
pub use error::{ErrorFlags, MotorError};
pub use foc::CurrentControl;
pub use hardware::{Axis, CurrentAmplifier, CurrentLimiter, GateDriver, PhaseCurrents};
pub use motor::{Motor, TimingLog, TimingLogSlot};
pub use pwm_gate::{ArmState, PwmGate};
