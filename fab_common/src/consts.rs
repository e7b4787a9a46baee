//! Timing and threshold constants of the motion kernel.
//!
//! These mirror the physical plant: encoder ticks, poll cycles and the
//! PWM deceleration window. Values can be overridden per machine in
//! `plant.toml` where a field exists for them.

use std::time::Duration;

/// Poll cycle of the encoder wait loop.
pub const ENCODER_POLL_CYCLE: Duration = Duration::from_millis(5);

/// Raw encoder value above which the encoder is treated as disconnected.
pub const ENCODER_OVERFLOW_LIMIT: i64 = 10_000;

/// Trigger threshold for full-power runs on true encoders.
pub const ENCODER_THRESHOLD: i64 = 40;

/// Trigger threshold for full-power runs on raw pulse counters.
pub const COUNTER_THRESHOLD: i64 = 0;

/// Trigger threshold for the slow PWM final approach.
pub const PWM_THRESHOLD: i64 = 15;

/// Distance from target above which a PWM run starts at full power.
pub const PWM_WINDOW: i64 = 300;

/// Distance short of the target where the full-power phase ends.
pub const PWM_APPROACH_OFFSET: i64 = 100;

/// Default slow speed for the PWM final approach [%].
pub const DEFAULT_PWM_SLOW_PERCENT: u8 = 20;

/// Full PWM speed [%].
pub const PWM_FULL_PERCENT: u8 = 100;

/// Attempts made by `reset_encoder` before giving up.
pub const ENCODER_RESET_ATTEMPTS: u32 = 10;

/// Pause between encoder reset pulses.
pub const ENCODER_RESET_INTERVAL: Duration = Duration::from_millis(60);

/// Grip attempts before the robot falls back to a full reset.
pub const GET_PRODUCT_ATTEMPTS: u32 = 3;

/// Default tick of a line poll loop.
pub const DEFAULT_LINE_TICK: Duration = Duration::from_millis(20);

/// Default per-axis move threshold below which no motion is issued.
pub const DEFAULT_MOVE_THRESHOLD: i64 = 20;

/// Sentinel used in configuration files for "do not move this axis".
pub const AXIS_KEEP: i64 = -1;

/// Output writes kept by the simulated bus; older ones are dropped.
pub const SIM_WRITE_HISTORY_LEN: usize = 4096;
