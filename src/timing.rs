//! Conversion latency for a given configuration.
//!
//! Uses the maximum-time formula from the BME280 datasheet (appendix B):
//!
//! `t = 1.25 + 2.3·T + (2.3·P + 0.575) + (2.3·H + 0.575)` ms
//!
//! where `T`, `P`, `H` are the oversampling factors. The pressure and humidity
//! terms vanish completely when their channel is skipped.

use crate::settings::{Config, Oversampling, PowerMode};

const BASE_US: u32 = 1_250;
const PER_SAMPLE_US: u32 = 2_300;
const CHANNEL_SETUP_US: u32 = 575;

/// Extra time granted after a deadline before a measurement counts as lost.
pub const GRACE_US: u32 = 5_000;
/// Longest interval between two reads of the status register while waiting.
pub const POLL_INTERVAL_US: u32 = 500;

/// Duration wrapper for type-safety. Stored in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Microseconds(pub u32);

/// How long to wait for a triggered measurement, as returned by
/// [`Bm280::trigger`](crate::Bm280::trigger).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    pub(crate) wait: Microseconds,
    pub(crate) grace: Microseconds,
    pub(crate) poll: Microseconds,
}

impl Deadline {
    /// Builds the deadline for one cycle under `config`.
    pub fn for_config(config: &Config) -> Self {
        let conversion = measurement_time(config);
        match config.mode {
            // The device free-runs and `measuring` is only clear during standby.
            // The budget covers one full cycle and polling must not step over
            // the standby window.
            PowerMode::Normal => {
                let standby = config.standby.micros();
                Self {
                    wait: Microseconds(0),
                    grace: Microseconds(conversion.0 + standby + GRACE_US),
                    poll: Microseconds(POLL_INTERVAL_US.min(standby / 2)),
                }
            }
            PowerMode::Sleep | PowerMode::Forced => Self {
                wait: conversion,
                grace: Microseconds(GRACE_US),
                poll: Microseconds(POLL_INTERVAL_US),
            },
        }
    }

    /// Time to sleep before the first status poll.
    pub fn wait(&self) -> Microseconds {
        self.wait
    }

    /// Polling budget after `wait` has elapsed.
    pub fn grace(&self) -> Microseconds {
        self.grace
    }

    /// Delay between two status polls.
    pub fn poll_interval(&self) -> Microseconds {
        self.poll
    }
}

/// Maximum duration of one measurement cycle with the given oversampling.
pub fn measurement_time(config: &Config) -> Microseconds {
    let osrs = &config.osrs_config;
    let mut t = BASE_US + PER_SAMPLE_US * osrs.temp_osrs.factor();
    t += channel_time(osrs.pres_osrs);
    t += channel_time(osrs.hum_osrs);
    Microseconds(t)
}

fn channel_time(os: Oversampling) -> u32 {
    match os {
        Oversampling::Skipped => 0,
        os => PER_SAMPLE_US * os.factor() + CHANNEL_SETUP_US,
    }
}
