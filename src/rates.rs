//! CPU rate derivation over a two-sample window.
//!
//! The guest library exposes monotonic millisecond counters, not rates. One
//! measurement takes two refreshes separated by [`SAMPLE_INTERVAL`] and
//! derives percentages from the deltas. The hypervisor updates the counters
//! on its own cadence, so an unchanged elapsed counter after the second
//! refresh means the window is not usable yet; the engine re-samples up to
//! [`STALL_RETRY_LIMIT`] times and reports zero rates if the counter never
//! advances.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::counters::CounterSample;
use crate::guestlib::{GuestLib, SampleError};
use crate::session::Session;

/// Gap between the two refreshes of a measurement window.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// How many extra re-samples a stalled elapsed counter gets before the
/// measurement degrades to zero rates.
pub const STALL_RETRY_LIMIT: u32 = 10;

/// Rates derived from one measurement window, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DerivedRates {
    /// Share of the window the VM was actually running, in percent.
    pub cpu_used_percent: f64,
    /// Share of the window the hypervisor withheld, in percent.
    pub cpu_stolen_percent: f64,
    /// Host processor speed scaled by the used share, in MHz.
    pub effective_mhz: f64,
}

/// Rounds to two decimal places, ties away from zero.
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Derives rates from a pair of samples. A window with no elapsed progress
/// carries no rate information and yields all zeros.
pub fn compute(s0: CounterSample, s1: CounterSample, host_mhz: u32) -> DerivedRates {
    let elapsed = s1.elapsed_ms.saturating_sub(s0.elapsed_ms);
    if elapsed == 0 {
        return DerivedRates::default();
    }
    let used = s1.cpu_used_ms.saturating_sub(s0.cpu_used_ms) as f64;
    let stolen = s1.cpu_stolen_ms.saturating_sub(s0.cpu_stolen_ms) as f64;
    let elapsed = elapsed as f64;

    DerivedRates {
        cpu_used_percent: round2(100.0 * used / elapsed),
        cpu_stolen_percent: round2(100.0 * stolen / elapsed),
        effective_mhz: round2(f64::from(host_mhz) * used / elapsed),
    }
}

/// Runs one measurement window against an open session.
///
/// Refreshes, captures the first sample, waits `interval`, refreshes again
/// and captures the second. While the elapsed counter has not advanced, the
/// second capture is retried up to [`STALL_RETRY_LIMIT`] times with the same
/// wait in between. A session identity change across the window is logged
/// but the rates are still reported.
pub fn measure<L: GuestLib>(
    session: &mut Session<L>,
    interval: Duration,
) -> Result<DerivedRates, SampleError> {
    session.refresh()?;
    let id0 = session.session_id()?;
    let s0 = session.counter_sample()?;

    thread::sleep(interval);
    session.refresh()?;
    let mut s1 = session.counter_sample()?;

    let mut retries = 0;
    while s1.elapsed_ms == s0.elapsed_ms && retries < STALL_RETRY_LIMIT {
        retries += 1;
        debug!(retries, "elapsed counter unchanged, re-sampling");
        thread::sleep(interval);
        session.refresh()?;
        s1 = session.counter_sample()?;
    }

    let id1 = session.session_id()?;
    if id1 != id0 {
        warn!(
            before = id0,
            after = id1,
            "session identity changed inside the measurement window"
        );
    }

    if s1.elapsed_ms == s0.elapsed_ms {
        warn!(
            retries = STALL_RETRY_LIMIT,
            "elapsed counter never advanced, reporting zero rates"
        );
        return Ok(DerivedRates::default());
    }

    let host_mhz = session.host_processor_speed_mhz()?;
    Ok(compute(s0, s1, host_mhz))
}
