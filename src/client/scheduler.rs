//! Timing for the proactive renewal scheduler.
//!
//! The scheduler aims ahead of expiry by a configurable lead time, pulled a
//! little earlier still by a random jitter so a fleet of clients renewing
//! tokens issued in the same second does not stampede the service. A token
//! already inside the lead window renews after a clamped minimum delay
//! instead of immediately, which keeps a near-expired token from producing a
//! tight renew loop.

use rand::Rng;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct ClientSessionConfig {
    lead_time: Duration,
    jitter_max: Duration,
    min_delay: Duration,
    max_proactive_retries: u32,
    retry_delay_base: Duration,
}

const DEFAULT_LEAD_TIME: Duration = Duration::from_secs(5 * 60);
const DEFAULT_JITTER_MAX: Duration = Duration::from_secs(15);
const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_PROACTIVE_RETRIES: u32 = 1;
const DEFAULT_RETRY_DELAY_BASE: Duration = Duration::from_secs(1);
const RETRY_JITTER_MAX_MS: u64 = 500;

impl Default for ClientSessionConfig {
    fn default() -> Self {
        Self {
            lead_time: DEFAULT_LEAD_TIME,
            jitter_max: DEFAULT_JITTER_MAX,
            min_delay: DEFAULT_MIN_DELAY,
            max_proactive_retries: DEFAULT_MAX_PROACTIVE_RETRIES,
            retry_delay_base: DEFAULT_RETRY_DELAY_BASE,
        }
    }
}

impl ClientSessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_lead_time(mut self, lead_time: Duration) -> Self {
        self.lead_time = lead_time;
        self
    }

    #[must_use]
    pub fn with_jitter_max(mut self, jitter_max: Duration) -> Self {
        self.jitter_max = jitter_max;
        self
    }

    #[must_use]
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    #[must_use]
    pub fn with_max_proactive_retries(mut self, retries: u32) -> Self {
        self.max_proactive_retries = retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay_base(mut self, base: Duration) -> Self {
        self.retry_delay_base = base;
        self
    }

    #[must_use]
    pub fn max_proactive_retries(&self) -> u32 {
        self.max_proactive_retries
    }

    /// Delay before the proactive renewal of a token expiring at `exp_unix`.
    #[must_use]
    pub(crate) fn renewal_delay(&self, exp_unix: i64, now_unix: i64) -> Duration {
        let jitter_ms = if self.jitter_max.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_max.as_millis() as u64)
        };
        renewal_delay_with_jitter(exp_unix, now_unix, self.lead_time, jitter_ms, self.min_delay)
    }

    /// Delay before the next retry after a failed proactive renewal.
    #[must_use]
    pub(crate) fn retry_delay(&self) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..RETRY_JITTER_MAX_MS);
        self.retry_delay_base + Duration::from_millis(jitter_ms)
    }
}

/// Pure timing rule: fire `lead_time` before expiry, pulled `jitter_ms`
/// earlier, never sooner than `min_delay` from now.
fn renewal_delay_with_jitter(
    exp_unix: i64,
    now_unix: i64,
    lead_time: Duration,
    jitter_ms: u64,
    min_delay: Duration,
) -> Duration {
    let until_lead_ms = (exp_unix - now_unix)
        .saturating_mul(1000)
        .saturating_sub(lead_time.as_millis() as i64);
    let delay_ms = until_lead_ms.saturating_sub(jitter_ms as i64);
    if delay_ms <= min_delay.as_millis() as i64 {
        min_delay
    } else {
        Duration::from_millis(delay_ms as u64)
    }
}
