use crate::hal::WatchdogTimer;
use serde::{Deserialize, Serialize};

const WATCHDOG_TIMEOUT_MS: u32 = 1_000;
const WATCHDOG_MARGIN_MS: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Hardware countdown `T_wd`.
    pub timeout_ms: u32,
    /// Slack kept between the worst refresh interval and `T_wd`.
    pub margin_ms: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: WATCHDOG_TIMEOUT_MS,
            margin_ms: WATCHDOG_MARGIN_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogStats {
    pub armed: bool,
    pub refresh_count: u32,
    pub last_refresh_ms: u32,
    /// Longest gap between two consecutive refreshes.
    pub max_interval_ms: u32,
}

/// Arms and feeds the hardware watchdog. Expiry is handled entirely by the
/// hardware; nothing here can prevent or delay the reset.
#[derive(Debug)]
pub struct WatchdogSupervisor<W: WatchdogTimer> {
    timer: W,
    config: WatchdogConfig,
    stats: WatchdogStats,
}

impl<W: WatchdogTimer> WatchdogSupervisor<W> {
    pub fn new(timer: W, config: WatchdogConfig) -> Self {
        Self {
            timer,
            config,
            stats: WatchdogStats::default(),
        }
    }

    pub fn initialize(&mut self, now_ms: u32) {
        self.timer.start(self.config.timeout_ms);
        self.stats.armed = true;
        self.stats.last_refresh_ms = now_ms;
    }

    pub fn refresh(&mut self, now_ms: u32) {
        self.timer.feed();
        let interval = now_ms.wrapping_sub(self.stats.last_refresh_ms);
        self.stats.max_interval_ms = self.stats.max_interval_ms.max(interval);
        self.stats.last_refresh_ms = now_ms;
        self.stats.refresh_count = self.stats.refresh_count.saturating_add(1);
    }

    /// Time left before the hardware fires, assuming no further refresh.
    pub fn remaining_ms(&self, now_ms: u32) -> u32 {
        self.config
            .timeout_ms
            .saturating_sub(now_ms.wrapping_sub(self.stats.last_refresh_ms))
    }

    pub fn is_armed(&self) -> bool {
        self.stats.armed
    }

    pub fn get_stats(&self) -> &WatchdogStats {
        &self.stats
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn timer(&self) -> &W {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut W {
        &mut self.timer
    }

    pub fn into_timer(self) -> W {
        self.timer
    }
}
