// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Log macros that emit at most `limit_per_min` events per call site and per
//! minute.
//!
//! Each call site owns one `AtomicU64`: the upper 32 bits hold the index of the
//! minute the counter belongs to, the lower 32 bits the number of events
//! emitted during that minute.

use std::sync::atomic::{AtomicU64, Ordering};

use coarsetime::Instant;

const COUNT_MASK: u64 = (1 << 32) - 1;

fn minute_index(instant: Instant) -> u32 {
    let elapsed_secs = coarsetime::Duration::from_ticks(instant.as_ticks()).as_secs();
    (elapsed_secs / 60) as u32
}

/// Returns true if the call site owning `site_state` may log now.
#[doc(hidden)]
pub fn should_log<F: Fn() -> Instant>(site_state: &AtomicU64, limit: u32, now: F) -> bool {
    let current_minute = minute_index(now());
    site_state
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
            let minute = (state >> 32) as u32;
            let count = (state & COUNT_MASK) as u32;
            if minute != current_minute {
                Some(((current_minute as u64) << 32) | 1)
            } else if count < limit {
                Some(state + 1)
            } else {
                None
            }
        })
        .is_ok()
}

#[macro_export]
macro_rules! rate_limited_tracing {
    ($log_fn:ident, limit_per_min=$limit:literal, $($args:tt)*) => {{
        use ::std::sync::atomic::AtomicU64;
        use $crate::rate_limited_tracing::CoarsetimeInstant;

        static SITE_STATE: AtomicU64 = AtomicU64::new(0);

        if $crate::rate_limited_tracing::should_log(&SITE_STATE, $limit, CoarsetimeInstant::now) {
            ::tracing::$log_fn!($($args)*);
        }
    }};
}

#[macro_export]
macro_rules! rate_limited_debug {
    ($unit:ident=$limit:literal, $($args:tt)*) => {
        $crate::rate_limited_tracing::rate_limited_tracing!(debug, $unit=$limit, $($args)*)
    };
}
#[macro_export]
macro_rules! rate_limited_info {
    ($unit:ident=$limit:literal, $($args:tt)*) => {
        $crate::rate_limited_tracing::rate_limited_tracing!(info, $unit=$limit, $($args)*)
    };
}
#[macro_export]
macro_rules! rate_limited_warn {
    ($unit:ident=$limit:literal, $($args:tt)*) => {
        $crate::rate_limited_tracing::rate_limited_tracing!(warn, $unit=$limit, $($args)*)
    };
}
#[macro_export]
macro_rules! rate_limited_error {
    ($unit:ident=$limit:literal, $($args:tt)*) => {
        $crate::rate_limited_tracing::rate_limited_tracing!(error, $unit=$limit, $($args)*)
    };
}

#[doc(hidden)]
pub use coarsetime::Instant as CoarsetimeInstant;
#[doc(hidden)]
pub use rate_limited_tracing;
pub use {rate_limited_debug, rate_limited_error, rate_limited_info, rate_limited_warn};

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use coarsetime::{Duration, Instant};

    use super::should_log;

    #[test]
    fn test_should_log_respects_limit_within_a_minute() {
        let site_state = AtomicU64::new(0);
        // Align on a minute boundary so that the steps below stay in the same minute.
        let start = Instant::now();
        let start_secs = Duration::from_ticks(start.as_ticks()).as_secs();
        let mut simulated_time = start + Duration::from_secs(120 - start_secs % 60);

        for _ in 0..5 {
            assert!(should_log(&site_state, 5, || simulated_time));
            simulated_time += Duration::from_secs(1);
        }
        for _ in 0..5 {
            assert!(!should_log(&site_state, 5, || simulated_time));
            simulated_time += Duration::from_secs(1);
        }
        simulated_time += Duration::from_secs(60);
        assert!(should_log(&site_state, 5, || simulated_time));
    }

    #[test]
    fn test_rate_limited_macro_expands() {
        for _ in 0..3 {
            rate_limited_info!(limit_per_min = 1, "rate limited {}", "event");
        }
    }
}
