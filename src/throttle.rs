//! Analysis throttle.
//!
//! Pure timing policy deciding which expensive, network-dependent actions
//! (AI inference, speech transcription) may run in a given cycle. Each gate
//! is independent: transcription may run on its own cadence even when
//! analysis does not, and vice versa.
//!
//! The caller advances the corresponding timestamp on every *attempt*, so
//! within any window of `analysis_interval` at most one inference call
//! occurs — regardless of how many movement events the window contains and
//! regardless of whether the service succeeded.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub struct AnalysisThrottle {
    analysis_interval: Duration,
    transcription_interval: Duration,
}

/// Which gated actions are permitted this cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThrottleDecision {
    pub run_analysis: bool,
    pub run_transcription: bool,
}

impl AnalysisThrottle {
    pub fn new(analysis_interval: Duration, transcription_interval: Duration) -> Self {
        Self {
            analysis_interval,
            transcription_interval,
        }
    }

    pub fn analysis_interval(&self) -> Duration {
        self.analysis_interval
    }

    pub fn transcription_interval(&self) -> Duration {
        self.transcription_interval
    }

    /// Evaluate both gates. A gate opens when its action never ran or when a
    /// full interval has elapsed since its last attempt.
    pub fn evaluate(
        &self,
        last_analysis: Option<Instant>,
        last_transcription: Option<Instant>,
        now: Instant,
    ) -> ThrottleDecision {
        ThrottleDecision {
            run_analysis: gate_open(last_analysis, self.analysis_interval, now),
            run_transcription: gate_open(last_transcription, self.transcription_interval, now),
        }
    }
}

fn gate_open(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> AnalysisThrottle {
        AnalysisThrottle::new(Duration::from_secs(2), Duration::from_secs(5))
    }

    #[test]
    fn first_cycle_permits_both() {
        let decision = throttle().evaluate(None, None, Instant::now());
        assert!(decision.run_analysis);
        assert!(decision.run_transcription);
    }

    #[test]
    fn gates_are_independent() {
        let base = Instant::now();
        let now = base + Duration::from_secs(3);

        // Analysis interval elapsed, transcription interval has not.
        let decision = throttle().evaluate(Some(base), Some(base), now);
        assert!(decision.run_analysis);
        assert!(!decision.run_transcription);

        // And the reverse.
        let now = base + Duration::from_secs(6);
        let decision = throttle().evaluate(Some(base + Duration::from_secs(5)), Some(base), now);
        assert!(!decision.run_analysis);
        assert!(decision.run_transcription);
    }

    #[test]
    fn within_window_analysis_is_denied() {
        let base = Instant::now();
        let decision = throttle().evaluate(Some(base), None, base + Duration::from_millis(1999));
        assert!(!decision.run_analysis);
    }

    #[test]
    fn continuous_movement_yields_at_most_ceil_window_over_interval_runs() {
        // Simulate a 5-second session with movement on every 50ms cycle and a
        // 2-second analysis interval: grants at t=0, t=2, t=4 — ceil(5/2) = 3.
        let throttle = throttle();
        let base = Instant::now();
        let mut last_analysis = None;
        let mut grants = 0;

        let mut t = Duration::ZERO;
        while t < Duration::from_secs(5) {
            let now = base + t;
            if throttle.evaluate(last_analysis, None, now).run_analysis {
                grants += 1;
                last_analysis = Some(now);
            }
            t += Duration::from_millis(50);
        }

        assert_eq!(grants, 3);
    }

    #[test]
    fn clock_going_backwards_does_not_panic() {
        let base = Instant::now();
        let earlier = base;
        let decision = throttle().evaluate(Some(base + Duration::from_secs(10)), None, earlier);
        assert!(!decision.run_analysis);
    }
}
