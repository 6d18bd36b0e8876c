use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Fraction of failed calls in the window that trips the breaker.
    pub failure_ratio: f64,
    /// Rolling window over which call outcomes are sampled.
    pub sampling_window: Duration,
    /// Minimum sampled calls before the ratio is evaluated.
    pub min_calls: usize,
    /// How long the breaker stays open before half-opening.
    pub open_duration: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(30),
            min_calls: 5,
            open_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

struct Inner {
    state: State,
    samples: VecDeque<(Instant, bool)>,
}

/// Closed → Open → HalfOpen → Closed breaker keyed on a rolling failure
/// ratio. While open, `allow_call` short-circuits without touching the
/// network; after the cool-down one trial call is admitted.
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                samples: VecDeque::new(),
            }),
        }
    }

    /// Whether a delivery attempt may proceed. Transitions Open → HalfOpen
    /// once the cool-down has elapsed.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open { since } => {
                if since.elapsed() >= self.config.open_duration {
                    tracing::info!("circuit breaker half-open, admitting trial call");
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                tracing::info!("circuit breaker closed after successful trial");
                inner.state = State::Closed;
                inner.samples.clear();
            }
            State::Closed => {
                let now = Instant::now();
                inner.samples.push_back((now, true));
                self.prune(&mut inner, now);
            }
            State::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                tracing::warn!("circuit breaker re-opened after failed trial");
                inner.state = State::Open {
                    since: Instant::now(),
                };
                inner.samples.clear();
            }
            State::Closed => {
                let now = Instant::now();
                inner.samples.push_back((now, false));
                self.prune(&mut inner, now);

                let total = inner.samples.len();
                if total < self.config.min_calls {
                    return;
                }
                let failures = inner.samples.iter().filter(|(_, ok)| !ok).count();
                let ratio = failures as f64 / total as f64;
                if ratio >= self.config.failure_ratio {
                    tracing::warn!(
                        failures,
                        total,
                        "circuit breaker opened on failure ratio {:.0}%",
                        ratio * 100.0
                    );
                    inner.state = State::Open { since: now };
                    inner.samples.clear();
                }
            }
            State::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().state, State::Open { .. })
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        let window = self.config.sampling_window;
        while let Some((at, _)) = inner.samples.front() {
            if now.duration_since(*at) > window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitConfig {
        CircuitConfig {
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(30),
            min_calls: 5,
            open_duration: Duration::from_millis(50),
        }
    }

    #[test]
    fn stays_closed_below_minimum_samples() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(!breaker.is_open());
        assert!(breaker.allow_call());
    }

    #[test]
    fn opens_at_failure_ratio_and_short_circuits() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_success();
        }
        for _ in 0..3 {
            breaker.record_failure();
        }
        // 3 failures out of 6 calls = 50%
        assert!(breaker.is_open());
        assert!(!breaker.allow_call());
    }

    #[test]
    fn stays_closed_below_failure_ratio() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            breaker.record_success();
        }
        for _ in 0..2 {
            breaker.record_failure();
        }
        // 2 of 6 ≈ 33%
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_opens_after_cooldown_and_closes_on_success() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_call());

        std::thread::sleep(Duration::from_millis(70));
        // Cool-down elapsed: one trial admitted
        assert!(breaker.allow_call());
        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(breaker.allow_call());
    }

    #[test]
    fn failed_trial_reopens() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.allow_call());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow_call());
    }
}
