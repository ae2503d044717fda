use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Process-wide request throttle shared by every API client.
///
/// When any request sees a 429 the governor records a resume point of
/// now + Retry-After + margin. Every caller checks in before its next
/// request and sleeps until that point passes, so one rate-limit response
/// pauses all workers together. Extensions are monotonic: an earlier 429
/// arriving late can never shorten a pause already in place.
pub struct RateGovernor {
    margin: Duration,
    resume_at: Mutex<Option<Instant>>,
}

impl RateGovernor {
    pub fn new(margin: Duration) -> Self {
        Self {
            margin,
            resume_at: Mutex::new(None),
        }
    }

    /// Sleeps until the shared resume point passes. Returns immediately when
    /// no pause is active. The lock is only held to read the deadline, never
    /// across the sleep, and the deadline is re-checked afterwards because
    /// another task may have extended it meanwhile.
    pub async fn pause_until_clear(&self) {
        loop {
            let deadline = {
                let Ok(mut guard) = self.resume_at.lock() else {
                    return;
                };
                match *guard {
                    Some(deadline) if deadline > Instant::now() => deadline,
                    Some(_) => {
                        *guard = None;
                        return;
                    }
                    None => return,
                }
            };
            tokio::time::sleep_until(deadline).await;
        }
    }

    /// Records a resume point of now + `retry_after` + margin, keeping the
    /// later deadline when one is already set.
    pub fn extend_after(&self, retry_after: Duration) {
        let proposed = Instant::now() + retry_after + self.margin;
        if let Ok(mut guard) = self.resume_at.lock() {
            *guard = Some(match *guard {
                Some(current) => current.max(proposed),
                None => proposed,
            });
        }
    }

    /// Time left before requests may resume, if a pause is active.
    pub fn remaining_pause(&self) -> Option<Duration> {
        let guard = self.resume_at.lock().ok()?;
        let deadline = (*guard)?;
        deadline.checked_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::RateGovernor;
    use std::time::Duration;

    #[test]
    fn unit_governor_starts_clear() {
        let governor = RateGovernor::new(Duration::from_secs(2));
        assert_eq!(governor.remaining_pause(), None);
    }

    #[test]
    fn unit_extend_after_adds_the_margin() {
        let governor = RateGovernor::new(Duration::from_secs(2));
        governor.extend_after(Duration::from_secs(5));
        let remaining = governor.remaining_pause().expect("pause active");
        assert!(remaining > Duration::from_secs(6));
        assert!(remaining <= Duration::from_secs(7));
    }

    #[test]
    fn functional_extensions_never_shorten_an_active_pause() {
        let governor = RateGovernor::new(Duration::ZERO);
        governor.extend_after(Duration::from_secs(10));
        governor.extend_after(Duration::from_secs(1));
        let remaining = governor.remaining_pause().expect("pause active");
        assert!(remaining > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn functional_pause_until_clear_waits_out_the_resume_point() {
        let governor = RateGovernor::new(Duration::ZERO);
        governor.extend_after(Duration::from_millis(40));
        let started = tokio::time::Instant::now();
        governor.pause_until_clear().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(governor.remaining_pause(), None);
    }

    #[tokio::test]
    async fn unit_pause_until_clear_is_immediate_without_a_pause() {
        let governor = RateGovernor::new(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        governor.pause_until_clear().await;
        assert!(started.elapsed() < Duration::from_millis(20));
    }
}
