use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// What to do when the keepalive timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The previous probe was answered; send the next one.
    Probe,
    /// Nothing was acknowledged since the last tick.
    Expired,
}

/// Liveness bookkeeping for one link. The timer itself belongs to whoever
/// drives the session; this only remembers whether the server answered.
#[derive(Debug, Clone)]
pub struct Keepalive {
    interval: Duration,
    acknowledged: bool,
}

impl Keepalive {
    pub fn new(interval: Duration) -> Self {
        Keepalive {
            interval,
            acknowledged: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Takes effect the next time the timer is started.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Called when a link comes up, so the first tick always probes.
    pub fn arm(&mut self) {
        self.acknowledged = true;
    }

    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    pub fn tick(&mut self) -> Verdict {
        if self.acknowledged {
            self.acknowledged = false;
            Verdict::Probe
        } else {
            Verdict::Expired
        }
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Keepalive::new(DEFAULT_INTERVAL)
    }
}
