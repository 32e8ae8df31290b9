use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// What the session should do on a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Beat {
    /// send a ping carrying this timestamp
    Ping(u64),
    /// last ping got no pong, the connection is dead
    Missed,
}

/// Ping/pong bookkeeping of one connection
#[derive(Debug)]
pub(crate) struct Heartbeat {
    pending: Option<(u64, Instant)>,
    threshold: Duration,
}

impl Heartbeat {
    pub fn new(threshold: Duration) -> Self {
        Self {
            pending: None,
            threshold,
        }
    }

    pub fn beat(&mut self, now: Instant) -> Beat {
        if let Some((ts, _)) = self.pending {
            log::debug!("Ping {} got no pong before next heartbeat", ts);
            return Beat::Missed;
        }

        let ts = epoch_millis();
        self.pending = Some((ts, now));
        Beat::Ping(ts)
    }

    /// Record a pong, return the round trip time.
    ///
    /// Any pong proves the connection alive, even one not echoing the pending timestamp.
    pub fn pong(&mut self, timestamp: u64, now: Instant) -> Option<Duration> {
        let (ts, sent) = self.pending.take()?;

        if ts != timestamp {
            log::trace!("Pong timestamp {} does not match ping {}", timestamp, ts);
        }

        Some(now.saturating_duration_since(sent))
    }

    pub fn exceeds_threshold(&self, rtt: Duration) -> bool {
        rtt > self.threshold
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
