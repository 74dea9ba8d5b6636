//! Implements idle-timeout bookkeeping driven by a tick counter

use std::time::Duration;

/// Default fraction of the peer's idle-time-out after which an empty frame is sent
pub const DEFAULT_EMPTY_FRAME_SEND_RATIO: f64 = 0.5;

pub(crate) fn is_valid_ratio(ratio: f64) -> bool {
    ratio > 0.0 && ratio <= 1.0
}

/// Tracks when frames were last sent and received.
///
/// Both idle timeouts are in milliseconds and zero disables the corresponding check.
#[derive(Debug, Clone)]
pub(crate) struct HeartBeat {
    local_idle_timeout: u32,
    remote_idle_timeout: u32,
    empty_frame_send_ratio: f64,
    last_frame_received_ms: u64,
    last_frame_sent_ms: u64,
}

impl HeartBeat {
    pub fn new(local_idle_timeout: u32, empty_frame_send_ratio: f64) -> Self {
        Self {
            local_idle_timeout,
            remote_idle_timeout: 0,
            empty_frame_send_ratio,
            last_frame_received_ms: 0,
            last_frame_sent_ms: 0,
        }
    }

    pub fn local_idle_timeout(&self) -> u32 {
        self.local_idle_timeout
    }

    pub fn set_local_idle_timeout(&mut self, value: u32) {
        self.local_idle_timeout = value;
    }

    pub fn set_remote_idle_timeout(&mut self, value: u32) {
        self.remote_idle_timeout = value;
    }

    pub fn set_empty_frame_send_ratio(&mut self, ratio: f64) {
        self.empty_frame_send_ratio = ratio;
    }

    pub fn frame_received(&mut self, now_ms: u64) {
        self.last_frame_received_ms = now_ms;
    }

    pub fn frame_sent(&mut self, now_ms: u64) {
        self.last_frame_sent_ms = now_ms;
    }

    /// Interval between empty frames, never below one millisecond
    fn empty_frame_interval(&self) -> Option<u64> {
        if self.remote_idle_timeout == 0 {
            return None;
        }
        let interval = (self.remote_idle_timeout as f64 * self.empty_frame_send_ratio) as u64;
        Some(interval.max(1))
    }

    fn local_deadline(&self) -> Option<u64> {
        match self.local_idle_timeout {
            0 => None,
            timeout => Some(self.last_frame_received_ms.saturating_add(timeout as u64)),
        }
    }

    fn empty_frame_deadline(&self) -> Option<u64> {
        self.empty_frame_interval()
            .map(|interval| self.last_frame_sent_ms.saturating_add(interval))
    }

    /// Whether nothing has been received for the local idle timeout
    pub fn is_local_expired(&self, now_ms: u64) -> bool {
        matches!(self.local_deadline(), Some(deadline) if now_ms >= deadline)
    }

    /// Whether an empty frame should be sent to keep the peer from timing out
    pub fn is_empty_frame_due(&self, now_ms: u64) -> bool {
        matches!(self.empty_frame_deadline(), Some(deadline) if now_ms >= deadline)
    }

    /// Time left until the earliest of the enabled deadlines
    pub fn next_deadline(
        &self,
        now_ms: u64,
        check_local: bool,
        check_remote: bool,
    ) -> Option<Duration> {
        let local = self.local_deadline().filter(|_| check_local);
        let remote = self.empty_frame_deadline().filter(|_| check_remote);

        let deadline = match (local, remote) {
            (Some(l), Some(r)) => l.min(r),
            (Some(d), None) | (None, Some(d)) => d,
            (None, None) => return None,
        };
        Some(Duration::from_millis(deadline.saturating_sub(now_ms)))
    }
}
