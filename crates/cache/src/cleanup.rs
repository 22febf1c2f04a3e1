/// Fixed-rate schedule for periodic cache cleanup.
///
/// The timer owns no thread and no runtime handle: the host event loop calls
/// `poll` with the current time and runs cleanup when it returns `true`.
/// Missed periods are collapsed into a single run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CleanupTimer {
    interval_ms: u64,
    next_due_ms: Option<u64>,
}

impl CleanupTimer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            next_due_ms: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn is_running(&self) -> bool {
        self.next_due_ms.is_some()
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        self.next_due_ms
    }

    pub fn start(&mut self, now_ms: u64) {
        self.next_due_ms = Some(now_ms.saturating_add(self.interval_ms));
    }

    pub fn stop(&mut self) {
        self.next_due_ms = None;
    }

    pub fn poll(&mut self, now_ms: u64) -> bool {
        let Some(due) = self.next_due_ms else {
            return false;
        };
        if now_ms < due {
            return false;
        }
        let periods = (now_ms - due) / self.interval_ms + 1;
        self.next_due_ms = Some(due.saturating_add(periods * self.interval_ms));
        true
    }
}
