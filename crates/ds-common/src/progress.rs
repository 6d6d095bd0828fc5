//! Progress reporting for long-running copies

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Progress moved forward to `percent`, `delta` points past the last report.
    Advanced { percent: u8, delta: u8 },
    /// The copy finished. Always the last event, emitted exactly once.
    Completed,
}

impl ProgressEvent {
    pub fn percent(&self) -> u8 {
        match self {
            ProgressEvent::Advanced { percent, .. } => *percent,
            ProgressEvent::Completed => 100,
        }
    }
}

pub trait ProgressSink: Send {
    fn report(&mut self, event: ProgressEvent);
}

impl ProgressSink for Vec<ProgressEvent> {
    fn report(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}
