//! Change tracking for optimization passes.
//!
//! Every pass reports what it did through an [`EventLog`]: one typed entry
//! per graph mutation, with an optional human-readable message. Drivers
//! merge per-function logs into one; an empty log means the pass made no
//! change, which is how the pipeline decides whether anything happened.

use std::fmt;

/// The kind of change a pass performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A redundant pure expression was replaced by an earlier one.
    ExpressionEliminated,
    /// A load was replaced by a known value.
    LoadForwarded,
    /// A store with no observable effect was removed.
    StoreEliminated,
    /// A catch entry's synchronized slot set was computed and its initial
    /// definitions pruned.
    CatchEntrySynchronized,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::ExpressionEliminated => "expression-eliminated",
            EventKind::LoadForwarded => "load-forwarded",
            EventKind::StoreEliminated => "store-eliminated",
            EventKind::CatchEntrySynchronized => "catch-entry-synchronized",
        };
        write!(f, "{name}")
    }
}

/// One recorded change.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Optional free-form detail.
    pub message: Option<String>,
}

impl Event {
    /// Attaches a message to the event.
    pub fn message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(m) => write!(f, "{}: {}", self.kind, m),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Accumulated changes of one or more passes.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event and returns it for further decoration.
    pub fn record(&mut self, kind: EventKind) -> &mut Event {
        self.events.push(Event { kind, message: None });
        // Just pushed, so the log cannot be empty.
        let last = self.events.len() - 1;
        &mut self.events[last]
    }

    /// Moves every event of `other` into this log.
    pub fn merge(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Number of events of the given kind.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// Iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut log = EventLog::new();
        assert!(log.is_empty());
        log.record(EventKind::LoadForwarded).message("v3 -> v1");
        log.record(EventKind::StoreEliminated);
        assert_eq!(log.len(), 2);
        assert_eq!(log.count(EventKind::LoadForwarded), 1);
        assert_eq!(log.count(EventKind::ExpressionEliminated), 0);
    }

    #[test]
    fn test_merge() {
        let mut a = EventLog::new();
        a.record(EventKind::ExpressionEliminated);
        let mut b = EventLog::new();
        b.record(EventKind::CatchEntrySynchronized).message("B2: {0, 1}");
        a.merge(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.count(EventKind::CatchEntrySynchronized), 1);
    }

    #[test]
    fn test_display() {
        let mut log = EventLog::new();
        log.record(EventKind::LoadForwarded).message("v9 -> null");
        let shown: Vec<String> = log.iter().map(ToString::to_string).collect();
        assert_eq!(shown, vec!["load-forwarded: v9 -> null"]);
    }
}
