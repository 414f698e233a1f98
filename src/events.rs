//! Event channel between batch workers and whatever presents their output.
//!
//! Producers never block: the channel is unbounded and a sender whose receiver
//! is gone simply drops events. Events from one sender arrive in emission
//! order; there is no ordering between different senders.

use crate::journal::BatchJournal;
use serde::Serialize;
use std::cell::Cell;
use std::sync::mpsc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EventPayload {
    Log(String),
    Progress(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub tag: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn log_line(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Log(line) => Some(line.as_str()),
            EventPayload::Progress(_) => None,
        }
    }

    pub fn progress(&self) -> Option<f32> {
        match self.payload {
            EventPayload::Progress(pct) => Some(pct),
            EventPayload::Log(_) => None,
        }
    }
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, tag: &str, line: impl Into<String>) {
        self.send(Event {
            tag: tag.to_string(),
            payload: EventPayload::Log(line.into()),
        });
    }

    pub fn progress(&self, tag: &str, percent: f32) {
        self.send(Event {
            tag: tag.to_string(),
            payload: EventPayload::Progress(percent),
        });
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    pub fn try_next(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now; empty means nothing to report this tick.
    pub fn drain(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<Event> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Per-batch view of the channel: stamps every event with the batch tag and
/// mirrors it into the batch journal when one is attached.
#[derive(Debug)]
pub struct Reporter {
    tag: String,
    events: EventSender,
    journal: Option<BatchJournal>,
    last_journaled_percent: Cell<Option<u32>>,
}

impl Reporter {
    pub fn new(tag: impl Into<String>, events: EventSender, journal: Option<BatchJournal>) -> Self {
        Self {
            tag: tag.into(),
            events,
            journal,
            last_journaled_percent: Cell::new(None),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Log line plus a journal record for `event`.
    pub fn log(&self, event: &str, level: &str, line: impl Into<String>) {
        let line = line.into();
        if let Some(journal) = &self.journal {
            journal.record(level, event, serde_json::json!({ "line": line }));
        }
        self.events.log(&self.tag, line);
    }

    /// Raw tool output; journaled but not re-leveled.
    pub fn output(&self, line: &str) {
        if let Some(journal) = &self.journal {
            journal.record("info", "output", serde_json::json!({ "line": line }));
        }
        self.events.log(&self.tag, line);
    }

    pub fn progress(&self, percent: f32) {
        self.events.progress(&self.tag, percent);

        let whole = percent.floor() as u32;
        if self.last_journaled_percent.get() != Some(whole) {
            self.last_journaled_percent.set(Some(whole));
            if let Some(journal) = &self.journal {
                journal.record("info", "progress", serde_json::json!({ "percent": percent }));
            }
        }
    }

    pub fn record(&self, level: &str, event: &str, data: serde_json::Value) {
        if let Some(journal) = &self.journal {
            journal.record(level, event, data);
        }
    }

    pub(crate) fn reset_progress(&self) {
        self.last_journaled_percent.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_emission_order_per_tag() {
        let (tx, rx) = event_channel();
        tx.log("VIDEO", "one");
        tx.progress("VIDEO", 12.5);
        tx.log("AUDIO", "other");
        tx.log("VIDEO", "two");

        let video: Vec<Event> = rx.drain().into_iter().filter(|e| e.tag == "VIDEO").collect();
        assert_eq!(video.len(), 3);
        assert_eq!(video[0].log_line(), Some("one"));
        assert_eq!(video[1].progress(), Some(12.5));
        assert_eq!(video[2].log_line(), Some("two"));
    }

    #[test]
    fn empty_drain_is_not_an_error() {
        let (_tx, rx) = event_channel();
        assert!(rx.drain().is_empty());
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn send_after_receiver_dropped_is_silent() {
        let (tx, rx) = event_channel();
        drop(rx);
        tx.log("VIDEO", "nobody listening");
    }

    #[test]
    fn senders_work_across_threads() {
        let (tx, rx) = event_channel();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        tx.log(&format!("T{i}"), n.to_string());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("join");
        }

        let events = rx.drain();
        assert_eq!(events.len(), 200);
        for i in 0..4 {
            let tag = format!("T{i}");
            let seen: Vec<String> = events
                .iter()
                .filter(|e| e.tag == tag)
                .filter_map(|e| e.log_line().map(str::to_string))
                .collect();
            let expected: Vec<String> = (0..50).map(|n| n.to_string()).collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn reporter_stamps_tag() {
        let (tx, rx) = event_channel();
        let reporter = Reporter::new("AUDIO", tx, None);
        reporter.output("[download]   1.0% of 2MiB");
        reporter.progress(1.0);

        let events = rx.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.tag == "AUDIO"));
        assert_eq!(events[1].progress(), Some(1.0));
    }

    #[test]
    fn payload_serializes_with_kind() {
        let event = Event {
            tag: "VIDEO".to_string(),
            payload: EventPayload::Progress(42.5),
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["payload"]["kind"], "progress");
        assert_eq!(json["payload"]["value"], 42.5);
    }
}
