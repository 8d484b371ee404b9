use std::fmt::Display;
use std::sync::mpsc;
use std::time::Duration;

use log::info;

use crate::service::ServiceRecord;

/// Name under which consumers subscribe to cache events on the host bus.
pub const EVENT_NAME: &str = "mDNSEvent";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind
{
    Added,
    Updated,
    Removed,
    Expired,
    Name
}

impl Display for EventKind
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self
        {
            EventKind::Added => write!(f, "added"),
            EventKind::Updated => write!(f, "updated"),
            EventKind::Removed => write!(f, "removed"),
            EventKind::Expired => write!(f, "expired"),
            EventKind::Name => write!(f, "name")
        }
    }
}

/// A cache change surfaced on the host bus. `Name` events carry only the
/// service type and zone in `record`.
#[derive(Clone, Debug, PartialEq)]
pub struct Event
{
    pub kind: EventKind,
    pub record: ServiceRecord,
    pub ttl: Duration
}

impl Event
{
    pub fn new(kind: EventKind, record: ServiceRecord) -> Event
    {
        let ttl = record.ttl;
        Event { kind, record, ttl }
    }

    pub fn name(&self) -> &'static str
    {
        EVENT_NAME
    }
}

impl Display for Event
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self.kind
        {
            EventKind::Name => write!(f, "{} {}: {}", EVENT_NAME, self.kind, self.record.service_name()),
            _ => write!(f, "{} {}: {}", EVENT_NAME, self.kind, self.record)
        }
    }
}

/// The emit side of the host application's message bus.
pub trait EventSink: Send + Sync
{
    fn emit(&self, event: Event);
}

impl EventSink for mpsc::Sender<Event>
{
    fn emit(&self, event: Event)
    {
        // A receiver that went away is not our concern.
        let _ = self.send(event);
    }
}

/// Sink that writes every event to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink
{
    fn emit(&self, event: Event)
    {
        info!("{}", event);
    }
}
