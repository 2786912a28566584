// Shared fixture aggregate for unit tests.

use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::{Aggregate, AggregateError, DomainEvent, EventSourced};
use crate::event_sourcing::projection::EventVariant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum VenueEvent {
    Opened(VenueOpened),
    Renamed(VenueRenamed),
    Closed(VenueClosed),
    /// Emitted by another bounded context; `Venue` never applies it.
    Audited(VenueAudited),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueOpened {
    pub name: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueRenamed {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueClosed {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueAudited {
    pub auditor: String,
}

impl DomainEvent for VenueEvent {
    fn event_type(&self) -> &'static str {
        match self {
            VenueEvent::Opened(_) => VenueOpened::EVENT_TYPE,
            VenueEvent::Renamed(_) => VenueRenamed::EVENT_TYPE,
            VenueEvent::Closed(_) => VenueClosed::EVENT_TYPE,
            VenueEvent::Audited(_) => "VenueAudited",
        }
    }
}

impl EventVariant<VenueEvent> for VenueOpened {
    const EVENT_TYPE: &'static str = "VenueOpened";

    fn from_event(event: &VenueEvent) -> Option<&Self> {
        match event {
            VenueEvent::Opened(e) => Some(e),
            _ => None,
        }
    }
}

impl EventVariant<VenueEvent> for VenueRenamed {
    const EVENT_TYPE: &'static str = "VenueRenamed";

    fn from_event(event: &VenueEvent) -> Option<&Self> {
        match event {
            VenueEvent::Renamed(e) => Some(e),
            _ => None,
        }
    }
}

impl EventVariant<VenueEvent> for VenueClosed {
    const EVENT_TYPE: &'static str = "VenueClosed";

    fn from_event(event: &VenueEvent) -> Option<&Self> {
        match event {
            VenueEvent::Closed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Venue {
    pub name: String,
    pub capacity: u32,
    pub closed: bool,
}

impl Aggregate for Venue {
    type Event = VenueEvent;
    const AGGREGATE_TYPE: &'static str = "Venue";

    fn apply(&mut self, event: &VenueEvent) -> Result<(), AggregateError> {
        match event {
            VenueEvent::Opened(e) => {
                self.name = e.name.clone();
                self.capacity = e.capacity;
            }
            VenueEvent::Renamed(e) => self.name = e.name.clone(),
            VenueEvent::Closed(_) => self.closed = true,
            other => return Err(AggregateError::unhandled::<Self>(other)),
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum VenueError {
    #[error("Venue is closed")]
    AlreadyClosed,
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

pub fn open(id: &str, name: &str, capacity: u32) -> Result<EventSourced<Venue>, VenueError> {
    let mut venue = EventSourced::<Venue>::new(id);
    venue.apply_and_enqueue(VenueEvent::Opened(VenueOpened {
        name: name.to_string(),
        capacity,
    }))?;
    Ok(venue)
}

pub fn rename(venue: &mut EventSourced<Venue>, name: &str) -> Result<(), VenueError> {
    if venue.closed {
        return Err(VenueError::AlreadyClosed);
    }
    venue.apply_and_enqueue(VenueEvent::Renamed(VenueRenamed {
        name: name.to_string(),
    }))?;
    Ok(())
}

pub fn close(venue: &mut EventSourced<Venue>, reason: &str) -> Result<(), VenueError> {
    if venue.closed {
        return Err(VenueError::AlreadyClosed);
    }
    venue.apply_and_enqueue(VenueEvent::Closed(VenueClosed {
        reason: reason.to_string(),
    }))?;
    Ok(())
}
