pub mod decoder;
pub mod event;
pub mod subscription;

pub use decoder::{EventDecoder, Frame, SseDecoder, StreamCursor};
pub use event::{event_types, Event, EventPayload, RunEvent, RunStatus, DEFAULT_EVENT_TYPE};
pub use subscription::{EventSubscription, StreamMessage};
