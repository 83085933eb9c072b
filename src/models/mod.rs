pub mod event;
pub mod location;
pub mod session;

pub use event::{EventRecord, EventType};
pub use location::Location;
pub use session::{
    ActiveTrackerMirror, BehaviorSummary, DeviceInfo, DeviceType, PointerPosition, SessionRecord,
};
