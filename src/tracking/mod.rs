pub mod activity;
pub mod buffer;
pub mod scroll;

pub use activity::{ActivityClock, ActivityMonitor, ActivitySnapshot};
pub use buffer::{Checkpoint, EventBuffer};
pub use scroll::{ScrollAttention, ScrollZone};
