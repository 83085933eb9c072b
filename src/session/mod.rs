pub mod controller;
pub mod state;
mod workers;

pub use controller::SessionController;
pub use state::{EndReason, LifecycleState};
