//! Tour engine — traversal state, message rendering, and orchestration.

pub mod manager;
pub mod status;
pub mod view;

pub use manager::TourManager;
pub use status::{ExitReason, NavAction, TourStatus};
