//! Time-windowed reading storage
//!
//! - [`SlidingWindow`]: generic age and capacity bounded queue
//! - [`WindowStore`]: per-device reading windows with loss rate, duplicate
//!   detection and rolling averages

mod sliding;
mod store;

pub use sliding::{PushOutcome, SlidingWindow, Timestamped};
pub use store::{WindowAdd, WindowStore};
