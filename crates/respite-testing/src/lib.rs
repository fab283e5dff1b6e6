//! Testing utilities for the Respite engine.
//!
//! - [`ManualClock`]: a [`WallClock`](respite_core::WallClock) moved by hand
//! - [`RecordingSink`]: keeps every published transition
//! - [`fixtures`]: protocols, a catalog covering every element kind, and a
//!   [`TestContext`](fixtures::TestContext) wiring the two together
//! - [`driver`]: pump time second by second and filter event streams

mod clock;
pub mod driver;
pub mod fixtures;
mod sink;

pub use clock::ManualClock;
pub use sink::RecordingSink;
