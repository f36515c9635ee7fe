//! Decision logic for keeping a standoff distance from the nearest obstacle.
//!
//! Nothing in here talks to hardware. The flight loop feeds [`RangeReadings`]
//! into a [`FollowPolicy`] and forwards the resulting [`Decision`] to whatever
//! is flying.

pub mod policy;
pub mod ranges;

pub use policy::{Decision, FollowPolicy, PolicyError, Target, Velocity, Zone};
pub use ranges::{millimeters_to_meters, Direction, RangeReadings, OUT_OF_RANGE_MM};
