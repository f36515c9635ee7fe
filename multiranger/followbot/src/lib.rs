//! Keeps a quadrotor at a standoff distance from whatever is nearest to it.
//!
//! [`control::run_follow`] drives anything implementing the [`vehicle`] traits.
//! [`apps`] holds the two things it can drive: a simulated room and, with
//! the `production` feature, a Crazyflie over the radio.

pub mod apps;
pub mod config;
pub mod control;
pub mod logging;
pub mod vehicle;
