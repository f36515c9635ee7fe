use std::future::Future;

use follow_common::RangeReadings;

#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error("Radio link failure: {0}")]
    Link(String),
    #[error("The vehicle is not armed")]
    NotArmed,
    #[error("Cannot ramp to a height of {0} m")]
    UnreachableHeight(f32),
    #[error("The vehicle is not flying")]
    NotFlying,
    #[error("Range sensors failed: {0}")]
    Sensors(String),
}

/// The part of the flight stack that turns velocity commands into flight.
///
/// Everything below this trait (radio, state estimation, motor mixing) belongs
/// to the vehicle.
pub trait FlightController {
    /// Asks the vehicle to arm its motors.
    fn arm(&mut self) -> impl Future<Output = Result<(), VehicleError>>;

    /// Climbs to `height` meters and resolves once it is reached.
    fn take_off(&mut self, height: f32) -> impl Future<Output = Result<(), VehicleError>>;

    /// Sets the body frame velocity in m/s.
    ///
    /// The command is held until the next call.
    fn set_velocity(
        &mut self,
        vx: f32,
        vy: f32,
        vz: f32,
    ) -> impl Future<Output = Result<(), VehicleError>>;

    /// Descends to the ground and stops the motors.
    fn land(&mut self) -> impl Future<Output = Result<(), VehicleError>>;

    /// Stops the motors immediately, wherever the vehicle is.
    fn emergency_stop(&mut self) -> impl Future<Output = Result<(), VehicleError>>;
}

pub trait RangeSensors {
    /// Returns the most recent readings without waiting for new ones.
    fn readings(&self) -> RangeReadings;
}
