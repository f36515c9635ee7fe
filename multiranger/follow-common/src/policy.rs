use serde::Deserialize;

use crate::ranges::{Direction, RangeReadings};

pub const DESIRED_DISTANCE: f32 = 0.5;
pub const MIN_DISTANCE: f32 = 0.3;
pub const MAX_DISTANCE: f32 = 1.0;
pub const VELOCITY: f32 = 0.3;
/// Anything closer than this above the vehicle ends the flight.
pub const CEILING_CLEARANCE: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    TooFar,
    TooClose,
    Hold,
}

/// Horizontal velocity in the body frame, m/s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
}

impl Velocity {
    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub direction: Direction,
    pub distance: f32,
    pub zone: Zone,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Something is too close overhead. Stop following and land.
    Stop,
    Move {
        target: Option<Target>,
        velocity: Velocity,
    },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PolicyError {
    #[error("{name} must be finite, got {value}")]
    NotFinite { name: &'static str, value: f32 },
    #[error("min_distance must be positive, got {0}")]
    NonPositiveMin(f32),
    #[error("distances must satisfy min <= desired <= max, got {min} / {desired} / {max}")]
    UnorderedDistances { min: f32, desired: f32, max: f32 },
    #[error("velocity must be positive, got {0}")]
    NonPositiveVelocity(f32),
    #[error("ceiling_clearance must not be negative, got {0}")]
    NegativeClearance(f32),
}

/// Maps the nearest obstacle to a velocity command.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FollowPolicy {
    /// The standoff the band is centered on. Only used for validation and reporting.
    pub desired_distance: f32,
    /// Closer than this, back away.
    pub min_distance: f32,
    /// Farther than this, close in.
    pub max_distance: f32,
    pub velocity: f32,
    pub ceiling_clearance: f32,
}

impl Default for FollowPolicy {
    fn default() -> Self {
        Self {
            desired_distance: DESIRED_DISTANCE,
            min_distance: MIN_DISTANCE,
            max_distance: MAX_DISTANCE,
            velocity: VELOCITY,
            ceiling_clearance: CEILING_CLEARANCE,
        }
    }
}

impl FollowPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        for (name, value) in [
            ("desired_distance", self.desired_distance),
            ("min_distance", self.min_distance),
            ("max_distance", self.max_distance),
            ("velocity", self.velocity),
            ("ceiling_clearance", self.ceiling_clearance),
        ] {
            if !value.is_finite() {
                return Err(PolicyError::NotFinite { name, value });
            }
        }
        if self.min_distance <= 0.0 {
            return Err(PolicyError::NonPositiveMin(self.min_distance));
        }
        if self.min_distance > self.desired_distance || self.desired_distance > self.max_distance {
            return Err(PolicyError::UnorderedDistances {
                min: self.min_distance,
                desired: self.desired_distance,
                max: self.max_distance,
            });
        }
        if self.velocity <= 0.0 {
            return Err(PolicyError::NonPositiveVelocity(self.velocity));
        }
        if self.ceiling_clearance < 0.0 {
            return Err(PolicyError::NegativeClearance(self.ceiling_clearance));
        }
        Ok(())
    }

    /// Both ends of the band count as holding.
    pub fn zone(&self, distance: f32) -> Zone {
        if distance > self.max_distance {
            Zone::TooFar
        } else if distance < self.min_distance {
            Zone::TooClose
        } else {
            Zone::Hold
        }
    }

    pub fn velocity_for(&self, direction: Direction, distance: f32) -> Velocity {
        let speed = match self.zone(distance) {
            Zone::TooFar => self.velocity,
            Zone::TooClose => -self.velocity,
            Zone::Hold => return Velocity::default(),
        };
        let (x, y) = direction.axis();
        // Multiplying by the zero axis component would give -0.0
        Velocity {
            vx: if x == 0.0 { 0.0 } else { x * speed },
            vy: if y == 0.0 { 0.0 } else { y * speed },
        }
    }

    pub fn decide(&self, readings: &RangeReadings) -> Decision {
        if let Some(up) = readings.up {
            if up < self.ceiling_clearance {
                return Decision::Stop;
            }
        }
        match readings.nearest() {
            Some((direction, distance)) => Decision::Move {
                target: Some(Target {
                    direction,
                    distance,
                    zone: self.zone(distance),
                }),
                velocity: self.velocity_for(direction, distance),
            },
            None => Decision::Move {
                target: None,
                velocity: Velocity::default(),
            },
        }
    }
}
