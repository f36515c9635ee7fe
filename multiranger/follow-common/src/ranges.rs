use std::fmt::Display;

/// Raw ranger values above this are reported when nothing is in view.
pub const OUT_OF_RANGE_MM: f64 = 8000.0;

/// One of the four horizontal range sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Front,
    Back,
    Left,
    Right,
}

impl Direction {
    /// Every horizontal direction, in the order ties are broken.
    pub const ALL: [Direction; 4] = [
        Direction::Front,
        Direction::Back,
        Direction::Left,
        Direction::Right,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Direction::Front => "front",
            Direction::Back => "back",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    /// Unit vector of the sensor axis in the body frame (front is `+x`, left is `+y`).
    pub fn axis(self) -> (f32, f32) {
        match self {
            Direction::Front => (1.0, 0.0),
            Direction::Back => (-1.0, 0.0),
            Direction::Left => (0.0, 1.0),
            Direction::Right => (0.0, -1.0),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

/// A snapshot of the five range sensors, in meters.
///
/// `None` means the sensor saw nothing within range or has not reported yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeReadings {
    pub front: Option<f32>,
    pub back: Option<f32>,
    pub left: Option<f32>,
    pub right: Option<f32>,
    pub up: Option<f32>,
}

impl RangeReadings {
    pub fn get(&self, direction: Direction) -> Option<f32> {
        match direction {
            Direction::Front => self.front,
            Direction::Back => self.back,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    /// Returns the horizontal direction with the smallest reading.
    ///
    /// Missing and non-finite readings are skipped. On a tie the direction
    /// that comes first in [`Direction::ALL`] wins.
    pub fn nearest(&self) -> Option<(Direction, f32)> {
        let mut nearest: Option<(Direction, f32)> = None;
        for direction in Direction::ALL {
            let Some(distance) = self.get(direction) else {
                continue;
            };
            if !distance.is_finite() {
                continue;
            }
            match nearest {
                Some((_, best)) if best <= distance => {}
                _ => nearest = Some((direction, distance)),
            }
        }
        nearest
    }
}

/// Converts a raw ranger value in millimeters to meters.
///
/// Values strictly above `out_of_range_mm` mean nothing was detected.
pub fn millimeters_to_meters(mm: f64, out_of_range_mm: f64) -> Option<f32> {
    if !mm.is_finite() || mm > out_of_range_mm {
        None
    } else {
        Some((mm / 1000.0) as f32)
    }
}
