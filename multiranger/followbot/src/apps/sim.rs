//! A kinematic stand-in for the drone and its range deck.
//!
//! The drone moves exactly as commanded, with no inertia, inside a
//! rectangular room. Range readings are ray casts along the body axes.
use std::{sync::Arc, time::Duration};

use anyhow::Context;
use follow_common::RangeReadings;
use nalgebra::Vector2;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::info;

use crate::{
    config::SimConfig,
    control::{forward_ctrl_c, run_follow, Interrupts},
    vehicle::{FlightController, RangeSensors, VehicleError},
};

/// Climb and descent rate for take off and landing, m/s.
pub const VERTICAL_SPEED: f32 = 0.2;

/// A vertical cylinder, such as a person or a post.
#[derive(Debug, Clone, Deserialize)]
pub struct SimObstacle {
    pub center: [f32; 2],
    pub radius: f32,
    /// Constant drift in m/s, starting when the simulation starts.
    #[serde(default)]
    pub velocity: [f32; 2],
}

/// A horizontal disc hanging at `height`, such as a shelf or a hand held above.
#[derive(Debug, Clone, Deserialize)]
pub struct SimOverhang {
    pub center: [f32; 2],
    pub radius: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimScenario {
    /// Half extents of the room along x and y, centered on the origin.
    pub room: [f32; 2],
    pub ceiling: Option<f32>,
    /// Readings farther than this are reported as nothing detected.
    pub sensor_range: f32,
    pub start: [f32; 2],
    pub obstacles: Vec<SimObstacle>,
    pub overhangs: Vec<SimOverhang>,
}

impl Default for SimScenario {
    fn default() -> Self {
        Self {
            room: [3.0, 3.0],
            ceiling: Some(2.5),
            sensor_range: 4.0,
            start: [0.0, 0.0],
            obstacles: vec![SimObstacle {
                center: [1.6, 0.0],
                radius: 0.15,
                velocity: [0.0, 0.0],
            }],
            overhangs: vec![],
        }
    }
}

struct SimWorld {
    scenario: SimScenario,
    started: Instant,
    last_update: Instant,
    position: Vector2<f32>,
    height: f32,
    velocity: Vector2<f32>,
    climb_rate: f32,
    armed: bool,
    flying: bool,
}

impl SimWorld {
    fn advance(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_update).as_secs_f32();
        self.last_update = now;

        self.position += self.velocity * dt;
        let [hx, hy] = self.scenario.room;
        self.position.x = self.position.x.clamp(-hx, hx);
        self.position.y = self.position.y.clamp(-hy, hy);

        self.height = (self.height + self.climb_rate * dt).max(0.0);
        if let Some(ceiling) = self.scenario.ceiling {
            self.height = self.height.min(ceiling);
        }
    }

    fn obstacle_center(&self, obstacle: &SimObstacle) -> Vector2<f32> {
        let elapsed = (self.last_update - self.started).as_secs_f32();
        Vector2::from(obstacle.center) + Vector2::from(obstacle.velocity) * elapsed
    }

    fn cast(&self, axis: Vector2<f32>) -> Option<f32> {
        let [hx, hy] = self.scenario.room;
        let mut nearest = f32::INFINITY;

        if axis.x > 0.0 {
            nearest = nearest.min((hx - self.position.x) / axis.x);
        } else if axis.x < 0.0 {
            nearest = nearest.min((-hx - self.position.x) / axis.x);
        }
        if axis.y > 0.0 {
            nearest = nearest.min((hy - self.position.y) / axis.y);
        } else if axis.y < 0.0 {
            nearest = nearest.min((-hy - self.position.y) / axis.y);
        }

        for obstacle in &self.scenario.obstacles {
            let center = self.obstacle_center(obstacle);
            if let Some(t) = ray_circle(self.position, axis, center, obstacle.radius) {
                nearest = nearest.min(t);
            }
        }

        (nearest <= self.scenario.sensor_range).then_some(nearest)
    }

    fn clearance_above(&self) -> Option<f32> {
        let mut nearest = self
            .scenario
            .ceiling
            .map(|ceiling| ceiling - self.height)
            .unwrap_or(f32::INFINITY);

        for overhang in &self.scenario.overhangs {
            let horizontal = (self.position - Vector2::from(overhang.center)).norm();
            if horizontal <= overhang.radius && overhang.height >= self.height {
                nearest = nearest.min(overhang.height - self.height);
            }
        }

        (nearest <= self.scenario.sensor_range).then_some(nearest)
    }

    fn readings(&mut self) -> RangeReadings {
        self.advance();
        RangeReadings {
            front: self.cast(Vector2::new(1.0, 0.0)),
            back: self.cast(Vector2::new(-1.0, 0.0)),
            left: self.cast(Vector2::new(0.0, 1.0)),
            right: self.cast(Vector2::new(0.0, -1.0)),
            up: self.clearance_above(),
        }
    }
}

/// Distance along the unit ray `origin + t * axis` to the circle, if it is hit ahead.
fn ray_circle(
    origin: Vector2<f32>,
    axis: Vector2<f32>,
    center: Vector2<f32>,
    radius: f32,
) -> Option<f32> {
    let offset = origin - center;
    let b = offset.dot(&axis);
    let c = offset.norm_squared() - radius * radius;
    if c <= 0.0 {
        // inside the obstacle
        return Some(0.0);
    }
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let t = -b - discriminant.sqrt();
    (t >= 0.0).then_some(t)
}

/// Creates the flight controller and range deck of one simulated drone.
pub fn sim_drone(scenario: SimScenario) -> (SimDrone, SimRangers) {
    let now = Instant::now();
    let world = Arc::new(Mutex::new(SimWorld {
        position: Vector2::from(scenario.start),
        scenario,
        started: now,
        last_update: now,
        height: 0.0,
        velocity: Vector2::zeros(),
        climb_rate: 0.0,
        armed: false,
        flying: false,
    }));
    (SimDrone { world: world.clone() }, SimRangers { world })
}

pub struct SimDrone {
    world: Arc<Mutex<SimWorld>>,
}

impl SimDrone {
    async fn ramp_to(&mut self, height: f32) -> Result<(), VehicleError> {
        let duration = {
            let mut world = self.world.lock();
            world.advance();
            let delta = height - world.height;
            let duration = Duration::try_from_secs_f32(delta.abs() / VERTICAL_SPEED)
                .map_err(|_| VehicleError::UnreachableHeight(height))?;
            world.velocity = Vector2::zeros();
            world.climb_rate = VERTICAL_SPEED.copysign(delta);
            duration
        };
        tokio::time::sleep(duration).await;
        let mut world = self.world.lock();
        world.advance();
        world.climb_rate = 0.0;
        world.height = height;
        Ok(())
    }
}

impl FlightController for SimDrone {
    async fn arm(&mut self) -> Result<(), VehicleError> {
        self.world.lock().armed = true;
        Ok(())
    }

    async fn take_off(&mut self, height: f32) -> Result<(), VehicleError> {
        {
            let mut world = self.world.lock();
            if !world.armed {
                return Err(VehicleError::NotArmed);
            }
            world.flying = true;
        }
        self.ramp_to(height).await
    }

    async fn set_velocity(&mut self, vx: f32, vy: f32, vz: f32) -> Result<(), VehicleError> {
        let mut world = self.world.lock();
        if !world.flying {
            return Err(VehicleError::NotFlying);
        }
        world.advance();
        world.velocity = Vector2::new(vx, vy);
        world.climb_rate = vz;
        Ok(())
    }

    async fn land(&mut self) -> Result<(), VehicleError> {
        if !self.world.lock().flying {
            return Err(VehicleError::NotFlying);
        }
        self.ramp_to(0.0).await?;
        let mut world = self.world.lock();
        world.flying = false;
        world.armed = false;
        Ok(())
    }

    async fn emergency_stop(&mut self) -> Result<(), VehicleError> {
        let mut world = self.world.lock();
        world.advance();
        world.velocity = Vector2::zeros();
        world.climb_rate = 0.0;
        world.height = 0.0;
        world.flying = false;
        world.armed = false;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SimRangers {
    world: Arc<Mutex<SimWorld>>,
}

impl SimRangers {
    pub fn position(&self) -> Vector2<f32> {
        let mut world = self.world.lock();
        world.advance();
        world.position
    }

    pub fn height(&self) -> f32 {
        let mut world = self.world.lock();
        world.advance();
        world.height
    }

    pub fn is_flying(&self) -> bool {
        self.world.lock().flying
    }
}

impl RangeSensors for SimRangers {
    fn readings(&self) -> RangeReadings {
        self.world.lock().readings()
    }
}

pub struct SimApp;

impl SimApp {
    pub async fn run(config: SimConfig) -> anyhow::Result<()> {
        let settings = config.control.settings()?;
        let time_limit = config.time_limit()?;
        let (mut drone, rangers) = sim_drone(config.scenario);

        let (tx, mut interrupts) = Interrupts::channel();
        forward_ctrl_c(tx.clone());
        if let Some(limit) = time_limit {
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                info!("Simulation time limit reached");
                let _ = tx.send(());
            });
        }

        let summary = run_follow(&mut drone, &rangers, &settings, &mut interrupts)
            .await
            .context("Simulated flight failed")?;

        let position = rangers.position();
        info!(
            reason = ?summary.stop_reason,
            iterations = summary.iterations,
            "Simulated drone landed at ({:.2}, {:.2})",
            position.x,
            position.y
        );
        Ok(())
    }
}
