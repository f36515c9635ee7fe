use std::{sync::Arc, time::Duration};

use crazyflie_lib::Crazyflie;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{error, warn};

use crate::vehicle::{FlightController, VehicleError};

/// How often hover setpoints are streamed to the vehicle.
const SETPOINT_PERIOD: Duration = Duration::from_millis(100);
/// Climb and descent rate for take off and landing, m/s.
const VERTICAL_SPEED: f32 = 0.2;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Setpoint {
    vx: f32,
    vy: f32,
    vz: f32,
    height: f32,
}

/// The setpoint shared between the commander and the streaming task.
///
/// Every change is a read-modify-write under one lock so a streaming step
/// never writes back a stale velocity.
#[derive(Clone, Default)]
struct SharedSetpoint(Arc<Mutex<Setpoint>>);

impl SharedSetpoint {
    /// Integrates the vertical speed over `dt` seconds and returns what to send.
    fn step(&self, dt: f32) -> Setpoint {
        let mut setpoint = self.0.lock();
        setpoint.height = (setpoint.height + setpoint.vz * dt).max(0.0);
        *setpoint
    }

    fn set_velocity(&self, vx: f32, vy: f32, vz: f32) {
        let mut setpoint = self.0.lock();
        setpoint.vx = vx;
        setpoint.vy = vy;
        setpoint.vz = vz;
    }

    /// Stops horizontal motion and starts climbing or descending towards `height`.
    ///
    /// Returns how long the ramp takes.
    fn begin_ramp(&self, height: f32) -> Result<Duration, VehicleError> {
        let mut setpoint = self.0.lock();
        let delta = height - setpoint.height;
        let duration = Duration::try_from_secs_f32(delta.abs() / VERTICAL_SPEED)
            .map_err(|_| VehicleError::UnreachableHeight(height))?;
        setpoint.vx = 0.0;
        setpoint.vy = 0.0;
        setpoint.vz = VERTICAL_SPEED.copysign(delta);
        Ok(duration)
    }

    fn finish_ramp(&self, height: f32) {
        let mut setpoint = self.0.lock();
        setpoint.vz = 0.0;
        setpoint.height = height;
    }

    fn reset(&self) {
        *self.0.lock() = Setpoint::default();
    }

    #[cfg(test)]
    fn get(&self) -> Setpoint {
        *self.0.lock()
    }
}

pub(super) fn link_error(e: crazyflie_lib::Error) -> VehicleError {
    VehicleError::Link(e.to_string())
}

/// Streams hover setpoints so the vehicle holds a velocity and a height.
///
/// The firmware drops out of velocity mode if setpoints stop arriving, so a
/// background task keeps resending the latest one while flying.
pub struct HoverCommander {
    cf: Arc<Crazyflie>,
    setpoint: SharedSetpoint,
    link_failed: Arc<AtomicCell<bool>>,
    task: Option<JoinHandle<()>>,
}

impl HoverCommander {
    pub fn new(cf: Arc<Crazyflie>) -> Self {
        Self {
            cf,
            setpoint: SharedSetpoint::default(),
            link_failed: Arc::default(),
            task: None,
        }
    }

    fn spawn_streaming(&mut self) {
        let cf = self.cf.clone();
        let setpoint = self.setpoint.clone();
        let link_failed = self.link_failed.clone();

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(SETPOINT_PERIOD);
            let mut last = Instant::now();
            loop {
                interval.tick().await;
                let now = Instant::now();
                let dt = (now - last).as_secs_f32();
                last = now;

                let current = setpoint.step(dt);

                if let Err(e) = cf
                    .commander
                    .setpoint_hover(current.vx, current.vy, 0.0, current.height)
                    .await
                {
                    error!("Failed to send hover setpoint: {e}");
                    link_failed.store(true);
                }
            }
        }));
    }

    fn stop_streaming(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn check_link(&self) -> Result<(), VehicleError> {
        if self.link_failed.swap(false) {
            Err(VehicleError::Link("hover setpoints are not getting through".into()))
        } else {
            Ok(())
        }
    }

    async fn ramp_to(&mut self, height: f32) -> Result<(), VehicleError> {
        let duration = self.setpoint.begin_ramp(height)?;
        tokio::time::sleep(duration).await;
        self.setpoint.finish_ramp(height);
        Ok(())
    }

    async fn cut_motors(&mut self) -> Result<(), VehicleError> {
        self.stop_streaming();
        self.setpoint.reset();
        self.cf.commander.setpoint_stop().await.map_err(link_error)?;
        self.cf
            .commander
            .notify_setpoint_stop(0)
            .await
            .map_err(link_error)
    }
}

impl FlightController for HoverCommander {
    async fn arm(&mut self) -> Result<(), VehicleError> {
        self.cf
            .platform
            .send_arming_request(true)
            .await
            .map_err(link_error)
    }

    async fn take_off(&mut self, height: f32) -> Result<(), VehicleError> {
        // Unlocks thrust before the first hover setpoint
        self.cf
            .commander
            .setpoint_rpyt(0.0, 0.0, 0.0, 0)
            .await
            .map_err(link_error)?;
        self.setpoint.reset();
        self.link_failed.store(false);
        self.spawn_streaming();
        self.ramp_to(height).await?;
        self.check_link()
    }

    async fn set_velocity(&mut self, vx: f32, vy: f32, vz: f32) -> Result<(), VehicleError> {
        if self.task.is_none() {
            return Err(VehicleError::NotFlying);
        }
        self.setpoint.set_velocity(vx, vy, vz);
        self.check_link()
    }

    async fn land(&mut self) -> Result<(), VehicleError> {
        if self.task.is_none() {
            return Err(VehicleError::NotFlying);
        }
        self.ramp_to(0.0).await?;
        self.cut_motors().await
    }

    async fn emergency_stop(&mut self) -> Result<(), VehicleError> {
        warn!("Cutting motors");
        self.cut_motors().await
    }
}

impl Drop for HoverCommander {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}
