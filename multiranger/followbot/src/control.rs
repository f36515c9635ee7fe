use std::time::Duration;

use anyhow::Context;
use follow_common::{Decision, FollowPolicy};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::MissedTickBehavior,
};
use tracing::{error, info, warn};

use crate::vehicle::{FlightController, RangeSensors, VehicleError};

pub const UPDATE_PERIOD: Duration = Duration::from_millis(100);
pub const TAKEOFF_HEIGHT: f32 = 0.3;
/// Highest take off the flow deck can hold, meters.
pub const MAX_TAKEOFF_HEIGHT: f32 = 4.0;
pub const ARMING_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct ControlSettings {
    pub policy: FollowPolicy,
    pub update_period: Duration,
    pub takeoff_height: f32,
    pub arming_delay: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            policy: FollowPolicy::default(),
            update_period: UPDATE_PERIOD,
            takeoff_height: TAKEOFF_HEIGHT,
            arming_delay: ARMING_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ObstacleAbove,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightSummary {
    pub stop_reason: StopReason,
    /// Control steps taken while airborne.
    pub iterations: u64,
}

/// Operator requests to stop, usually Ctrl-C.
///
/// The first one ends the follow loop. One more while landing cuts the motors.
pub struct Interrupts {
    rx: UnboundedReceiver<()>,
}

impl Interrupts {
    pub fn channel() -> (UnboundedSender<()>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Forwards every Ctrl-C received by the process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ctrl_c() -> Self {
        let (tx, interrupts) = Self::channel();
        forward_ctrl_c(tx);
        interrupts
    }

    /// Resolves on the next interrupt. Never resolves once every sender is gone.
    pub async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sends `()` into `tx` on every Ctrl-C until the receiver is dropped.
pub fn forward_ctrl_c(tx: UnboundedSender<()>) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
                break;
            }
            if tx.send(()).is_err() {
                break;
            }
        }
    });
}

/// Arms, takes off, follows the nearest obstacle until told to stop, then lands.
///
/// Landing is attempted whenever the vehicle left the ground, even if the
/// follow loop failed. The loop error is returned in that case.
pub async fn run_follow<V, S>(
    vehicle: &mut V,
    sensors: &S,
    settings: &ControlSettings,
    interrupts: &mut Interrupts,
) -> anyhow::Result<FlightSummary>
where
    V: FlightController,
    S: RangeSensors,
{
    settings
        .policy
        .validate()
        .context("Invalid follow policy")?;

    vehicle.arm().await.context("Failed to arm the vehicle")?;
    let interrupted = tokio::select! {
        _ = tokio::time::sleep(settings.arming_delay) => false,
        _ = interrupts.recv() => true,
    };
    if interrupted {
        warn!("Interrupted before take off");
        return Ok(FlightSummary {
            stop_reason: StopReason::Interrupted,
            iterations: 0,
        });
    }

    info!(height = settings.takeoff_height, "Taking off");
    if let Err(e) = vehicle.take_off(settings.takeoff_height).await {
        if let Err(land_err) = land(vehicle, interrupts).await {
            error!("Failed to land after aborted take off: {land_err}");
        }
        return Err(e).context("Failed to take off");
    }

    info!("Following started. Put a hand or an object near the drone. Ctrl-C to stop.");
    let outcome = follow(vehicle, sensors, settings, interrupts).await;
    let landing = land(vehicle, interrupts).await;

    match (outcome, landing) {
        (Ok(summary), Ok(())) => {
            info!(
                reason = ?summary.stop_reason,
                iterations = summary.iterations,
                "Flight finished"
            );
            Ok(summary)
        }
        (Ok(_), Err(e)) => Err(e).context("Failed to land"),
        (Err(e), landing) => {
            if let Err(land_err) = landing {
                error!("Failed to land after control error: {land_err}");
            }
            Err(e)
        }
    }
}

async fn follow<V, S>(
    vehicle: &mut V,
    sensors: &S,
    settings: &ControlSettings,
    interrupts: &mut Interrupts,
) -> anyhow::Result<FlightSummary>
where
    V: FlightController,
    S: RangeSensors,
{
    let mut interval = tokio::time::interval(settings.update_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut iterations = 0u64;

    loop {
        let interrupted = tokio::select! {
            _ = interval.tick() => false,
            _ = interrupts.recv() => true,
        };
        if interrupted {
            warn!("Manual interrupt, stopping flight");
            return Ok(FlightSummary {
                stop_reason: StopReason::Interrupted,
                iterations,
            });
        }
        iterations += 1;

        let readings = sensors.readings();
        match settings.policy.decide(&readings) {
            Decision::Stop => {
                warn!(up = ?readings.up, "Obstacle detected above, stopping flight");
                return Ok(FlightSummary {
                    stop_reason: StopReason::ObstacleAbove,
                    iterations,
                });
            }
            Decision::Move { target, velocity } => {
                if let Some(target) = target {
                    info!(
                        "Dir: {:>5} | Dist: {:.2} m | v=({:.2}, {:.2})",
                        target.direction, target.distance, velocity.vx, velocity.vy
                    );
                }
                vehicle
                    .set_velocity(velocity.vx, velocity.vy, 0.0)
                    .await
                    .context("Failed to send velocity command")?;
            }
        }
    }
}

async fn land<V: FlightController>(
    vehicle: &mut V,
    interrupts: &mut Interrupts,
) -> Result<(), VehicleError> {
    info!("Landing");
    let landed = tokio::select! {
        result = vehicle.land() => Some(result),
        _ = interrupts.recv() => None,
    };
    match landed {
        Some(result) => result,
        None => {
            warn!("Interrupted while landing, stopping motors");
            vehicle.emergency_stop().await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use follow_common::RangeReadings;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Arm,
        TakeOff(f32),
        Velocity(f32, f32, f32),
        Land,
        EmergencyStop,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        fail_velocity_after: Option<usize>,
        landing_time: Duration,
    }

    impl FlightController for Recorder {
        async fn arm(&mut self) -> Result<(), VehicleError> {
            self.calls.push(Call::Arm);
            Ok(())
        }

        async fn take_off(&mut self, height: f32) -> Result<(), VehicleError> {
            self.calls.push(Call::TakeOff(height));
            Ok(())
        }

        async fn set_velocity(&mut self, vx: f32, vy: f32, vz: f32) -> Result<(), VehicleError> {
            let sent = self
                .calls
                .iter()
                .filter(|c| matches!(c, Call::Velocity(..)))
                .count();
            if self.fail_velocity_after == Some(sent) {
                return Err(VehicleError::Link("dropped".into()));
            }
            self.calls.push(Call::Velocity(vx, vy, vz));
            Ok(())
        }

        async fn land(&mut self) -> Result<(), VehicleError> {
            if !self.landing_time.is_zero() {
                tokio::time::sleep(self.landing_time).await;
            }
            self.calls.push(Call::Land);
            Ok(())
        }

        async fn emergency_stop(&mut self) -> Result<(), VehicleError> {
            self.calls.push(Call::EmergencyStop);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Scripted(Arc<Mutex<RangeReadings>>);

    impl RangeSensors for Scripted {
        fn readings(&self) -> RangeReadings {
            *self.0.lock()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_ceiling_and_lands() {
        let mut vehicle = Recorder::default();
        let sensors = Scripted::default();
        *sensors.0.lock() = RangeReadings {
            front: Some(2.0),
            ..Default::default()
        };
        let (_tx, mut interrupts) = Interrupts::channel();

        let readings = sensors.0.clone();
        tokio::spawn(async move {
            // arming delay plus a few steps
            tokio::time::sleep(Duration::from_millis(1250)).await;
            readings.lock().up = Some(0.1);
        });

        let settings = ControlSettings::default();
        let summary = run_follow(&mut vehicle, &sensors, &settings, &mut interrupts)
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::ObstacleAbove);
        assert_eq!(vehicle.calls[0], Call::Arm);
        assert_eq!(vehicle.calls[1], Call::TakeOff(TAKEOFF_HEIGHT));
        assert_eq!(vehicle.calls.last(), Some(&Call::Land));
        let velocities: Vec<_> = vehicle.calls[2..vehicle.calls.len() - 1].to_vec();
        assert!(!velocities.is_empty());
        assert!(velocities.iter().all(|c| *c == Call::Velocity(0.3, 0.0, 0.0)));
        assert_eq!(summary.iterations as usize, velocities.len() + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_ends_loop() {
        let mut vehicle = Recorder::default();
        let sensors = Scripted::default();
        let (tx, mut interrupts) = Interrupts::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1550)).await;
            tx.send(()).unwrap();
            // Keep the sender alive so no second interrupt is implied
            std::future::pending::<()>().await;
        });

        let settings = ControlSettings::default();
        let summary = run_follow(&mut vehicle, &sensors, &settings, &mut interrupts)
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert!(summary.iterations >= 5);
        // No target in view, so the vehicle is told to hover
        assert!(vehicle.calls[2..vehicle.calls.len() - 1]
            .iter()
            .all(|c| *c == Call::Velocity(0.0, 0.0, 0.0)));
        assert_eq!(vehicle.calls.last(), Some(&Call::Land));
    }

    #[tokio::test(start_paused = true)]
    async fn second_interrupt_cuts_motors_while_landing() {
        let mut vehicle = Recorder {
            landing_time: Duration::from_secs(5),
            ..Default::default()
        };
        let sensors = Scripted::default();
        let (tx, mut interrupts) = Interrupts::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1550)).await;
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(()).unwrap();
            std::future::pending::<()>().await;
        });

        let settings = ControlSettings::default();
        let summary = run_follow(&mut vehicle, &sensors, &settings, &mut interrupts)
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Interrupted);
        assert_eq!(vehicle.calls.last(), Some(&Call::EmergencyStop));
        assert!(!vehicle.calls.contains(&Call::Land));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_before_take_off_stays_grounded() {
        let mut vehicle = Recorder::default();
        let sensors = Scripted::default();
        let (tx, mut interrupts) = Interrupts::channel();
        tx.send(()).unwrap();

        let settings = ControlSettings::default();
        let summary = run_follow(&mut vehicle, &sensors, &settings, &mut interrupts)
            .await
            .unwrap();

        assert_eq!(summary.iterations, 0);
        assert_eq!(vehicle.calls, vec![Call::Arm]);
    }

    #[tokio::test(start_paused = true)]
    async fn lands_after_link_error() {
        let mut vehicle = Recorder {
            fail_velocity_after: Some(3),
            ..Default::default()
        };
        let sensors = Scripted::default();
        let (_tx, mut interrupts) = Interrupts::channel();

        let result =
            run_follow(&mut vehicle, &sensors, &ControlSettings::default(), &mut interrupts).await;

        assert!(result.is_err());
        assert_eq!(vehicle.calls.last(), Some(&Call::Land));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_invalid_policy() {
        let mut vehicle = Recorder::default();
        let sensors = Scripted::default();
        let (_tx, mut interrupts) = Interrupts::channel();
        let mut settings = ControlSettings::default();
        settings.policy.min_distance = 2.0;

        let result = run_follow(&mut vehicle, &sensors, &settings, &mut interrupts).await;

        assert!(result.is_err());
        assert!(vehicle.calls.is_empty());
    }
}
