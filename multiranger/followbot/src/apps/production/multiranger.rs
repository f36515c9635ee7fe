use std::sync::Arc;

use crazyflie_lib::{subsystems::log::LogPeriod, Crazyflie, Value};
use crossbeam::atomic::AtomicCell;
use follow_common::{millimeters_to_meters, RangeReadings, OUT_OF_RANGE_MM};
use tokio::task::JoinHandle;
use tracing::error;

use super::hover::link_error;
use crate::vehicle::{RangeSensors, VehicleError};

const FRONT: &str = "range.front";
const BACK: &str = "range.back";
const LEFT: &str = "range.left";
const RIGHT: &str = "range.right";
const UP: &str = "range.up";

/// Ranger log period in milliseconds.
const LOG_PERIOD_MS: u64 = 100;

fn as_f64(value: &Value) -> Option<f64> {
    match *value {
        Value::U8(v) => Some(v as f64),
        Value::U16(v) => Some(v as f64),
        Value::U32(v) => Some(v as f64),
        Value::I8(v) => Some(v as f64),
        Value::I16(v) => Some(v as f64),
        Value::I32(v) => Some(v as f64),
        Value::F32(v) => Some(v as f64),
        _ => None,
    }
}

/// The five rangers of the Multiranger deck, streamed over the log subsystem.
pub struct Multiranger {
    readings: Arc<AtomicCell<RangeReadings>>,
    task: JoinHandle<()>,
}

impl Multiranger {
    pub async fn start(cf: Arc<Crazyflie>) -> Result<Self, VehicleError> {
        let mut block = cf.log.create_block().await.map_err(link_error)?;
        for name in [FRONT, BACK, LEFT, RIGHT, UP] {
            block
                .add_variable(name)
                .await
                .map_err(|e| VehicleError::Sensors(format!("{name}: {e}")))?;
        }
        let period = LogPeriod::from_millis(LOG_PERIOD_MS).map_err(link_error)?;
        let stream = block.start(period).await.map_err(link_error)?;

        let readings: Arc<AtomicCell<RangeReadings>> = Arc::default();
        let readings2 = readings.clone();
        let task = tokio::spawn(async move {
            loop {
                let data = match stream.next().await {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Multiranger log stream ended: {e}");
                        readings2.store(RangeReadings::default());
                        break;
                    }
                };
                let get = |name: &str| {
                    data.data
                        .get(name)
                        .and_then(as_f64)
                        .and_then(|mm| millimeters_to_meters(mm, OUT_OF_RANGE_MM))
                };
                readings2.store(RangeReadings {
                    front: get(FRONT),
                    back: get(BACK),
                    left: get(LEFT),
                    right: get(RIGHT),
                    up: get(UP),
                });
            }
        });

        Ok(Self { readings, task })
    }
}

impl RangeSensors for Multiranger {
    fn readings(&self) -> RangeReadings {
        self.readings.load()
    }
}

impl Drop for Multiranger {
    fn drop(&mut self) {
        self.task.abort();
    }
}
