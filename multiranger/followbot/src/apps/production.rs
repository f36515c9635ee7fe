use std::sync::Arc;

use anyhow::Context;
use crazyflie_lib::{Crazyflie, NoTocCache};
use crazyflie_link::LinkContext;
use crossbeam::atomic::AtomicCell;
use tracing::{error, info, warn};

use crate::{
    config::FlyConfig,
    control::{run_follow, Interrupts},
};

mod finish_sound;
mod hover;
mod multiranger;

pub use hover::HoverCommander;
pub use multiranger::Multiranger;

/// Flies a real Crazyflie with a Flow deck and a Multiranger deck.
pub struct CrazyflieApp;

impl CrazyflieApp {
    pub async fn run(config: FlyConfig) -> anyhow::Result<()> {
        let settings = config.control.settings()?;

        info!(uri = %config.uri, "Connecting");
        let context = LinkContext::new();
        let cf = Crazyflie::connect_from_uri(&context, &config.uri, NoTocCache)
            .await
            .with_context(|| format!("Failed to connect to {}", config.uri))?;
        let cf = Arc::new(cf);
        info!("Connected");

        let rangers = Multiranger::start(cf.clone())
            .await
            .context("Failed to start the Multiranger log block")?;
        let mut commander = HoverCommander::new(cf.clone());
        let mut interrupts = Interrupts::ctrl_c();

        let result = run_follow(&mut commander, &rangers, &settings, &mut interrupts).await;

        drop(rangers);
        drop(commander);
        cf.disconnect().await;

        if let Some(path) = config.finish_sound {
            info!("Playing {path:?}, Ctrl-C to skip");
            let cancel = Arc::new(AtomicCell::new(false));
            let mut playback = tokio::task::spawn_blocking({
                let cancel = cancel.clone();
                move || finish_sound::play_blocking(&path, &cancel)
            });
            let finished = tokio::select! {
                result = &mut playback => Some(result),
                _ = interrupts.recv() => None,
            };
            let played = match finished {
                Some(result) => result,
                None => {
                    warn!("Skipping finish sound");
                    cancel.store(true);
                    playback.await
                }
            };
            match played {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to play finish sound: {e:#}"),
                Err(e) => error!("Finish sound thread failed: {e}"),
            }
        }
        info!("Demo finished");

        result.map(|_| ())
    }
}
