use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::Context;
use crossbeam::atomic::AtomicCell;
use rodio::{Decoder, OutputStream, Sink};

const POLL_PERIOD: Duration = Duration::from_millis(50);

/// Plays an audio file on the default output device and blocks until it ends
/// or `cancel` is set.
pub fn play_blocking(path: &Path, cancel: &AtomicCell<bool>) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
    let source =
        Decoder::new(BufReader::new(file)).with_context(|| format!("Decoding {path:?}"))?;
    let (_stream, handle) = OutputStream::try_default().context("Opening audio output")?;
    let sink = Sink::try_new(&handle).context("Creating audio sink")?;
    sink.append(source);
    while !sink.empty() {
        if cancel.load() {
            sink.stop();
            break;
        }
        std::thread::sleep(POLL_PERIOD);
    }
    Ok(())
}
