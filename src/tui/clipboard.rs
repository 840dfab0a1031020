//! Copying the saved result path to the system clipboard.
//!
//! arboard wants a live `Clipboard` while Linux clipboard managers pick the text up,
//! so copies are handed to one long-lived worker thread instead of the UI thread.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a clipboard owner is kept alive after a successful copy.
const HOLD: Duration = Duration::from_secs(2);

static WORKER: OnceLock<Sender<PathBuf>> = OnceLock::new();

fn worker() -> Result<&'static Sender<PathBuf>> {
    if let Some(tx) = WORKER.get() {
        return Ok(tx);
    }
    let (tx, rx) = mpsc::channel::<PathBuf>();
    std::thread::Builder::new()
        .name("hardhat-clipboard".into())
        .spawn(move || {
            for path in rx {
                let text = path.display().to_string();
                match arboard::Clipboard::new().and_then(|mut cb| {
                    cb.set_text(text.as_str())?;
                    Ok(cb)
                }) {
                    Ok(_owner) => {
                        debug!(path = %text, "result path copied");
                        std::thread::sleep(HOLD);
                    }
                    Err(e) => warn!(error = %e, "clipboard unavailable"),
                }
            }
        })
        .context("spawn clipboard thread")?;
    // A concurrent first use may have won; its sender is just as good.
    Ok(WORKER.get_or_init(|| tx))
}

/// Queue the saved result path for the clipboard.
pub fn copy_saved_path(path: &Path) -> Result<()> {
    worker()?
        .send(path.to_path_buf())
        .map_err(|_| anyhow::anyhow!("clipboard thread stopped"))
}
