//! Live page view mirrored to the dashboard
//!
//! Two delivery modes behind one entry point. Frame push subscribes to the
//! browser's own screencast stream and acknowledges every frame; polling
//! captures screenshots on a fixed interval. Either way each frame reaches
//! the dashboard as a base64 data URL, and a dead session stops the stream
//! instead of erroring the whole evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, EventScreencastFrame,
    ScreencastFrameAckParams, StartScreencastFormat, StartScreencastParams, StopScreencastParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use webeval_core::config::{FrameFormat, ScreencastConfig, ScreencastMode};
use webeval_core::LogKind;
use webeval_relay::Relay;

use crate::error::{cdp_session_closed, Result};

/// Running screencast for the active page.
///
/// The shared flag is the one the input relay checks as its precondition;
/// it is set on start and cleared on stop or when the session dies.
pub struct Screencast {
    mode: ScreencastMode,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Screencast {
    /// Start mirroring the page in the configured mode.
    pub async fn start(
        page: &Page,
        config: &ScreencastConfig,
        relay: Relay,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        match config.mode {
            ScreencastMode::FramePush => start_frame_push(page, config, relay, running).await,
            ScreencastMode::Polling => Ok(start_polling(page, config, relay, running)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the stream and its forward task.
    ///
    /// Pass the page when it is still alive so the browser-side screencast
    /// is stopped too; with `None` only the local side is shut down.
    pub async fn stop(self, page: Option<&Page>) {
        self.running.store(false, Ordering::SeqCst);

        if self.mode == ScreencastMode::FramePush {
            if let Some(page) = page {
                if let Err(e) = page.execute(StopScreencastParams::default()).await {
                    debug!("Could not stop screencast cleanly: {}", e);
                }
            }
        }

        self.task.abort();
        debug!("Screencast stopped");
    }
}

/// Build the screencast start command from the configuration.
fn start_params(config: &ScreencastConfig) -> StartScreencastParams {
    let format = match config.format {
        FrameFormat::Jpeg => StartScreencastFormat::Jpeg,
        FrameFormat::Png => StartScreencastFormat::Png,
    };
    StartScreencastParams::builder()
        .format(format)
        .quality(config.quality as i64)
        .max_width(config.max_width as i64)
        .max_height(config.max_height as i64)
        .build()
}

fn data_url(mime: &str, base64: &str) -> String {
    format!("data:{};base64,{}", mime, base64)
}

async fn start_frame_push(
    page: &Page,
    config: &ScreencastConfig,
    relay: Relay,
    running: Arc<AtomicBool>,
) -> Result<Screencast> {
    // Subscribe before starting so the first frame is not lost
    let mut frames = page.event_listener::<EventScreencastFrame>().await?;
    page.execute(start_params(config)).await?;
    running.store(true, Ordering::SeqCst);

    let mime = config.format.mime();
    let task = {
        let page = page.clone();
        let relay = relay.clone();
        let running = running.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let data: &str = frame.data.as_ref();
                relay.frame(data_url(mime, data));

                // The browser holds the next frame until this one is acked
                let ack = match ScreencastFrameAckParams::builder()
                    .session_id(frame.session_id)
                    .build()
                {
                    Ok(params) => params,
                    Err(e) => {
                        warn!("Bad screencast ack params: {}", e);
                        continue;
                    }
                };
                if let Err(e) = page.execute(ack).await {
                    if cdp_session_closed(&e) {
                        warn!("Browser session closed while acknowledging frame");
                        relay.log(
                            LogKind::Status,
                            "Screencast stopped: browser session closed",
                        );
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    warn!("Failed to acknowledge screencast frame: {}", e);
                    relay.log(
                        LogKind::Status,
                        format!("Failed to acknowledge screencast frame: {}", e),
                    );
                }
            }
            running.store(false, Ordering::SeqCst);
            debug!("Screencast frame loop ended");
        })
    };

    info!("Screencast started (frame push)");
    relay.log(LogKind::Status, "Screencast started.");

    Ok(Screencast {
        mode: ScreencastMode::FramePush,
        running,
        task,
    })
}

fn start_polling(
    page: &Page,
    config: &ScreencastConfig,
    relay: Relay,
    running: Arc<AtomicBool>,
) -> Screencast {
    running.store(true, Ordering::SeqCst);

    let interval = Duration::from_millis(config.poll_interval_ms.max(16));
    let jpeg = config.format == FrameFormat::Jpeg;
    let quality = config.quality as i64;
    let mime = config.format.mime();
    let format = match config.format {
        FrameFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        FrameFormat::Png => CaptureScreenshotFormat::Png,
    };

    let task = {
        let page = page.clone();
        let relay = relay.clone();
        let running = running.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let mut builder = CaptureScreenshotParams::builder().format(format.clone());
                if jpeg {
                    builder = builder.quality(quality);
                }
                match page.execute(builder.build()).await {
                    Ok(resp) => {
                        let data: &str = resp.data.as_ref();
                        relay.frame(data_url(mime, data));
                    }
                    Err(e) if cdp_session_closed(&e) => {
                        warn!("Screencast polling stopped: {}", e);
                        relay.log(
                            LogKind::Status,
                            "Screencast stopped: browser session closed",
                        );
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    // Transient capture failures (mid-navigation) are skipped
                    Err(e) => debug!("Screenshot poll failed: {}", e),
                }
            }
            debug!("Screencast poll loop ended");
        })
    };

    info!("Screencast started (polling every {:?})", interval);
    relay.log(LogKind::Status, "Screencast started.");

    Screencast {
        mode: ScreencastMode::Polling,
        running,
        task,
    }
}
