//! Per-frame orchestration of detection, filtering, steering and commands
//!
//! Every iteration runs the same fixed sequence:
//!
//! 1. pull a frame; an exhausted source ends the loop
//! 2. detect the marker blob
//! 3. predict the marker position
//! 4. update the canvas
//! 5. with a canvas: refresh the draw mask, map the prediction into
//!    canvas-local pixels, correct the filter if the blob is on the canvas
//! 6. once per command interval: make sure the relay is connected, evaluate
//!    the policy and dispatch, then stamp the interval
//! 7. keepalive and stream checks
//!
//! Detection faults are logged and treated as a miss for that frame.
//! Network faults never leave this module. Only frame acquisition errors
//! and non-recoverable backend errors end the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::artwork::Artwork;
use crate::channel::{dialect_for, CommandChannel, CommandDialect, Connector, Interval, OutboundMessage};
use crate::config::{ServoConfig, StreamConfig};
use crate::detection::{canvas_strategy, CanvasStrategy, MarkerDetection, MarkerDetector};
use crate::error::Result;
use crate::geometry::{PixelPoint, Point2, Quad};
use crate::imaging::{ArtworkLayer, FrameSource, ImageOps, Overlay};
use crate::mask::DrawMaskCache;
use crate::navigation::{Decision, Intent, NavigationPolicy, PenState};
use crate::tracking::MarkerTracker;

/// Timers and dispatch bookkeeping carried across iterations
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub command: Interval,
    pub ping: Interval,
    pub stream: Interval,
    /// Last pen state the relay acknowledged receiving on this connection
    pub last_pen_sent: Option<PenState>,
    pub frames: u64,
}

impl LoopContext {
    pub fn new(config: &ServoConfig) -> Self {
        Self {
            command: Interval::new(config.command.command_interval()),
            ping: Interval::new(config.command.ping_interval()),
            stream: Interval::new(config.stream.frame_interval()),
            last_pen_sent: None,
            frames: 0,
        }
    }
}

/// What one iteration saw and did
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatus {
    /// 1-based frame counter
    pub frame: u64,
    pub connected: bool,
    pub canvas: Option<Quad>,
    pub predicted: Point2,
    /// Marker blob center, whether or not it was used
    pub marker: Option<PixelPoint>,
    /// The filter was corrected with this frame's blob
    pub corrected: bool,
    pub pen: Option<PenState>,
    /// Steering target in camera pixels
    pub target: Option<PixelPoint>,
    /// Motion the policy chose, if this was a command cycle
    pub decided: Option<Intent>,
    /// Intents actually written to the relay this iteration
    pub sent: Vec<Intent>,
    pub streamed: bool,
}

impl LoopStatus {
    pub fn has_canvas(&self) -> bool {
        self.canvas.is_some()
    }
}

/// The servo loop over a frame source, imaging backend and relay connector
pub struct ControlLoop<S, O, C>
where
    S: FrameSource<Frame = O::Frame>,
    O: ImageOps,
    C: Connector,
{
    source: S,
    ops: O,
    detector: MarkerDetector,
    tracker: MarkerTracker,
    canvas: Box<dyn CanvasStrategy<O>>,
    masks: DrawMaskCache,
    policy: NavigationPolicy,
    dialect: Box<dyn CommandDialect>,
    /// `None` runs without a relay
    channel: Option<CommandChannel<C>>,
    ctx: LoopContext,
    transmit_pen: bool,
    stream: StreamConfig,
    stop: Arc<AtomicBool>,
}

impl<S, O, C> ControlLoop<S, O, C>
where
    S: FrameSource<Frame = O::Frame>,
    O: ImageOps + 'static,
    O::Gray: 'static,
    C: Connector,
{
    pub fn new(
        config: &ServoConfig,
        source: S,
        ops: O,
        artwork: Artwork,
        channel: Option<CommandChannel<C>>,
    ) -> Self {
        Self {
            source,
            ops,
            detector: MarkerDetector::new(config.marker.clone()),
            tracker: MarkerTracker::new(&config.kalman),
            canvas: canvas_strategy::<O>(&config.canvas),
            masks: DrawMaskCache::new(artwork),
            policy: NavigationPolicy::new(config.navigation.clone()),
            dialect: dialect_for(&config.command.dialect),
            channel,
            ctx: LoopContext::new(config),
            transmit_pen: config.command.transmit_pen,
            stream: config.stream.clone(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<S, O, C> ControlLoop<S, O, C>
where
    S: FrameSource<Frame = O::Frame>,
    O: ImageOps,
    C: Connector,
{
    /// Shared flag that ends `run` at the next iteration boundary
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn context(&self) -> &LoopContext {
        &self.ctx
    }

    pub fn channel(&self) -> Option<&CommandChannel<C>> {
        self.channel.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(CommandChannel::is_connected)
    }

    /// Run until stopped or the source runs dry; returns the frame count
    ///
    /// # Errors
    ///
    /// Frame acquisition failures and non-recoverable backend errors.
    pub fn run(&mut self) -> Result<u64> {
        info!(canvas = self.canvas.name(), dialect = self.dialect.name(), "control loop started");
        while !self.stop.load(Ordering::Relaxed) {
            if self.step(Instant::now())?.is_none() {
                info!("frame source exhausted");
                break;
            }
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.disconnect();
        }
        info!(frames = self.ctx.frames, "control loop finished");
        Ok(self.ctx.frames)
    }

    /// One iteration at time `now`; `Ok(None)` when the source is exhausted
    pub fn step(&mut self, now: Instant) -> Result<Option<LoopStatus>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        self.ctx.frames += 1;

        let detection = absorb(self.detector.detect(&self.ops, &frame), "marker detection")?.flatten();
        let predicted = self.tracker.predict();
        let canvas = absorb(self.canvas.update(&self.ops, &frame), "canvas update")?.flatten();

        let mut status = LoopStatus {
            frame: self.ctx.frames,
            connected: false,
            canvas,
            predicted,
            marker: detection.map(|d| d.center),
            corrected: false,
            pen: None,
            target: None,
            decided: None,
            sent: Vec::new(),
            streamed: false,
        };

        let mut accepted: Option<MarkerDetection> = None;
        if let Some(quad) = canvas {
            let bounds = quad.bounding_rect();
            let mask = self.masks.refresh(bounds.width as u32, bounds.height as u32);

            let p = predicted.to_pixel();
            let local = PixelPoint::new(p.x - bounds.x, p.y - bounds.y);
            let decision = self.policy.decide(local, mask);

            accepted = detection.filter(|d| d.is_within(&quad));
            if let Some(d) = accepted {
                self.tracker.correct(d.measurement());
                status.corrected = true;
            }

            status.pen = Some(decision.pen);
            status.target = decision
                .target
                .map(|t| PixelPoint::new(t.x + bounds.x, t.y + bounds.y));

            if self.ctx.command.ready(now) {
                status.decided = decision.motion;
                status.sent = self.dispatch(now, &decision);
                self.ctx.command.stamp(now);
            }
        }

        self.keepalive(now);

        if self.stream.enabled && self.is_connected() && self.ctx.stream.ready(now) {
            let has_alpha = self.masks.has_alpha();
            let artwork = canvas
                .zip(self.masks.resampled_artwork())
                .map(|(quad, pixels)| {
                    let bounds = quad.bounding_rect();
                    ArtworkLayer {
                        origin: PixelPoint::new(bounds.x, bounds.y),
                        pixels,
                        has_alpha,
                    }
                });
            let overlay = Overlay {
                artwork,
                canvas,
                predicted: Some(predicted),
                measured: accepted.map(|d| d.blob.bounds),
                target: status.target,
                pen: status.pen,
                connected: true,
            };
            if stream_frame(&self.ops, self.channel.as_mut(), &frame, &overlay, &self.stream) {
                self.ctx.stream.stamp(now);
                status.streamed = true;
            }
        }

        status.connected = self.is_connected();
        Ok(Some(status))
    }

    /// Connect if needed and send the pen and motion commands for a decision
    fn dispatch(&mut self, now: Instant, decision: &Decision) -> Vec<Intent> {
        let mut sent = Vec::new();
        let Some(channel) = self.channel.as_mut() else {
            debug!(intent = ?decision.motion, "no relay, command not sent");
            return sent;
        };

        let was_connected = channel.is_connected();
        if !channel.ensure_connected(now) {
            return sent;
        }
        if !was_connected {
            self.ctx.last_pen_sent = None;
        }

        let pen = Intent::Pen(decision.pen);
        if self.transmit_pen && self.ctx.last_pen_sent != Some(decision.pen) {
            if let Some(message) = self.dialect.encode(pen) {
                if channel.send(&message).is_err() {
                    return sent;
                }
                self.ctx.last_pen_sent = Some(decision.pen);
                sent.push(pen);
            }
        }

        if let Some(intent) = decision.motion {
            if let Some(message) = self.dialect.encode(intent) {
                if channel.send(&message).is_ok() {
                    debug!(?intent, "command sent");
                    sent.push(intent);
                }
            }
        }
        sent
    }

    fn keepalive(&mut self, now: Instant) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if channel.is_connected() && self.ctx.ping.ready(now) && channel.ping().is_ok() {
            self.ctx.ping.stamp(now);
        }
    }
}

/// Encode an annotated frame and push it to the relay; true once sent
fn stream_frame<O: ImageOps, C: Connector>(
    ops: &O,
    channel: Option<&mut CommandChannel<C>>,
    frame: &O::Frame,
    overlay: &Overlay<'_>,
    config: &StreamConfig,
) -> bool {
    let Some(channel) = channel else {
        return false;
    };
    let jpeg = match ops.encode_stream_frame(frame, overlay, config) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            warn!(error = %e, "stream frame encoding failed");
            return false;
        }
    };
    channel.send(&OutboundMessage::vision_frame(&jpeg)).is_ok()
}

/// Turn a recoverable per-frame error into a logged miss
fn absorb<T>(result: Result<T>, stage: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!(stage, error = %e, "frame processing failed, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
