//! Integration tests for the complete control loop
//!
//! These tests drive `ControlLoop` end to end with scripted collaborators:
//! - A frame source replaying hand-built scenes
//! - An imaging backend that reports the scene's marker, canvas and flow
//! - A relay connector that records every text frame written to it
//!
//! Time is injected through `ControlLoop::step`, so rate limits, keepalives
//! and reconnect backoff are checked without sleeping.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use serde_json::Value;

use sketch_servo::channel::{Connector, Transport};
use sketch_servo::config::{
    CanvasConfig, CanvasStrategyKind, DialectConfig, MarkerConfig, StreamConfig,
};
use sketch_servo::imaging::{Blob, FrameSource, ImageOps, Overlay, PolygonCandidate};
use sketch_servo::{
    Artwork, ClientRole, CommandChannel, ControlLoop, LoopStatus, PixelPoint, Point2, Rect,
    Result, ServoConfig, ServoError,
};

// ============================================================================
// Scripted collaborators
// ============================================================================

/// What the camera "sees" in one frame
#[derive(Debug, Clone)]
struct Scene {
    marker: Option<PixelPoint>,
    canvas_visible: bool,
    flow_ok: bool,
    detection_fault: bool,
}

impl Scene {
    fn marker_at(x: i32, y: i32) -> Self {
        Self {
            marker: Some(PixelPoint::new(x, y)),
            canvas_visible: true,
            flow_ok: true,
            detection_fault: false,
        }
    }
}

/// Canvas outline: (100,100)-(400,300), bounding box 301x201
fn canvas_candidate() -> PolygonCandidate {
    PolygonCandidate {
        vertices: vec![
            PixelPoint::new(100, 100),
            PixelPoint::new(400, 100),
            PixelPoint::new(400, 300),
            PixelPoint::new(100, 300),
        ],
        area: 60_000.0,
    }
}

#[derive(Default)]
struct OpsLog {
    polygon_calls: Cell<usize>,
    bright_calls: Cell<usize>,
    flow_calls: Cell<usize>,
    overlays: RefCell<Vec<StreamedOverlay>>,
}

/// What a streamed frame was annotated with
#[derive(Debug, Clone, PartialEq)]
struct StreamedOverlay {
    connected: bool,
    canvas: Option<Rect>,
    /// Origin and size of the artwork layer
    artwork: Option<(PixelPoint, (u32, u32))>,
}

/// Gray frames carry only whether optical flow should hold on that frame
struct FakeOps(Rc<OpsLog>);

impl ImageOps for FakeOps {
    type Frame = Scene;
    type Gray = bool;

    fn frame_size(&self, _frame: &Scene) -> (i32, i32) {
        (640, 480)
    }

    fn grayscale(&self, frame: &Scene) -> Result<bool> {
        Ok(frame.flow_ok)
    }

    fn color_blobs(&self, frame: &Scene, _config: &MarkerConfig) -> Result<Vec<Blob>> {
        if frame.detection_fault {
            return Err(ServoError::Detection {
                reason: "scripted fault".into(),
            });
        }
        Ok(frame
            .marker
            .map(|c| Blob {
                area: 400.0,
                bounds: Rect::new(c.x - 10, c.y - 10, 21, 21),
            })
            .into_iter()
            .collect())
    }

    fn polygon_candidates(&self, frame: &Scene, _config: &CanvasConfig) -> Result<Vec<PolygonCandidate>> {
        self.0.polygon_calls.set(self.0.polygon_calls.get() + 1);
        Ok(if frame.canvas_visible {
            vec![canvas_candidate()]
        } else {
            Vec::new()
        })
    }

    fn bright_regions(&self, frame: &Scene, _config: &CanvasConfig) -> Result<Vec<Blob>> {
        self.0.bright_calls.set(self.0.bright_calls.get() + 1);
        Ok(if frame.canvas_visible {
            vec![Blob {
                area: 60_000.0,
                bounds: Rect::new(100, 100, 301, 201),
            }]
        } else {
            Vec::new()
        })
    }

    fn track_points(
        &self,
        _prev: &bool,
        next: &bool,
        points: &[Point2],
        _config: &CanvasConfig,
    ) -> Result<Vec<Option<Point2>>> {
        self.0.flow_calls.set(self.0.flow_calls.get() + 1);
        // A failing frame loses the first corner
        Ok(points
            .iter()
            .enumerate()
            .map(|(i, p)| (*next || i != 0).then_some(*p))
            .collect())
    }

    fn encode_stream_frame(&self, _frame: &Scene, overlay: &Overlay<'_>, _config: &StreamConfig) -> Result<Vec<u8>> {
        self.0.overlays.borrow_mut().push(StreamedOverlay {
            connected: overlay.connected,
            canvas: overlay.canvas.map(|q| q.bounding_rect()),
            artwork: overlay
                .artwork
                .map(|layer| (layer.origin, layer.pixels.dimensions())),
        });
        Ok(b"jpeg".to_vec())
    }
}

struct FakeSource {
    scenes: VecDeque<Scene>,
    fail_when_empty: bool,
    /// Keep replaying the last scene instead of running dry
    endless: bool,
}

impl FakeSource {
    fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes: scenes.into(),
            fail_when_empty: false,
            endless: false,
        }
    }
}

impl FrameSource for FakeSource {
    type Frame = Scene;

    fn next_frame(&mut self) -> Result<Option<Scene>> {
        if self.endless && self.scenes.len() == 1 {
            return Ok(self.scenes.front().cloned());
        }
        match self.scenes.pop_front() {
            Some(scene) => Ok(Some(scene)),
            None if self.fail_when_empty => Err(ServoError::FrameAcquisition {
                message: "camera unplugged".into(),
                source: None,
            }),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct Wire {
    sent: Vec<String>,
    connects: usize,
    closes: usize,
    break_writes: bool,
}

impl Wire {
    fn messages(&self) -> Vec<Value> {
        self.sent
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    fn of_type(&self, kind: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }

    fn commands(&self) -> Vec<String> {
        self.of_type("cmd")
            .iter()
            .map(|m| m["cmd"].as_str().unwrap().to_string())
            .collect()
    }
}

struct FakeTransport(Rc<RefCell<Wire>>);

impl Transport for FakeTransport {
    fn send_text(&mut self, text: &str) -> Result<()> {
        let mut wire = self.0.borrow_mut();
        if wire.break_writes {
            return Err(ServoError::Connection {
                message: "broken pipe".into(),
                source: None,
            });
        }
        wire.sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.0.borrow_mut().closes += 1;
    }
}

struct FakeConnector(Rc<RefCell<Wire>>);

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    fn endpoint(&self) -> &str {
        "fake://relay"
    }

    fn connect(&mut self) -> Result<FakeTransport> {
        self.0.borrow_mut().connects += 1;
        Ok(FakeTransport(self.0.clone()))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

type Servo = ControlLoop<FakeSource, FakeOps, FakeConnector>;

struct Rig {
    servo: Servo,
    ops: Rc<OpsLog>,
    wire: Rc<RefCell<Wire>>,
    t0: Instant,
}

/// Filter tuned to lock onto the marker within two frames
fn test_config() -> ServoConfig {
    let mut config = ServoConfig::default();
    config.kalman.process_noise = 100.0;
    config.kalman.measurement_noise = 0.01;
    config.stream.enabled = false;
    config
}

/// Artwork matching the canvas box exactly, inked in local columns 75..=160
fn band_artwork() -> Artwork {
    let img = RgbaImage::from_fn(301, 201, |x, _| {
        if (75..=160).contains(&x) {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    });
    Artwork::new(img, false)
}

fn rig_with(config: ServoConfig, scenes: Vec<Scene>, networked: bool) -> Rig {
    let ops = Rc::new(OpsLog::default());
    let wire = Rc::new(RefCell::new(Wire::default()));
    let channel = networked.then(|| {
        CommandChannel::new(
            FakeConnector(wire.clone()),
            ClientRole::Vision,
            config.command.reconnect_backoff(),
        )
    });
    let servo = ControlLoop::new(
        &config,
        FakeSource::new(scenes),
        FakeOps(ops.clone()),
        band_artwork(),
        channel,
    );
    Rig {
        servo,
        ops,
        wire,
        t0: Instant::now(),
    }
}

fn rig(scenes: Vec<Scene>) -> Rig {
    rig_with(test_config(), scenes, true)
}

impl Rig {
    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    /// Step `n` frames spaced `period_ms` apart starting at `start_ms`
    fn drive(&mut self, start_ms: u64, period_ms: u64, n: u64) -> Vec<LoopStatus> {
        (0..n)
            .map(|k| {
                let now = self.at(start_ms + k * period_ms);
                self.servo.step(now).unwrap().expect("source exhausted early")
            })
            .collect()
    }
}

// ============================================================================
// Canvas lock
// ============================================================================

#[test]
fn test_canvas_lock_persists_while_flow_tracks() {
    let mut rig = rig(vec![Scene::marker_at(150, 200); 50]);
    let statuses = rig.drive(0, 33, 50);

    assert!(statuses.iter().all(LoopStatus::has_canvas));
    assert_eq!(rig.ops.polygon_calls.get(), 1);
    assert_eq!(rig.ops.flow_calls.get(), 49);
}

#[test]
fn test_flow_loss_drops_lock_and_redetects() {
    let mut scenes = vec![Scene::marker_at(150, 200); 6];
    scenes[3].flow_ok = false;
    let mut rig = rig(scenes);
    let statuses = rig.drive(0, 33, 6);

    assert!(statuses[2].has_canvas());
    assert!(!statuses[3].has_canvas());
    assert!(!statuses[3].corrected);
    assert!(statuses[4].has_canvas());
    assert_eq!(rig.ops.polygon_calls.get(), 2);
}

#[test]
fn test_threshold_strategy_redetects_every_frame() {
    let mut config = test_config();
    config.canvas.strategy = CanvasStrategyKind::Threshold;
    let mut rig = rig_with(config, vec![Scene::marker_at(150, 200); 5], true);
    let statuses = rig.drive(0, 33, 5);

    assert!(statuses.iter().all(LoopStatus::has_canvas));
    assert_eq!(rig.ops.bright_calls.get(), 5);
    assert_eq!(rig.ops.polygon_calls.get(), 0);
    assert_eq!(rig.ops.flow_calls.get(), 0);
}

// ============================================================================
// Marker filtering
// ============================================================================

#[test]
fn test_marker_outside_canvas_is_ignored() {
    let mut rig = rig(vec![Scene::marker_at(50, 50); 3]);
    let statuses = rig.drive(0, 33, 3);

    assert!(statuses.iter().all(|s| s.marker == Some(PixelPoint::new(50, 50))));
    assert!(statuses.iter().all(|s| !s.corrected));
    assert_eq!(statuses[2].predicted, Point2::new(0.0, 0.0));
}

#[test]
fn test_detection_fault_is_a_miss() {
    let mut scenes = vec![Scene::marker_at(150, 200); 3];
    scenes[1].detection_fault = true;
    let mut rig = rig(scenes);
    let statuses = rig.drive(0, 33, 3);

    assert_eq!(statuses[1].marker, None);
    assert!(!statuses[1].corrected);
    assert!(statuses[2].corrected);
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_commands_respect_minimum_interval() {
    let mut rig = rig(vec![Scene::marker_at(150, 200); 21]);
    let statuses = rig.drive(0, 50, 21);

    // Command cycles at 0, 200, 400, ... ms; the first predicts from the origin
    for (k, status) in statuses.iter().enumerate() {
        let t = k as u64 * 50;
        let cycle = t % 200 == 0;
        assert_eq!(!status.sent.is_empty(), cycle && t > 0, "frame at {t} ms");
    }

    let wire = rig.wire.borrow();
    assert_eq!(wire.commands(), vec!["right"; 5]);
    assert_eq!(wire.sent[0], r#"{"type":"register","role":"vision","client":"vision"}"#);
    assert_eq!(wire.of_type("cmd")[0]["ms"], 120);
}

#[test]
fn test_no_connection_without_canvas() {
    let mut scene = Scene::marker_at(150, 200);
    scene.canvas_visible = false;
    let mut rig = rig(vec![scene; 10]);
    let statuses = rig.drive(0, 200, 10);

    assert!(statuses.iter().all(|s| !s.connected && s.sent.is_empty()));
    assert_eq!(rig.wire.borrow().connects, 0);
}

#[test]
fn test_send_failure_drops_connection_until_backoff() {
    let mut rig = rig(vec![Scene::marker_at(150, 200); 20]);

    let statuses = rig.drive(0, 200, 2);
    assert!(statuses[1].connected);
    assert_eq!(rig.wire.borrow().commands(), vec!["right"]);

    rig.wire.borrow_mut().break_writes = true;
    let status = rig.servo.step(rig.at(400)).unwrap().unwrap();
    assert!(!status.connected);
    assert!(status.sent.is_empty());
    rig.wire.borrow_mut().break_writes = false;

    // Last attempt was at t=0; the 2 s backoff holds until after 2000 ms
    let statuses = rig.drive(600, 200, 8);
    assert!(statuses.iter().all(|s| !s.connected));
    assert_eq!(rig.wire.borrow().connects, 1);

    let status = rig.servo.step(rig.at(2200)).unwrap().unwrap();
    assert!(status.connected);
    assert_eq!(rig.wire.borrow().connects, 2);
    assert_eq!(rig.wire.borrow().of_type("register").len(), 2);
}

#[test]
fn test_keepalive_ping_interval() {
    let mut rig = rig(vec![Scene::marker_at(150, 200); 13]);
    rig.drive(0, 500, 13);

    // Pings at 0 ms and 5500 ms (strictly more than 5 s later)
    assert_eq!(rig.wire.borrow().of_type("ping").len(), 2);
}

#[test]
fn test_stream_frames_are_rate_limited() {
    let mut config = test_config();
    config.stream.enabled = true;
    let mut rig = rig_with(config, vec![Scene::marker_at(150, 200); 21], true);
    let statuses = rig.drive(0, 50, 21);

    // 8 fps: frames at 0, 150, 300, ... 900 ms
    let frames = rig.wire.borrow().of_type("vision_frame");
    assert_eq!(frames.len(), 7);
    assert_eq!(frames[0]["format"], "jpeg");
    assert_eq!(frames[0]["data"], "anBlZw==");
    assert_eq!(statuses.iter().filter(|s| s.streamed).count(), 7);

    let overlays = rig.ops.overlays.borrow();
    assert!(overlays.iter().all(|o| o.connected && o.canvas.is_some()));

    // The artwork is laid over the canvas bounding box at its full size
    for overlay in overlays.iter() {
        let bounds = overlay.canvas.unwrap();
        assert_eq!(
            overlay.artwork,
            Some((
                PixelPoint::new(bounds.x, bounds.y),
                (bounds.width as u32, bounds.height as u32)
            ))
        );
    }
}

#[test]
fn test_named_dialect_transmits_pen_changes() {
    let mut config = test_config();
    config.command.dialect = DialectConfig::NamedPulse;
    config.command.transmit_pen = true;

    let mut scenes = vec![Scene::marker_at(150, 200); 6];
    scenes.extend(vec![Scene::marker_at(200, 200); 8]);
    let mut rig = rig_with(config, scenes, true);
    rig.drive(0, 200, 14);

    let cmds = rig.wire.borrow().commands();
    assert_eq!(cmds.first().map(String::as_str), Some("pen_up"));
    assert_eq!(cmds.last().map(String::as_str), Some("pen_down"));
    let middle = &cmds[1..cmds.len() - 1];
    assert!(middle.len() >= 5);
    assert!(middle.iter().all(|c| c == "right_micro_slow"), "{cmds:?}");
    assert!(rig.wire.borrow().of_type("cmd").iter().all(|m| m.get("ms").is_none()));
}

#[test]
fn test_dry_run_decides_without_sending() {
    let mut rig = rig_with(test_config(), vec![Scene::marker_at(150, 200); 3], false);
    let statuses = rig.drive(0, 200, 3);

    assert!(statuses[2].decided.is_some());
    assert!(statuses.iter().all(|s| s.sent.is_empty() && !s.connected));
    assert!(rig.servo.channel().is_none());
}

// ============================================================================
// Loop lifecycle
// ============================================================================

#[test]
fn test_run_ends_when_source_is_exhausted() {
    let mut rig = rig(vec![Scene::marker_at(150, 200); 4]);
    assert_eq!(rig.servo.run().unwrap(), 4);
    assert!(!rig.servo.is_connected());
}

#[test]
fn test_acquisition_failure_ends_run_with_error() {
    let config = test_config();
    let mut source = FakeSource::new(vec![Scene::marker_at(150, 200); 2]);
    source.fail_when_empty = true;
    let mut servo: ControlLoop<_, _, FakeConnector> = ControlLoop::new(
        &config,
        source,
        FakeOps(Rc::new(OpsLog::default())),
        band_artwork(),
        None,
    );

    let err = servo.run().unwrap_err();
    assert!(matches!(err, ServoError::FrameAcquisition { .. }));
    assert!(!err.is_recoverable());
    assert_eq!(servo.context().frames, 2);
}

#[test]
fn test_stop_flag_halts_before_next_frame() {
    let mut rig = rig(vec![Scene::marker_at(150, 200); 10]);
    rig.servo.stop_handle().store(true, Ordering::Relaxed);
    assert_eq!(rig.servo.run().unwrap(), 0);
}

#[test]
fn test_stop_from_another_thread_closes_relay() {
    let config = test_config();
    let wire = Rc::new(RefCell::new(Wire::default()));
    let channel = CommandChannel::new(
        FakeConnector(wire.clone()),
        ClientRole::Vision,
        config.command.reconnect_backoff(),
    );
    let mut source = FakeSource::new(vec![Scene::marker_at(150, 200)]);
    source.endless = true;
    let mut servo = ControlLoop::new(
        &config,
        source,
        FakeOps(Rc::new(OpsLog::default())),
        band_artwork(),
        Some(channel),
    );

    let stop = servo.stop_handle();
    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        stop.store(true, Ordering::Relaxed);
    });

    let frames = servo.run().unwrap();
    interrupter.join().unwrap();

    assert!(frames > 0);
    let wire = wire.borrow();
    assert_eq!(wire.connects, 1);
    assert_eq!(wire.closes, 1);
    assert!(!servo.is_connected());
}
