//! OpenCV implementation of the imaging capabilities
//!
//! Frames are BGR `Mat`s straight from `VideoCapture`. Every OpenCV call is
//! mapped into `ServoError::OpenCv` with the name of the failing step so a
//! bad frame can be logged and skipped by the control loop.

use opencv::{
    core::{
        self, AlgorithmHint, Mat, Point, Point2f, Scalar, Size, TermCriteria, TermCriteria_Type,
        Vec3b, Vector, BORDER_CONSTANT, BORDER_DEFAULT,
    },
    imgcodecs::{self, IMWRITE_JPEG_QUALITY},
    imgproc::{
        self, CHAIN_APPROX_SIMPLE, COLOR_BGR2GRAY, COLOR_BGR2HSV, FONT_HERSHEY_SIMPLEX,
        INTER_AREA, LINE_8, MORPH_CLOSE, MORPH_OPEN, MORPH_RECT, RETR_EXTERNAL, RETR_LIST,
        THRESH_BINARY,
    },
    prelude::*,
    video,
    videoio::{VideoCapture, CAP_ANY},
};
use tracing::{debug, info};

use super::{ArtworkLayer, Blob, FrameSource, ImageOps, Overlay, PolygonCandidate};
use crate::config::{CanvasConfig, MarkerConfig, StreamConfig};
use crate::error::{Result, ServoError};
use crate::geometry::{PixelPoint, Point2, Rect};
use crate::navigation::PenState;

type VectorOfPoint = Vector<Point>;
type VectorOfPoint2f = Vector<Point2f>;

/// Gaussian kernel applied before edge and brightness detection
const BLUR_KERNEL_SIZE: i32 = 5;

/// Structuring element used to grow the marker mask
const MARKER_DILATE_KERNEL_SIZE: i32 = 3;

const GREEN: (f64, f64, f64) = (0.0, 255.0, 0.0);
const RED: (f64, f64, f64) = (0.0, 0.0, 255.0);
const WHITE: (f64, f64, f64) = (255.0, 255.0, 255.0);
const MAGENTA: (f64, f64, f64) = (255.0, 0.0, 255.0);

fn bgr((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

fn anchor() -> Point {
    Point::new(-1, -1)
}

fn rect_kernel(size: i32) -> Result<Mat> {
    imgproc::get_structuring_element(MORPH_RECT, Size::new(size, size), anchor())
        .map_err(|e| ServoError::opencv("structuring element", e))
}

fn border_value() -> Result<Scalar> {
    imgproc::morphology_default_border_value()
        .map_err(|e| ServoError::opencv("morphology border value", e))
}

fn to_cv_point(p: Point2) -> Point {
    Point::new(p.x as i32, p.y as i32)
}

/// Area and bounding box of every external contour in a binary mask
fn external_blobs(mask: &Mat) -> Result<Vec<Blob>> {
    let mut contours = Vector::<VectorOfPoint>::new();
    imgproc::find_contours(
        mask,
        &mut contours,
        RETR_EXTERNAL,
        CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )
    .map_err(|e| ServoError::opencv("findContours", e))?;

    let mut blobs = Vec::with_capacity(contours.len());
    for contour in contours.iter() {
        let area = imgproc::contour_area(&contour, false)
            .map_err(|e| ServoError::opencv("contourArea", e))?;
        let r = imgproc::bounding_rect(&contour)
            .map_err(|e| ServoError::opencv("boundingRect", e))?;
        blobs.push(Blob {
            area,
            bounds: Rect::new(r.x, r.y, r.width, r.height),
        });
    }
    Ok(blobs)
}

/// `ImageOps` over BGR `Mat` frames
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvOps;

impl OpenCvOps {
    pub fn new() -> Self {
        Self
    }

    fn blur(&self, src: &Mat) -> Result<Mat> {
        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            src,
            &mut blurred,
            Size::new(BLUR_KERNEL_SIZE, BLUR_KERNEL_SIZE),
            0.0,
            0.0,
            BORDER_DEFAULT,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(|e| ServoError::opencv("GaussianBlur", e))?;
        Ok(blurred)
    }

    /// Alpha-blend the artwork onto the frame, clipped to the frame bounds
    fn blend_artwork(&self, img: &mut Mat, layer: &ArtworkLayer<'_>) -> Result<()> {
        let (width, height) = self.frame_size(img);
        let Some((w, h)) = layer.visible_extent(width, height) else {
            return Ok(());
        };

        for y in 0..h {
            for x in 0..w {
                let alpha = layer.alpha(x as u32, y as u32);
                if alpha <= 0.0 {
                    continue;
                }
                let [r, g, b, _] = layer.pixels.get_pixel(x as u32, y as u32).0;
                let px = img
                    .at_2d_mut::<Vec3b>(layer.origin.y + y, layer.origin.x + x)
                    .map_err(|e| ServoError::opencv("artwork blend", e))?;
                for (channel, value) in [b, g, r].into_iter().enumerate() {
                    let under = f32::from(px.0[channel]);
                    px.0[channel] = (alpha * f32::from(value) + (1.0 - alpha) * under) as u8;
                }
            }
        }
        Ok(())
    }

    fn draw_overlay(&self, img: &mut Mat, overlay: &Overlay<'_>) -> Result<()> {
        if let Some(layer) = &overlay.artwork {
            self.blend_artwork(img, layer)?;
        }

        if let Some(quad) = &overlay.canvas {
            let outline: VectorOfPoint = quad.corners().iter().copied().map(to_cv_point).collect();
            let mut polygons = Vector::<VectorOfPoint>::new();
            polygons.push(outline);
            imgproc::polylines(img, &polygons, true, bgr(GREEN), 2, LINE_8, 0)
                .map_err(|e| ServoError::opencv("polylines", e))?;
        }

        if let Some(predicted) = overlay.predicted {
            let center = to_cv_point(predicted);
            imgproc::circle(img, center, 8, bgr(GREEN), 2, LINE_8, 0)
                .map_err(|e| ServoError::opencv("circle", e))?;
            if overlay.pen == Some(PenState::Down) {
                imgproc::circle(img, center, 10, bgr(WHITE), 2, LINE_8, 0)
                    .map_err(|e| ServoError::opencv("circle", e))?;
            }
        }

        if let Some(bounds) = overlay.measured {
            let rect = core::Rect::new(bounds.x, bounds.y, bounds.width, bounds.height);
            imgproc::rectangle(img, rect, bgr(RED), 2, LINE_8, 0)
                .map_err(|e| ServoError::opencv("rectangle", e))?;
            let c = bounds.pixel_center();
            imgproc::circle(img, Point::new(c.x, c.y), 5, bgr(RED), -1, LINE_8, 0)
                .map_err(|e| ServoError::opencv("circle", e))?;
        }

        if let Some(target) = overlay.target {
            imgproc::circle(img, Point::new(target.x, target.y), 6, bgr(MAGENTA), 2, LINE_8, 0)
                .map_err(|e| ServoError::opencv("circle", e))?;
        }

        for (i, line) in overlay.hud_lines().iter().enumerate() {
            let origin = Point::new(12, 22 + 24 * i as i32);
            imgproc::put_text(
                img,
                line,
                origin,
                FONT_HERSHEY_SIMPLEX,
                0.6,
                bgr(GREEN),
                2,
                LINE_8,
                false,
            )
            .map_err(|e| ServoError::opencv("putText", e))?;
        }
        Ok(())
    }
}

impl ImageOps for OpenCvOps {
    type Frame = Mat;
    type Gray = Mat;

    fn frame_size(&self, frame: &Mat) -> (i32, i32) {
        (frame.cols(), frame.rows())
    }

    fn grayscale(&self, frame: &Mat) -> Result<Mat> {
        let mut gray = Mat::default();
        imgproc::cvt_color(
            frame,
            &mut gray,
            COLOR_BGR2GRAY,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(|e| ServoError::opencv("grayscale conversion", e))?;
        Ok(gray)
    }

    fn color_blobs(&self, frame: &Mat, config: &MarkerConfig) -> Result<Vec<Blob>> {
        let mut hsv = Mat::default();
        imgproc::cvt_color(frame, &mut hsv, COLOR_BGR2HSV, 0, AlgorithmHint::ALGO_HINT_DEFAULT)
            .map_err(|e| ServoError::opencv("HSV conversion", e))?;

        let [lh, ls, lv] = config.hsv_lower.map(f64::from);
        let [uh, us, uv] = config.hsv_upper.map(f64::from);
        let mut mask = Mat::default();
        core::in_range(
            &hsv,
            &Scalar::new(lh, ls, lv, 0.0),
            &Scalar::new(uh, us, uv, 0.0),
            &mut mask,
        )
        .map_err(|e| ServoError::opencv("inRange", e))?;

        let border = border_value()?;
        let mut opened = Mat::default();
        imgproc::morphology_ex(
            &mask,
            &mut opened,
            MORPH_OPEN,
            &rect_kernel(config.open_kernel_size)?,
            anchor(),
            1,
            BORDER_CONSTANT,
            border,
        )
        .map_err(|e| ServoError::opencv("marker opening", e))?;

        let mut dilated = Mat::default();
        imgproc::dilate(
            &opened,
            &mut dilated,
            &rect_kernel(MARKER_DILATE_KERNEL_SIZE)?,
            anchor(),
            config.dilate_iterations,
            BORDER_CONSTANT,
            border,
        )
        .map_err(|e| ServoError::opencv("marker dilation", e))?;

        external_blobs(&dilated)
    }

    fn polygon_candidates(&self, frame: &Mat, config: &CanvasConfig) -> Result<Vec<PolygonCandidate>> {
        let gray = self.grayscale(frame)?;

        let tile = Size::new(config.clahe_tile_size, config.clahe_tile_size);
        let mut clahe = imgproc::create_clahe(config.clahe_clip_limit, tile)
            .map_err(|e| ServoError::opencv("createCLAHE", e))?;
        let mut enhanced = Mat::default();
        clahe
            .apply(&gray, &mut enhanced)
            .map_err(|e| ServoError::opencv("CLAHE", e))?;

        let blurred = self.blur(&enhanced)?;

        let mut edges = Mat::default();
        imgproc::canny(
            &blurred,
            &mut edges,
            config.canny_low_threshold,
            config.canny_high_threshold,
            3,
            false,
        )
        .map_err(|e| ServoError::opencv("Canny", e))?;

        let kernel = rect_kernel(config.edge_kernel_size)?;
        let border = border_value()?;
        let mut dilated = Mat::default();
        imgproc::dilate(
            &edges,
            &mut dilated,
            &kernel,
            anchor(),
            config.edge_dilate_iterations,
            BORDER_CONSTANT,
            border,
        )
        .map_err(|e| ServoError::opencv("edge dilation", e))?;

        let mut closed = Mat::default();
        imgproc::morphology_ex(
            &dilated,
            &mut closed,
            MORPH_CLOSE,
            &kernel,
            anchor(),
            1,
            BORDER_CONSTANT,
            border,
        )
        .map_err(|e| ServoError::opencv("edge closing", e))?;

        let mut contours = Vector::<VectorOfPoint>::new();
        imgproc::find_contours(&closed, &mut contours, RETR_LIST, CHAIN_APPROX_SIMPLE, Point::new(0, 0))
            .map_err(|e| ServoError::opencv("findContours", e))?;

        let mut candidates = Vec::with_capacity(contours.len());
        for contour in contours.iter() {
            let area = imgproc::contour_area(&contour, false)
                .map_err(|e| ServoError::opencv("contourArea", e))?;
            let perimeter = imgproc::arc_length(&contour, true)
                .map_err(|e| ServoError::opencv("arcLength", e))?;

            let mut approx = VectorOfPoint::new();
            imgproc::approx_poly_dp(&contour, &mut approx, config.poly_approx_epsilon * perimeter, true)
                .map_err(|e| ServoError::opencv("approxPolyDP", e))?;

            candidates.push(PolygonCandidate {
                vertices: approx.iter().map(|p| PixelPoint::new(p.x, p.y)).collect(),
                area,
            });
        }
        debug!(contours = candidates.len(), "canvas candidates extracted");
        Ok(candidates)
    }

    fn bright_regions(&self, frame: &Mat, config: &CanvasConfig) -> Result<Vec<Blob>> {
        let blurred = self.blur(&self.grayscale(frame)?)?;

        let mut binary = Mat::default();
        imgproc::threshold(&blurred, &mut binary, config.brightness_threshold, 255.0, THRESH_BINARY)
            .map_err(|e| ServoError::opencv("threshold", e))?;

        let mut closed = Mat::default();
        imgproc::morphology_ex(
            &binary,
            &mut closed,
            MORPH_CLOSE,
            &rect_kernel(config.edge_kernel_size)?,
            anchor(),
            1,
            BORDER_CONSTANT,
            border_value()?,
        )
        .map_err(|e| ServoError::opencv("brightness closing", e))?;

        external_blobs(&closed)
    }

    fn track_points(
        &self,
        prev: &Mat,
        next: &Mat,
        points: &[Point2],
        config: &CanvasConfig,
    ) -> Result<Vec<Option<Point2>>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let prev_pts: VectorOfPoint2f = points.iter().map(|p| Point2f::new(p.x, p.y)).collect();
        let mut next_pts = VectorOfPoint2f::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();

        let criteria = TermCriteria::new(
            TermCriteria_Type::COUNT as i32 + TermCriteria_Type::EPS as i32,
            config.flow_max_iterations,
            config.flow_epsilon,
        )
        .map_err(|e| ServoError::opencv("TermCriteria", e))?;

        video::calc_optical_flow_pyr_lk(
            prev,
            next,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            Size::new(config.flow_window, config.flow_window),
            config.flow_max_level,
            criteria,
            0,
            1e-4,
        )
        .map_err(|e| ServoError::opencv("calcOpticalFlowPyrLK", e))?;

        Ok(next_pts
            .iter()
            .zip(status.iter())
            .map(|(p, ok)| (ok == 1).then(|| Point2::new(p.x, p.y)))
            .collect())
    }

    fn encode_stream_frame(&self, frame: &Mat, overlay: &Overlay<'_>, config: &StreamConfig) -> Result<Vec<u8>> {
        let mut annotated = frame
            .try_clone()
            .map_err(|e| ServoError::opencv("frame copy", e))?;
        self.draw_overlay(&mut annotated, overlay)?;

        let (width, height) = self.frame_size(&annotated);
        let scaled = if width > config.max_width {
            let scale = config.max_width as f64 / width as f64;
            let size = Size::new(config.max_width, (height as f64 * scale) as i32);
            let mut resized = Mat::default();
            imgproc::resize(&annotated, &mut resized, size, 0.0, 0.0, INTER_AREA)
                .map_err(|e| ServoError::opencv("resize", e))?;
            resized
        } else {
            annotated
        };

        let params: Vector<i32> = [IMWRITE_JPEG_QUALITY, config.jpeg_quality].into_iter().collect();
        let mut buf = Vector::<u8>::new();
        let encoded = imgcodecs::imencode(".jpg", &scaled, &mut buf, &params)
            .map_err(|e| ServoError::opencv("imencode", e))?;
        if !encoded {
            return Err(ServoError::OpenCv {
                operation: "imencode produced no JPEG".into(),
                source: None,
            });
        }
        Ok(buf.to_vec())
    }
}

/// Live camera via `VideoCapture`
pub struct CameraSource {
    capture: VideoCapture,
    index: i32,
}

impl CameraSource {
    /// Open the camera at `index` with the default backend
    ///
    /// # Errors
    ///
    /// Returns `ServoError::FrameAcquisition` if the device cannot be opened.
    pub fn open(index: i32) -> Result<Self> {
        let capture = VideoCapture::new(index, CAP_ANY)
            .map_err(|e| ServoError::frame_acquisition(format!("cannot open camera {index}"), e))?;

        let opened = capture
            .is_opened()
            .map_err(|e| ServoError::frame_acquisition(format!("cannot query camera {index}"), e))?;
        if !opened {
            return Err(ServoError::FrameAcquisition {
                message: format!("camera {index} is not available"),
                source: None,
            });
        }

        info!(index, "camera opened");
        Ok(Self { capture, index })
    }
}

impl FrameSource for CameraSource {
    type Frame = Mat;

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(|e| ServoError::frame_acquisition(format!("read from camera {}", self.index), e))?;

        if !grabbed || frame.empty() {
            debug!(index = self.index, "camera returned no frame");
            return Ok(None);
        }
        Ok(Some(frame))
    }
}
