//! Fixed-size canvas and still-image fitting.
//!
//! Every visual in the timeline is a single still frame: the canvas
//! background with an optional image centered on it, scaled uniformly so it
//! never leaves the canvas and never changes aspect ratio.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgba, RgbaImage, RgbImage};

use crate::error::DuetError;

/// Target resolution and background color, constant for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
}

impl Canvas {
    pub fn new(width: u32, height: u32, background: [u8; 3]) -> Result<Self, DuetError> {
        if width == 0 || height == 0 {
            return Err(DuetError::Configuration(
                "canvas width/height must be non-zero".to_string(),
            ));
        }
        // yuv420p output needs even dimensions
        if width % 2 != 0 || height % 2 != 0 {
            return Err(DuetError::Configuration(format!(
                "canvas size must be even, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            background,
        })
    }

    /// Uniform scale factor that fits a `width` x `height` image inside the canvas.
    pub fn fit_scale(&self, width: u32, height: u32) -> f64 {
        let sw = self.width as f64 / width.max(1) as f64;
        let sh = self.height as f64 / height.max(1) as f64;
        sw.min(sh)
    }

    /// Size of an image after fitting, never larger than the canvas.
    pub fn fitted_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = self.fit_scale(width, height);
        let w = ((width as f64 * scale) as u32).clamp(1, self.width);
        let h = ((height as f64 * scale) as u32).clamp(1, self.height);
        (w, h)
    }

    /// A frame filled with the background color.
    pub fn blank(&self) -> RgbImage {
        let [r, g, b] = self.background;
        RgbImage::from_pixel(self.width, self.height, image::Rgb([r, g, b]))
    }

    /// Compose `image` centered on the background.
    pub fn compose(&self, image: &DynamicImage) -> RgbImage {
        let [r, g, b] = self.background;
        let mut frame = RgbaImage::from_pixel(self.width, self.height, Rgba([r, g, b, 255]));

        let (w, h) = self.fitted_size(image.width(), image.height());
        let fitted = imageops::resize(&image.to_rgba8(), w, h, FilterType::Lanczos3);
        let x = (self.width - w) / 2;
        let y = (self.height - h) / 2;
        imageops::overlay(&mut frame, &fitted, x as i64, y as i64);

        DynamicImage::ImageRgba8(frame).to_rgb8()
    }
}

/// A still frame bound to a duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Visual {
    pub frame: PathBuf,
    pub duration: f64,
}

/// Renders fitted frames to PNG files and hands them out as timed visuals.
pub struct CanvasFitter {
    canvas: Canvas,
    frames_dir: PathBuf,
    rendered: HashMap<PathBuf, PathBuf>,
    blank_frame: Option<PathBuf>,
}

impl CanvasFitter {
    pub fn new(canvas: Canvas, frames_dir: impl Into<PathBuf>) -> Self {
        Self {
            canvas,
            frames_dir: frames_dir.into(),
            rendered: HashMap::new(),
            blank_frame: None,
        }
    }

    /// Fit the image at `image_path` onto the canvas for `duration` seconds.
    ///
    /// Each source image is composed once per fitter; later calls reuse the frame.
    pub fn fit(&mut self, image_path: &Path, duration: f64) -> Result<Visual, DuetError> {
        if let Some(frame) = self.rendered.get(image_path) {
            return Ok(Visual {
                frame: frame.clone(),
                duration,
            });
        }

        // format from content, not extension
        let image = ImageReader::open(image_path)?.with_guessed_format()?.decode()?;
        let stem = image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let frame_path = self
            .frames_dir
            .join(format!("frame_{:02}_{}.png", self.rendered.len(), stem));

        fs::create_dir_all(&self.frames_dir)?;
        self.canvas.compose(&image).save(&frame_path)?;
        self.rendered
            .insert(image_path.to_path_buf(), frame_path.clone());

        Ok(Visual {
            frame: frame_path,
            duration,
        })
    }

    /// A background-only visual for `duration` seconds.
    ///
    /// Written once per fitter, overwriting any frame left by an earlier run.
    pub fn blank(&mut self, duration: f64) -> Result<Visual, DuetError> {
        if let Some(frame) = &self.blank_frame {
            return Ok(Visual {
                frame: frame.clone(),
                duration,
            });
        }

        let frame = self.frames_dir.join("frame_blank.png");
        fs::create_dir_all(&self.frames_dir)?;
        self.canvas.blank().save(&frame)?;
        self.blank_frame = Some(frame.clone());
        Ok(Visual { frame, duration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> Canvas {
        Canvas::new(1280, 720, [17, 17, 17]).unwrap()
    }

    #[test]
    fn test_canvas_rejects_odd_and_zero_sizes() {
        assert!(Canvas::new(0, 720, [0, 0, 0]).is_err());
        assert!(Canvas::new(1281, 720, [0, 0, 0]).is_err());
    }

    #[test]
    fn test_fit_scale_uses_smaller_ratio() {
        let canvas = canvas();
        // Portrait: height is the binding side.
        assert_eq!(canvas.fit_scale(720, 1440), 0.5);
        // Wide: width is the binding side.
        assert_eq!(canvas.fit_scale(2560, 720), 0.5);
        // Small images are scaled up.
        assert_eq!(canvas.fit_scale(640, 360), 2.0);
    }

    #[test]
    fn test_fitted_size_preserves_aspect_and_bounds() {
        let canvas = canvas();
        assert_eq!(canvas.fitted_size(1000, 1000), (720, 720));
        assert_eq!(canvas.fitted_size(3840, 2160), (1280, 720));
        let (w, h) = canvas.fitted_size(800, 1200);
        assert!(w <= 1280 && h <= 720);
        assert_eq!(h, 720);
        assert_eq!(w, 480);
    }

    #[test]
    fn test_compose_centers_image_on_background() {
        let canvas = Canvas::new(100, 50, [10, 20, 30]).unwrap();
        let square = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, image::Rgb([200, 0, 0])));

        let frame = canvas.compose(&square);
        assert_eq!(frame.dimensions(), (100, 50));
        // Square scaled to 50x50, centered horizontally at x = 25..75.
        assert_eq!(frame.get_pixel(50, 25).0, [200, 0, 0]);
        assert_eq!(frame.get_pixel(26, 25).0, [200, 0, 0]);
        assert_eq!(frame.get_pixel(5, 25).0, [10, 20, 30]);
        assert_eq!(frame.get_pixel(95, 25).0, [10, 20, 30]);
    }

    #[test]
    fn test_fitter_reuses_frame_for_same_image() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("avatar.png");
        RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3]))
            .save(&source)
            .unwrap();

        let mut fitter = CanvasFitter::new(Canvas::new(16, 8, [0, 0, 0]).unwrap(), dir.path().join("frames"));
        let first = fitter.fit(&source, 1.5).unwrap();
        let second = fitter.fit(&source, 4.0).unwrap();

        assert_eq!(first.frame, second.frame);
        assert_eq!(first.duration, 1.5);
        assert_eq!(second.duration, 4.0);
        let frame = image::open(&first.frame).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
    }

    #[test]
    fn test_blank_frame_matches_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let mut fitter = CanvasFitter::new(Canvas::new(4, 2, [9, 9, 9]).unwrap(), dir.path());
        let visual = fitter.blank(2.0).unwrap();
        let frame = image::open(&visual.frame).unwrap().to_rgb8();
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.get_pixel(0, 0).0, [9, 9, 9]);
    }

    #[test]
    fn test_blank_frame_follows_current_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let mut earlier = CanvasFitter::new(Canvas::new(4, 2, [9, 9, 9]).unwrap(), dir.path());
        earlier.blank(1.0).unwrap();

        let mut current = CanvasFitter::new(Canvas::new(8, 4, [200, 0, 0]).unwrap(), dir.path());
        let visual = current.blank(1.0).unwrap();
        let frame = image::open(&visual.frame).unwrap().to_rgb8();
        assert_eq!(frame.dimensions(), (8, 4));
        assert_eq!(frame.get_pixel(0, 0).0, [200, 0, 0]);

        assert_eq!(current.blank(3.0).unwrap().frame, visual.frame);
    }
}
