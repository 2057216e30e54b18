//! Policy checks and transforms applied to a decoded image.
//!
//! Everything here is synchronous and CPU bound; the fetcher runs it on the
//! blocking pool.

use crate::config::{FilterConfig, ImageConfig};
use exif::{In, Tag};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageResult};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// EXIF tags that indicate a photo taken by a real camera
const CAMERA_TAGS: &[(Tag, &str)] = &[
    (Tag::Make, "Make"),
    (Tag::Model, "Model"),
    (Tag::DateTimeOriginal, "DateTimeOriginal"),
    (Tag::LensModel, "LensModel"),
    (Tag::GPSInfoIFDPointer, "GPSInfo"),
];

/// Editing tools whose presence in the Software tag hints at a modified image
const EDITING_TOOLS: &[&str] = &["photoshop", "gimp"];

const HISTOGRAM_BINS: usize = 256;

/// Why a downloaded image was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("resolution {width}x{height} below minimum {minimum}")]
    BelowMinimumResolution { width: u32, height: u32, minimum: u32 },

    #[error("no camera EXIF tags")]
    MissingCameraExif,

    #[error("luminance {luminance:.3} outside configured window")]
    LuminanceOutOfRange { luminance: f64 },
}

/// EXIF facts relevant to the camera-origin check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifSummary {
    /// Camera tags found, by name
    pub camera_tags: Vec<&'static str>,
    /// Value of the Software tag, if any
    pub software: Option<String>,
}

impl ExifSummary {
    pub fn has_camera_tags(&self) -> bool {
        !self.camera_tags.is_empty()
    }

    /// Software tag names a known editing tool.
    ///
    /// Computed and logged, but not used to reject images.
    pub fn edited_with_known_tool(&self) -> bool {
        self.software
            .as_deref()
            .map(str::to_lowercase)
            .map(|s| EDITING_TOOLS.iter().any(|tool| s.contains(tool)))
            .unwrap_or(false)
    }
}

/// Read the EXIF block of an encoded image
pub fn probe_exif(encoded: &[u8]) -> Result<ExifSummary, exif::Error> {
    let exif = exif::Reader::new().read_from_container(&mut Cursor::new(encoded))?;

    let camera_tags = CAMERA_TAGS
        .iter()
        .filter(|(tag, _)| exif.fields().any(|f| f.tag == *tag))
        .map(|(_, name)| *name)
        .collect();

    let software = exif
        .get_field(Tag::Software, In::PRIMARY)
        .map(|f| f.display_value().to_string());

    Ok(ExifSummary {
        camera_tags,
        software,
    })
}

/// Histogram-weighted brightness of the grayscale image, in [0, 1]
pub fn calculate_luminance(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let mut histogram = [0u64; HISTOGRAM_BINS];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let pixels: u64 = histogram.iter().sum();
    if pixels == 0 {
        return 0.0;
    }

    let scale = HISTOGRAM_BINS as f64;
    let brightness = histogram
        .iter()
        .enumerate()
        .fold(scale, |acc, (index, &count)| {
            acc + (count as f64 / pixels as f64) * (index as f64 - scale)
        });

    // A pure white image peaks at 255/256; report it as fully bright.
    if (brightness - (scale - 1.0)).abs() < f64::EPSILON {
        1.0
    } else {
        brightness / scale
    }
}

/// Target size for conditioning: the smaller edge becomes `target`
pub fn condition_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    let aspect = ((f64::from(width) / f64::from(height.max(1))) * 100.0).round() / 100.0;
    let aspect = aspect.max(0.01);

    let (new_width, new_height) = if width < height {
        (target, (f64::from(target) / aspect) as u32)
    } else if height < width {
        ((f64::from(target) * aspect) as u32, target)
    } else {
        (width, height)
    };

    if new_width == new_height {
        (target, target)
    } else {
        (new_width.max(1), new_height.max(1))
    }
}

/// Snapshot of the per-image policy, shared by every task of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagePolicy {
    pub minimum_resolution: u32,
    pub condition_image_size: u32,
    pub only_exif_images: bool,
    pub min_luminance: Option<f64>,
    pub max_luminance: Option<f64>,
}

impl ImagePolicy {
    pub fn from_config(filters: &FilterConfig, image: &ImageConfig) -> Self {
        Self {
            minimum_resolution: filters.minimum_resolution,
            condition_image_size: image.condition_image_size,
            only_exif_images: image.only_exif_images,
            min_luminance: image.min_luminance,
            max_luminance: image.max_luminance,
        }
    }

    pub fn requires_exif(&self) -> bool {
        self.only_exif_images
    }

    /// Check a decoded image; `exif` is only consulted when EXIF is required
    pub fn evaluate(
        &self,
        image: &DynamicImage,
        exif: Option<&ExifSummary>,
    ) -> Result<(), RejectReason> {
        let (width, height) = (image.width(), image.height());
        if width < self.minimum_resolution || height < self.minimum_resolution {
            return Err(RejectReason::BelowMinimumResolution {
                width,
                height,
                minimum: self.minimum_resolution,
            });
        }

        if self.only_exif_images {
            let summary = exif.cloned().unwrap_or_default();
            if summary.edited_with_known_tool() {
                debug!(software = ?summary.software, "Image reports an editing tool");
            }
            if !summary.has_camera_tags() {
                return Err(RejectReason::MissingCameraExif);
            }
        }

        if self.min_luminance.is_some() || self.max_luminance.is_some() {
            let luminance = calculate_luminance(image);
            debug!(luminance, "Calculated luminance");

            let too_dark = self.min_luminance.is_some_and(|min| luminance < min);
            let too_bright = self.max_luminance.is_some_and(|max| luminance > max);
            if too_dark || too_bright {
                return Err(RejectReason::LuminanceOutOfRange { luminance });
            }
        }

        Ok(())
    }

    /// Resize for conditioning when a target size is configured
    pub fn condition(&self, image: DynamicImage) -> DynamicImage {
        if self.condition_image_size == 0 {
            return image;
        }

        let (width, height) =
            condition_dimensions(image.width(), image.height(), self.condition_image_size);
        debug!(
            from = format!("{}x{}", image.width(), image.height()),
            to = format!("{}x{}", width, height),
            "Resizing for conditioning"
        );

        DynamicImage::ImageRgb8(image.to_rgb8()).resize_exact(width, height, FilterType::CatmullRom)
    }
}

/// Persist an image as PNG, converting float buffers PNG cannot carry
pub fn write_png(image: &DynamicImage, path: &Path) -> ImageResult<()> {
    match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba8(image.to_rgba8()).save_with_format(path, ImageFormat::Png)
        }
        _ => image.save_with_format(path, ImageFormat::Png),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exif::experimental::Writer;
    use exif::{Field, Value};
    use image::{GrayImage, Luma, RgbImage};

    fn gray(width: u32, height: u32, level: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([level])))
    }

    #[test]
    fn test_luminance_extremes() {
        assert_eq!(calculate_luminance(&gray(8, 8, 0)), 0.0);
        assert_eq!(calculate_luminance(&gray(8, 8, 255)), 1.0);
        assert_eq!(calculate_luminance(&gray(8, 8, 128)), 0.5);
    }

    #[test]
    fn test_luminance_bounds_are_inclusive() {
        let image = gray(16, 16, 128);
        let policy = ImagePolicy {
            min_luminance: Some(0.5),
            max_luminance: Some(0.5),
            ..ImagePolicy::default()
        };
        assert_eq!(policy.evaluate(&image, None), Ok(()));

        let darker = ImagePolicy {
            min_luminance: Some(0.6),
            ..ImagePolicy::default()
        };
        assert!(matches!(
            darker.evaluate(&image, None),
            Err(RejectReason::LuminanceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_minimum_resolution() {
        let policy = ImagePolicy {
            minimum_resolution: 32,
            ..ImagePolicy::default()
        };
        assert_eq!(policy.evaluate(&gray(32, 32, 10), None), Ok(()));
        assert_eq!(
            policy.evaluate(&gray(64, 31, 10), None),
            Err(RejectReason::BelowMinimumResolution {
                width: 64,
                height: 31,
                minimum: 32
            })
        );
    }

    #[test]
    fn test_exif_required() {
        let policy = ImagePolicy {
            only_exif_images: true,
            ..ImagePolicy::default()
        };
        let image = gray(4, 4, 100);

        assert_eq!(
            policy.evaluate(&image, None),
            Err(RejectReason::MissingCameraExif)
        );

        let edited = ExifSummary {
            camera_tags: vec![],
            software: Some("Adobe Photoshop 25.0".to_string()),
        };
        assert!(edited.edited_with_known_tool());
        assert_eq!(
            policy.evaluate(&image, Some(&edited)),
            Err(RejectReason::MissingCameraExif)
        );

        let camera = ExifSummary {
            camera_tags: vec!["Make"],
            software: Some("GIMP 2.10".to_string()),
        };
        assert_eq!(policy.evaluate(&image, Some(&camera)), Ok(()));
    }

    #[test]
    fn test_probe_exif_reads_camera_tags() {
        let make = Field {
            tag: Tag::Make,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"Canon".to_vec()]),
        };
        let software = Field {
            tag: Tag::Software,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"GIMP 2.10".to_vec()]),
        };
        let mut writer = Writer::new();
        writer.push_field(&make);
        writer.push_field(&software);
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, false).unwrap();

        let summary = probe_exif(buf.get_ref()).unwrap();
        assert_eq!(summary.camera_tags, vec!["Make"]);
        assert!(summary.edited_with_known_tool());
    }

    #[test]
    fn test_probe_exif_without_metadata() {
        let mut png = Cursor::new(Vec::new());
        gray(4, 4, 0).write_to(&mut png, ImageFormat::Png).unwrap();
        assert!(probe_exif(png.get_ref()).is_err());
    }

    #[test]
    fn test_condition_dimensions() {
        assert_eq!(condition_dimensions(2000, 1000, 1024), (2048, 1024));
        assert_eq!(condition_dimensions(1000, 2000, 1024), (1024, 2048));
        assert_eq!(condition_dimensions(1500, 1500, 1024), (1024, 1024));
        assert_eq!(condition_dimensions(1920, 1080, 512), (911, 512));
    }

    #[test]
    fn test_condition_resizes_to_rgb() {
        let policy = ImagePolicy {
            condition_image_size: 64,
            ..ImagePolicy::default()
        };
        let image = DynamicImage::ImageRgb8(RgbImage::new(200, 100));

        let conditioned = policy.condition(image);
        assert_eq!((conditioned.width(), conditioned.height()), (128, 64));
        assert!(matches!(conditioned, DynamicImage::ImageRgb8(_)));

        let untouched = ImagePolicy::default().condition(gray(10, 20, 5));
        assert_eq!((untouched.width(), untouched.height()), (10, 20));
    }
}
