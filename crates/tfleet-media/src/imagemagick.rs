//! ImageMagick `identify` and `convert` commands.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{check_tool, CommandParams, CommandRunner};
use crate::error::{CommandError, CommandResult};

const IDENTIFY_FORMAT: &str = "%z %w %h %m %[EXIF:Orientation] %r\\n";

/// Basic facts about an image file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Bit depth
    pub depth: u32,
    /// Pixel width as stored
    pub width: u32,
    /// Pixel height as stored
    pub height: u32,
    /// Lower-cased ImageMagick format name (`jpeg`, `png`, ...)
    pub format: String,
    /// EXIF orientation, if present
    pub orientation: Option<u8>,
    /// Image class and colorspace, e.g. `DirectClass sRGB`
    pub image_type: String,
}

impl ImageInfo {
    /// Whether the EXIF orientation swaps width and height for display.
    pub fn is_rotated(&self) -> bool {
        matches!(self.orientation, Some(5..=8))
    }

    /// Display dimensions, accounting for EXIF orientation.
    pub fn oriented_dimensions(&self) -> (u32, u32) {
        if self.is_rotated() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    fn parse(line: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^(\d+) (\d+) (\d+) (\S+) (\d+)? ?(.*)$").expect("valid identify pattern")
        });
        let caps = pattern.captures(line.trim_end())?;
        Some(Self {
            depth: caps[1].parse().ok()?,
            width: caps[2].parse().ok()?,
            height: caps[3].parse().ok()?,
            format: caps[4].to_lowercase(),
            orientation: caps.get(5).and_then(|m| m.as_str().parse().ok()),
            image_type: caps[6].trim().to_string(),
        })
    }
}

/// Runs `identify` on a single file.
#[derive(Debug, Clone)]
pub struct IdentifyCommand {
    path: PathBuf,
}

impl IdentifyCommand {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Identify the image.
    ///
    /// Inputs ImageMagick has no decoder for fail with
    /// [`CommandError::UnsupportedFormat`].
    pub async fn run(&self) -> CommandResult<ImageInfo> {
        check_tool("identify")?;

        let runner = CommandRunner::new(format!("identify -format '{}' :file", IDENTIFY_FORMAT));
        let params = CommandParams::new().with("file", self.path.display());

        let mut info = None;
        let result = runner
            .run_with_output(&params, |line| {
                if info.is_none() {
                    info = ImageInfo::parse(line);
                }
            })
            .await;

        if let Err(e) = result {
            if e.output()
                .is_some_and(|out| out.contains("no decode delegate for this image format"))
            {
                return Err(CommandError::UnsupportedFormat(self.path.display().to_string()));
            }
            return Err(e);
        }

        let info = info.ok_or_else(|| {
            CommandError::unexpected_output("Unable to determine dimensions of image")
        })?;
        debug!(
            width = info.width,
            height = info.height,
            format = %info.format,
            "Identified image"
        );
        Ok(info)
    }
}

/// Builder for a `convert` invocation producing one output image.
#[derive(Debug, Clone)]
pub struct ConvertCommand {
    input: PathBuf,
    output: PathBuf,
    format: String,
    options: Vec<String>,
    coalesce: bool,
}

impl ConvertCommand {
    /// Convert `input` into `output` encoded as `format`.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>, format: impl Into<String>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            format: sanitize_format(&format.into()),
            options: Vec::new(),
            coalesce: false,
        }
    }

    fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Keep only the first frame (animations, TIFF thumbnails).
    pub fn flatten(self) -> Self {
        self.option("-delete '1-999' -flatten -scene 1")
    }

    /// Apply the EXIF orientation to the pixels.
    pub fn auto_orient(self) -> Self {
        self.option("-auto-orient")
    }

    /// Resize to fit `width`x`height`.
    pub fn resize(self, width: u32, height: u32) -> Self {
        self.option(format!("-resize {}x{}", width, height))
    }

    /// Center crop to `width`x`height`.
    pub fn crop(self, width: u32, height: u32) -> Self {
        self.option(format!("-gravity center -crop {}x{}+0+0 +repage", width, height))
    }

    /// Remove embedded profiles and comments.
    pub fn strip_metadata(self) -> Self {
        self.option("+profile '8bim,iptc,xmp,exif' -set comment ''")
    }

    /// Output quality in `0.0..=1.0`.
    pub fn quality(self, quality: f64) -> Self {
        let percent = (quality.clamp(0.0, 1.0) * 100.0).ceil() as u32;
        self.option(format!("-quality {}%", percent))
    }

    /// Coalesce animation frames before processing. Needed for GIF to GIF.
    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Render the command line template. Paths are substituted at run time.
    pub fn command_line(&self) -> String {
        let mut line = "convert".to_string();
        for option in &self.options {
            line.push(' ');
            line.push_str(option);
        }
        if self.coalesce {
            format!("convert -coalesce :input_file - | {} - :output_file", line)
        } else {
            format!("{} :input_file :output_file", line)
        }
    }

    pub async fn run(&self) -> CommandResult<()> {
        check_tool("convert")?;

        let params = CommandParams::new()
            .with("input_file", self.input.display())
            .with(
                "output_file",
                format!("'{}:{}'", self.format, self.output.display()),
            );
        CommandRunner::new(self.command_line()).run(&params).await?;
        Ok(())
    }
}

/// Strip anything that could not be part of a format name.
fn sanitize_format(format: &str) -> String {
    format
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

/// Scale `original` to the requested box, preserving the aspect ratio when
/// only one dimension is given and never upscaling.
pub fn target_dimensions(original: (u32, u32), width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    let (ow, oh) = original;
    if ow == 0 || oh == 0 {
        return (width.unwrap_or(ow), height.unwrap_or(oh));
    }
    let aspect = oh as f64 / ow as f64;
    let (tw, th) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, (w as f64 * aspect).ceil() as u32),
        (None, Some(h)) => ((h as f64 / aspect).ceil() as u32, h),
        (None, None) => return original,
    };
    if ow <= tw && oh <= th {
        return original;
    }
    // Fit inside the box
    let by_width = (tw, (tw as f64 * aspect).round() as u32);
    if by_width.1 <= th {
        by_width
    } else {
        ((th as f64 / aspect).round() as u32, th)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identify_line() {
        let info = ImageInfo::parse("8 640 480 JPEG 6 DirectClass sRGB").unwrap();
        assert_eq!(info.depth, 8);
        assert_eq!(info.format, "jpeg");
        assert_eq!(info.orientation, Some(6));
        assert_eq!(info.image_type, "DirectClass sRGB");
        assert!(info.is_rotated());
        assert_eq!(info.oriented_dimensions(), (480, 640));
    }

    #[test]
    fn test_parse_identify_line_without_orientation() {
        let info = ImageInfo::parse("8 100 50 PNG  DirectClass sRGBA").unwrap();
        assert_eq!(info.orientation, None);
        assert_eq!((info.width, info.height), (100, 50));
        assert!(!info.is_rotated());

        assert!(ImageInfo::parse("identify: no decode delegate").is_none());
    }

    #[test]
    fn test_convert_command_line() {
        let cmd = ConvertCommand::new("/tmp/in", "/tmp/out", "j.p-g")
            .auto_orient()
            .resize(100, 50)
            .quality(0.85);
        assert_eq!(cmd.format(), "jpg");
        assert_eq!(
            cmd.command_line(),
            "convert -auto-orient -resize 100x50 -quality 85% :input_file :output_file"
        );

        let gif = ConvertCommand::new("/tmp/in", "/tmp/out", "gif").coalesce(true);
        assert!(gif.command_line().starts_with("convert -coalesce :input_file - | convert"));
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions((1000, 500), Some(100), None), (100, 50));
        assert_eq!(target_dimensions((1000, 500), None, Some(100)), (200, 100));
        assert_eq!(target_dimensions((1000, 500), Some(100), Some(100)), (100, 50));
        // Never upscale
        assert_eq!(target_dimensions((100, 50), Some(400), None), (100, 50));
        assert_eq!(target_dimensions((100, 50), None, None), (100, 50));
    }

    #[tokio::test]
    async fn test_identify_missing_file_fails() {
        if check_tool("identify").is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let result = IdentifyCommand::new(dir.path().join("missing.png")).run().await;
        assert!(result.is_err());
    }
}
