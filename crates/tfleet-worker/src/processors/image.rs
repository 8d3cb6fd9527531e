//! Image conversion.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use tfleet_media::{target_dimensions, ConvertCommand, IdentifyCommand, ImageInfo};
use tfleet_models::Params;
use tfleet_storage::{parse_uri, OpenMode, ResourceHandle};

use super::{one_or_many, reported_url};
use crate::error::WorkerResult;
use crate::processor::{parse_params, Processor, ProcessorContext};

#[derive(Debug, Deserialize)]
struct ImageParams {
    input_url: String,
    #[serde(default, deserialize_with = "one_or_many")]
    versions: Vec<ImageVersion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageVersion {
    target_url: String,
    width: Option<u32>,
    height: Option<u32>,
    /// Output format, the input format when unset
    format: Option<String>,
    /// Quality in `0.0..=1.0`
    quality: Option<f64>,
    content_type: Option<String>,
    /// Center crop to the requested box after resizing
    crop: bool,
    strip_metadata: bool,
    /// `web` applies the EXIF orientation to the pixels
    medium: Option<String>,
    /// `none` disables resizing
    scale: Option<String>,
}

/// Converts one input image into every requested version.
///
/// Result: `{width, height, depth, outputs: [{url, width, height, format}]}`
/// where the top-level dimensions describe the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProcessor;

#[async_trait]
impl Processor for ImageProcessor {
    fn name(&self) -> &'static str {
        "image"
    }

    async fn execute(&self, params: &Params, ctx: &ProcessorContext) -> WorkerResult<Params> {
        let params: ImageParams = parse_params(params)?;
        let mut input = parse_uri(&params.input_url, ctx.storage())?;
        let result = convert_all(&params, &mut input, ctx).await;
        input.close();
        result
    }
}

async fn convert_all(
    params: &ImageParams,
    input: &mut ResourceHandle,
    ctx: &ProcessorContext,
) -> WorkerResult<Params> {
    let input_path = input.open(OpenMode::Read).await?;
    let info = IdentifyCommand::new(&input_path).run().await?;
    let (width, height) = info.oriented_dimensions();

    let count = params.versions.len();
    let mut outputs = Vec::with_capacity(count);
    for (index, version) in params.versions.iter().enumerate() {
        info!(target_url = %version.target_url, "Handling version {}/{}", index + 1, count);

        let mut output = parse_uri(&version.target_url, ctx.storage())?;
        let outcome = convert_version(&input_path, &info, version, &mut output).await;
        output.close();

        let (format, (out_width, out_height)) = outcome?;
        outputs.push(json!({
            "url": reported_url(&output),
            "width": out_width,
            "height": out_height,
            "format": format,
        }));
        ctx.progress().report((index + 1) as f64 / count as f64);
    }

    let mut result = Params::new();
    result.insert("width".into(), json!(width));
    result.insert("height".into(), json!(height));
    result.insert("depth".into(), json!(info.depth));
    result.insert("outputs".into(), json!(outputs));
    Ok(result)
}

async fn convert_version(
    input_path: &Path,
    info: &ImageInfo,
    version: &ImageVersion,
    output: &mut ResourceHandle,
) -> WorkerResult<(String, (u32, u32))> {
    let output_path = output.open(OpenMode::Write).await?;
    let (command, dimensions) = plan_conversion(input_path, &output_path, info, version);
    command.run().await?;

    let format = command.format().to_string();
    let content_type = version
        .content_type
        .clone()
        .or_else(|| content_type_for(&format).map(str::to_string));
    output.set_content_type(content_type);
    output.save().await?;
    Ok((format, dimensions))
}

/// Build the `convert` invocation for one version, along with the display
/// dimensions of its output.
fn plan_conversion(
    input_path: &Path,
    output_path: &Path,
    info: &ImageInfo,
    version: &ImageVersion,
) -> (ConvertCommand, (u32, u32)) {
    let format = version.format.clone().unwrap_or_else(|| info.format.clone());
    let mut command = ConvertCommand::new(input_path, output_path, format);
    let output_format = command.format().to_string();

    let original = info.oriented_dimensions();
    let rotated = info.is_rotated();
    let auto_orient = version.medium.as_deref() == Some("web") || version.strip_metadata;
    // Resize and crop geometry apply to stored pixels unless auto-oriented
    let pixel_order = |(w, h): (u32, u32)| if rotated && !auto_orient { (h, w) } else { (w, h) };

    if output_format != info.format && matches!(info.format.as_str(), "gif" | "tiff") {
        command = command.flatten();
    }
    if auto_orient {
        command = command.auto_orient();
    }

    let mut dimensions = original;
    if version.scale.as_deref() != Some("none") {
        dimensions = target_dimensions(original, version.width, version.height);
        let (w, h) = pixel_order(dimensions);
        command = command.resize(w, h);
    }

    if version.crop {
        let requested = requested_box(original, version.width, version.height);
        dimensions = (dimensions.0.min(requested.0), dimensions.1.min(requested.1));
        let (w, h) = pixel_order(requested);
        command = command.crop(w, h);
    }

    if version.strip_metadata {
        command = command.strip_metadata();
    }
    command = command
        .quality(version.quality.unwrap_or(1.0))
        .coalesce(info.format == "gif" && output_format == "gif");

    (command, dimensions)
}

/// The box a version asks for, deriving a missing side from the aspect ratio.
fn requested_box(original: (u32, u32), width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    let (ow, oh) = original;
    let aspect = if ow == 0 { 1.0 } else { oh as f64 / ow as f64 };
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, (w as f64 * aspect).ceil() as u32),
        (None, Some(h)) => ((h as f64 / aspect).ceil() as u32, h),
        (None, None) => original,
    }
}

fn content_type_for(format: &str) -> Option<&'static str> {
    match format {
        "jpeg" | "jpg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(format: &str, width: u32, height: u32, orientation: Option<u8>) -> ImageInfo {
        ImageInfo {
            depth: 8,
            width,
            height,
            format: format.to_string(),
            orientation,
            image_type: "DirectClass sRGB".to_string(),
        }
    }

    #[test]
    fn test_resize_keeps_aspect_ratio() {
        let version = ImageVersion {
            width: Some(200),
            format: Some("png".into()),
            quality: Some(0.5),
            ..Default::default()
        };
        let (command, dimensions) =
            plan_conversion(Path::new("/in"), Path::new("/out"), &info("jpeg", 1000, 500, None), &version);

        assert_eq!(dimensions, (200, 100));
        assert_eq!(command.format(), "png");
        assert_eq!(
            command.command_line(),
            "convert -resize 200x100 -quality 50% :input_file :output_file"
        );
    }

    #[test]
    fn test_rotated_input_resizes_stored_pixels() {
        let version = ImageVersion {
            width: Some(100),
            ..Default::default()
        };
        // Stored 400x200, displayed 200x400
        let (command, dimensions) =
            plan_conversion(Path::new("/in"), Path::new("/out"), &info("jpeg", 400, 200, Some(6)), &version);

        assert_eq!(dimensions, (100, 200));
        assert!(command.command_line().contains("-resize 200x100"));

        let web = ImageVersion {
            width: Some(100),
            medium: Some("web".into()),
            ..Default::default()
        };
        let (command, _) =
            plan_conversion(Path::new("/in"), Path::new("/out"), &info("jpeg", 400, 200, Some(6)), &web);
        assert!(command.command_line().contains("-auto-orient -resize 100x200"));
    }

    #[test]
    fn test_crop_and_animation_handling() {
        let version = ImageVersion {
            width: Some(100),
            height: Some(100),
            crop: true,
            format: Some("jpeg".into()),
            ..Default::default()
        };
        let (command, dimensions) =
            plan_conversion(Path::new("/in"), Path::new("/out"), &info("gif", 400, 200, None), &version);

        assert_eq!(dimensions, (100, 50));
        let line = command.command_line();
        assert!(line.starts_with("convert -delete '1-999' -flatten -scene 1"));
        assert!(line.contains("-gravity center -crop 100x100+0+0"));

        let gif = ImageVersion::default();
        let (command, _) =
            plan_conversion(Path::new("/in"), Path::new("/out"), &info("gif", 10, 10, None), &gif);
        assert!(command.command_line().starts_with("convert -coalesce"));
    }

    #[test]
    fn test_params_accept_single_version() {
        let params = json!({
            "input_url": "http://example.com/a.jpg",
            "versions": {"target_url": "s3:bucket/a.png", "width": 100, "strip_metadata": true}
        });
        let parsed: ImageParams = parse_params(params.as_object().unwrap()).unwrap();
        assert_eq!(parsed.versions.len(), 1);
        assert!(parsed.versions[0].strip_metadata);
        assert_eq!(content_type_for("png"), Some("image/png"));

        let empty = json!({"input_url": "http://example.com/a.jpg", "versions": []});
        let parsed: ImageParams = parse_params(empty.as_object().unwrap()).unwrap();
        assert!(parsed.versions.is_empty());
    }
}
