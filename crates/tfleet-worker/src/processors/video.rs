//! Video and audio transcoding.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use tfleet_media::{check_tool, CommandParams, CommandRunner, FfmpegCommand, FfmpegProgress, ThumbnailOptions, TranscodeOptions};
use tfleet_models::Params;
use tfleet_storage::{parse_uri, OpenMode, ResourceHandle};

use super::{one_or_many, reported_url};
use crate::error::WorkerResult;
use crate::processor::{parse_params, Processor, ProcessorContext};

#[derive(Debug, Deserialize)]
struct VideoParams {
    input_url: String,
    #[serde(default, deserialize_with = "one_or_many")]
    versions: Vec<VideoVersion>,
    #[serde(default)]
    thumbnail: Option<ThumbnailSpec>,
}

#[derive(Debug, Deserialize)]
struct VideoVersion {
    target_url: String,
    #[serde(default)]
    content_type: Option<String>,
    /// Remove ID3 tags from the input before transcoding
    #[serde(default)]
    strip_metadata: bool,
    #[serde(flatten)]
    options: TranscodeOptions,
}

#[derive(Debug, Deserialize)]
struct ThumbnailSpec {
    target_url: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(flatten)]
    options: ThumbnailOptions,
}

/// Transcodes one input into every requested version, then optionally grabs
/// a thumbnail.
///
/// Result: `{urls: [...], thumbnail_url?}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoProcessor;

#[async_trait]
impl Processor for VideoProcessor {
    fn name(&self) -> &'static str {
        "video"
    }

    async fn execute(&self, params: &Params, ctx: &ProcessorContext) -> WorkerResult<Params> {
        let params: VideoParams = parse_params(params)?;
        let mut input = parse_uri(&params.input_url, ctx.storage())?;
        let result = transcode_all(&params, &mut input, ctx).await;
        input.close();
        result
    }
}

async fn transcode_all(
    params: &VideoParams,
    input: &mut ResourceHandle,
    ctx: &ProcessorContext,
) -> WorkerResult<Params> {
    let input_path = input.open(OpenMode::Read).await?;

    let count = params.versions.len();
    let mut urls = Vec::with_capacity(count);
    let mut duration_secs = None;

    for (index, version) in params.versions.iter().enumerate() {
        let mut output = parse_uri(&version.target_url, ctx.storage())?;
        let outcome = transcode_version(&input_path, version, &mut output, index, count, ctx).await;
        output.close();

        let progress = outcome?;
        if let Some(ms) = progress.expected_duration_ms {
            duration_secs = Some(ms as f64 / 1000.0);
        }
        urls.push(reported_url(&output));
    }

    let mut result = Params::new();
    result.insert("urls".into(), json!(urls));

    if let Some(spec) = &params.thumbnail {
        let mut output = parse_uri(&spec.target_url, ctx.storage())?;
        let outcome = extract_thumbnail(&input_path, spec, &mut output, duration_secs, ctx).await;
        output.close();
        outcome?;
        result.insert("thumbnail_url".into(), json!(reported_url(&output)));
    }

    Ok(result)
}

async fn transcode_version(
    input_path: &Path,
    version: &VideoVersion,
    output: &mut ResourceHandle,
    index: usize,
    count: usize,
    ctx: &ProcessorContext,
) -> WorkerResult<FfmpegProgress> {
    let output_path = output.open(OpenMode::Write).await?;
    info!(target_url = %version.target_url, "Transcoding version {}/{}", index + 1, count);

    if version.strip_metadata {
        strip_id3_tags(input_path, ctx).await?;
    }

    let mut options = version.options.clone();
    if options.format.is_none() {
        options.format = muxer_for(&version.target_url).map(str::to_string);
    }

    let mut command = FfmpegCommand::transcode(input_path, &output_path, &options);
    if let Some(threads) = ctx.ffmpeg_threads() {
        command = command.threads(threads);
    }

    let reporter = ctx.progress().clone();
    let progress = command
        .run(Some(ctx.cancel()), |progress| {
            if let Some(fraction) = progress.fraction() {
                reporter.report((fraction + index as f64) / count as f64);
            }
        })
        .await?;

    if let Some(content_type) = &version.content_type {
        output.set_content_type(Some(content_type.clone()));
    }
    output.save().await?;
    Ok(progress)
}

async fn extract_thumbnail(
    input_path: &Path,
    spec: &ThumbnailSpec,
    output: &mut ResourceHandle,
    duration_secs: Option<f64>,
    ctx: &ProcessorContext,
) -> WorkerResult<()> {
    let output_path = output.open(OpenMode::Write).await?;
    let at_seconds = spec.options.position(duration_secs);
    info!(target_url = %spec.target_url, at_seconds, "Extracting thumbnail");

    FfmpegCommand::thumbnail(input_path, &output_path, &spec.options, at_seconds)
        .run(Some(ctx.cancel()), |_| {})
        .await?;

    let content_type = spec
        .content_type
        .clone()
        .unwrap_or_else(|| "image/jpeg".to_string());
    output.set_content_type(Some(content_type));
    output.save().await?;
    Ok(())
}

/// Strips ID3 tags in place.
async fn strip_id3_tags(path: &Path, ctx: &ProcessorContext) -> WorkerResult<()> {
    check_tool("id3v2")?;
    let params = CommandParams::new().with("file", path.display());
    CommandRunner::new("id3v2 --delete-all :file")
        .with_cancel(ctx.cancel())
        .run_with_output(&params, |line| {
            let line = line.trim();
            if !line.is_empty() && !(line.starts_with("Stripping id3 tag in") && line.ends_with("stripped.")) {
                warn!("ID3 stripping failed, ignoring: {}", line);
            }
        })
        .await?;
    Ok(())
}

/// ffmpeg muxer matching the extension of `target_url`, for outputs whose
/// local store has no extension to infer it from.
fn muxer_for(target_url: &str) -> Option<&'static str> {
    let path = target_url.split(['?', '#']).next().unwrap_or_default();
    let extension = Path::new(path).extension()?.to_str()?.to_lowercase();
    let muxer = match extension.as_str() {
        "mp4" | "m4v" => "mp4",
        "m4a" => "ipod",
        "mov" => "mov",
        "webm" => "webm",
        "mkv" => "matroska",
        "mp3" => "mp3",
        "ogg" | "oga" | "ogv" => "ogg",
        "flv" => "flv",
        "wav" => "wav",
        "aac" => "adts",
        "avi" => "avi",
        "ts" => "mpegts",
        _ => return None,
    };
    Some(muxer)
}
