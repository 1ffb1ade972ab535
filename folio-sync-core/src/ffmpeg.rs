//! [`MediaHandler`] backed by `ffmpeg` and `ffprobe`.
//!
//! The watermark is drawn bottom-right with a soft shadow, sized relative to
//! the frame width. The text is handed to `drawtext` through a `textfile`, so
//! quotes, colons and `%` in it need no escaping.
//!
//! Images are turned upright from their EXIF orientation and flattened onto
//! white before the JPEG encode.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::config::WatermarkConfig;
use crate::contract::{Dimensions, MediaHandler, MediaInfo};
use crate::error::HandlerError;
use crate::exec;

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

pub struct FfmpegHandler {
    watermark: WatermarkConfig,
    timeout: Duration,
}

impl FfmpegHandler {
    pub fn new(watermark: WatermarkConfig, timeout: Duration) -> Self {
        FfmpegHandler { watermark, timeout }
    }

    /// Write the watermark text where `drawtext` can read it verbatim.
    fn text_file(&self) -> Result<NamedTempFile, HandlerError> {
        let mut file = tempfile::Builder::new()
            .prefix("folio-watermark-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(self.watermark.text.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    fn drawtext(&self, text_file: &Path) -> String {
        let wm = &self.watermark;
        let mut filter = format!("drawtext=textfile={}:expansion=none", filter_path(text_file));
        if let Some(font) = &wm.font_file {
            filter.push_str(&format!(":fontfile={}", filter_path(font)));
        }
        filter.push_str(&format!(
            ":fontsize=w*{size}:fontcolor=white@{opacity}\
             :shadowcolor=black@0.6:shadowx=2:shadowy=2\
             :x=w-text_w-w*{margin}:y=h-text_h-w*{margin}",
            size = wm.font_size_ratio,
            opacity = wm.opacity,
            margin = wm.margin_ratio,
        ));
        filter
    }

    fn image_filter(&self, text_file: &Path, upright: Upright) -> String {
        let mut filter = String::new();
        if let Some(turn) = upright.filter() {
            filter.push_str(turn);
            filter.push(',');
        }
        filter.push_str(FLATTEN_ON_WHITE);
        filter.push_str(&format!(
            ",scale=w='min(iw,{max})':h=-2,{draw}",
            max = self.watermark.max_image_width,
            draw = self.drawtext(text_file)
        ));
        filter
    }

    async fn run_probe(&self, input: &Path) -> Result<(MediaInfo, Upright), HandlerError> {
        let args: Vec<&std::ffi::OsStr> = vec![
            "-v".as_ref(),
            "error".as_ref(),
            "-select_streams".as_ref(),
            "v:0".as_ref(),
            "-read_intervals".as_ref(),
            "%+#1".as_ref(),
            "-show_entries".as_ref(),
            PROBE_ENTRIES.as_ref(),
            "-of".as_ref(),
            "json".as_ref(),
            input.as_os_str(),
        ];
        let output = exec::run(FFPROBE, args, self.timeout).await?;
        parse_probe_with_upright(&output.stdout)
    }
}

const PROBE_ENTRIES: &str = "stream=width,height:stream_tags=rotate,Orientation:stream_side_data=rotation\
     :frame_tags=Orientation:frame_side_data=rotation:format=duration";

/// Composite over white: invert, premultiply by alpha, invert back. Opaque
/// pixels come out unchanged, transparent ones white.
const FLATTEN_ON_WHITE: &str = "format=rgba,negate,premultiply=inplace=1,negate,format=rgb24";

/// The flip or turn a stored frame needs to display upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Upright {
    #[default]
    AsStored,
    Mirror,
    HalfTurn,
    Flip,
    Transpose,
    Clockwise,
    Transverse,
    CounterClockwise,
}

impl Upright {
    /// From the EXIF `Orientation` tag (1-8). Unknown values leave the frame as stored.
    pub fn from_exif(tag: u8) -> Self {
        match tag {
            2 => Upright::Mirror,
            3 => Upright::HalfTurn,
            4 => Upright::Flip,
            5 => Upright::Transpose,
            6 => Upright::Clockwise,
            7 => Upright::Transverse,
            8 => Upright::CounterClockwise,
            _ => Upright::AsStored,
        }
    }

    /// From a clockwise display rotation in degrees. Only quarter turns count.
    pub fn from_clockwise(degrees: i64) -> Self {
        match degrees.rem_euclid(360) {
            90 => Upright::Clockwise,
            180 => Upright::HalfTurn,
            270 => Upright::CounterClockwise,
            _ => Upright::AsStored,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Upright::Transpose | Upright::Clockwise | Upright::Transverse | Upright::CounterClockwise
        )
    }

    fn filter(self) -> Option<&'static str> {
        match self {
            Upright::AsStored => None,
            Upright::Mirror => Some("hflip"),
            Upright::HalfTurn => Some("hflip,vflip"),
            Upright::Flip => Some("vflip"),
            Upright::Transpose => Some("transpose=cclock_flip"),
            Upright::Clockwise => Some("transpose=clock"),
            Upright::Transverse => Some("transpose=clock_flip"),
            Upright::CounterClockwise => Some("transpose=cclock"),
        }
    }
}

/// Quote a path for use as a filter option value.
fn filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Map a 1-100 JPEG quality onto ffmpeg's `-q:v` scale (2 best, 31 worst).
pub fn jpeg_qscale(quality: u8) -> u8 {
    let quality = u32::from(quality.clamp(1, 100));
    (31 - (quality - 1) * 29 / 99) as u8
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    frames: Vec<ProbeFrame>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFrame {
    #[serde(default)]
    tags: Option<ProbeTags>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: Option<ProbeTags>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
    #[serde(rename = "Orientation")]
    orientation: Option<String>,
}

impl ProbeTags {
    fn exif(&self) -> Option<Upright> {
        let tag: u8 = self.orientation.as_deref()?.trim().parse().ok()?;
        Some(Upright::from_exif(tag))
    }

    fn rotate(&self) -> Option<Upright> {
        let degrees: i64 = self.rotate.as_deref()?.trim().parse().ok()?;
        Some(Upright::from_clockwise(degrees))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    /// Display matrix rotation, counter-clockwise degrees.
    rotation: Option<f64>,
}

fn side_data_upright(list: &[ProbeSideData]) -> Option<Upright> {
    let rotation = list.iter().find_map(|s| s.rotation)?;
    Some(Upright::from_clockwise(-(rotation.round() as i64)))
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output into displayed dimensions and duration.
///
/// Phone videos store portrait footage as landscape frames plus a rotation,
/// and phone photos carry an EXIF orientation; a quarter turn swaps the
/// reported width and height.
pub fn parse_probe(raw: &str) -> Result<MediaInfo, HandlerError> {
    parse_probe_with_upright(raw).map(|(info, _)| info)
}

fn parse_probe_with_upright(raw: &str) -> Result<(MediaInfo, Upright), HandlerError> {
    let probe: ProbeOutput = serde_json::from_str(raw).map_err(|e| HandlerError::Probe(e.to_string()))?;

    let frame = probe.frames.first();
    let stream = probe.streams.first();
    let upright = frame
        .and_then(|f| f.tags.as_ref())
        .and_then(ProbeTags::exif)
        .or_else(|| frame.and_then(|f| side_data_upright(&f.side_data_list)))
        .or_else(|| stream.and_then(|s| side_data_upright(&s.side_data_list)))
        .or_else(|| stream.and_then(|s| s.tags.as_ref()).and_then(ProbeTags::exif))
        .or_else(|| stream.and_then(|s| s.tags.as_ref()).and_then(ProbeTags::rotate))
        .unwrap_or_default();

    let dimensions = stream.and_then(|stream| {
        let (width, height) = (stream.width?, stream.height?);
        Some(if upright.swaps_axes() {
            Dimensions {
                width: height,
                height: width,
            }
        } else {
            Dimensions { width, height }
        })
    });

    let duration = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok((MediaInfo { dimensions, duration }, upright))
}

#[async_trait]
impl MediaHandler for FfmpegHandler {
    async fn watermark_image(&self, input: &Path, output: &Path) -> Result<(), HandlerError> {
        // Orientation is applied explicitly, so ffmpeg must not rotate on its own too.
        let upright = match self.run_probe(input).await {
            Ok((_, upright)) => upright,
            Err(e) => {
                tracing::warn!(input = %input.display(), error = %e, "Could not read orientation, encoding as stored");
                Upright::AsStored
            }
        };
        let text = self.text_file()?;
        let filter = self.image_filter(text.path(), upright);
        let qscale = jpeg_qscale(self.watermark.jpeg_quality).to_string();
        let args: Vec<&std::ffi::OsStr> = vec![
            "-nostdin".as_ref(),
            "-y".as_ref(),
            "-noautorotate".as_ref(),
            "-i".as_ref(),
            input.as_os_str(),
            "-vf".as_ref(),
            filter.as_ref(),
            "-frames:v".as_ref(),
            "1".as_ref(),
            "-q:v".as_ref(),
            qscale.as_ref(),
            output.as_os_str(),
        ];
        exec::run(FFMPEG, args, self.timeout).await?;
        tracing::debug!(input = %input.display(), output = %output.display(), "Watermarked image");
        Ok(())
    }

    async fn watermark_video(&self, input: &Path, output: &Path) -> Result<(), HandlerError> {
        let text = self.text_file()?;
        let filter = self.drawtext(text.path());
        let args: Vec<&std::ffi::OsStr> = vec![
            "-nostdin".as_ref(),
            "-y".as_ref(),
            "-i".as_ref(),
            input.as_os_str(),
            "-vf".as_ref(),
            filter.as_ref(),
            "-c:v".as_ref(),
            "libx264".as_ref(),
            "-preset".as_ref(),
            "fast".as_ref(),
            "-crf".as_ref(),
            "18".as_ref(),
            "-c:a".as_ref(),
            "copy".as_ref(),
            output.as_os_str(),
        ];
        exec::run(FFMPEG, args, self.timeout).await?;
        tracing::debug!(input = %input.display(), output = %output.display(), "Watermarked video");
        Ok(())
    }

    async fn thumbnail(&self, video: &Path, at_secs: f64, output: &Path) -> Result<(), HandlerError> {
        let at = format!("{at_secs:.3}");
        let args: Vec<&std::ffi::OsStr> = vec![
            "-nostdin".as_ref(),
            "-y".as_ref(),
            "-ss".as_ref(),
            at.as_ref(),
            "-i".as_ref(),
            video.as_os_str(),
            "-frames:v".as_ref(),
            "1".as_ref(),
            "-q:v".as_ref(),
            "2".as_ref(),
            output.as_os_str(),
        ];
        exec::run(FFMPEG, args, self.timeout).await?;
        if !output.exists() {
            // ffmpeg exits 0 without writing a frame when the seek lands past the last one.
            return Err(HandlerError::Other(format!("no frame extracted at {at}s")));
        }
        Ok(())
    }

    async fn probe(&self, input: &Path) -> Result<MediaInfo, HandlerError> {
        self.run_probe(input).await.map(|(info, _)| info)
    }
}
