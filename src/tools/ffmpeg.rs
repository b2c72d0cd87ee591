use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MediaError;
use crate::ports::media::Transcoder;
use crate::tools::process;
use crate::track::AudioFormat;

const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(600);

/// `ffmpeg` is only needed once something is downloaded, so it is looked up
/// per call instead of up front.
#[derive(Debug, Clone, Default)]
pub struct Ffmpeg {
    configured: Option<PathBuf>,
}

impl Ffmpeg {
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self { configured }
    }

    pub fn binary(&self) -> Result<PathBuf, MediaError> {
        process::locate("ffmpeg", self.configured.as_deref())
    }
}

fn transcode_args(input: &Path, output: &Path, format: AudioFormat, quality_kbps: u32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        input.display().to_string(),
        "-vn".into(),
        "-c:a".into(),
        format.codec().into(),
    ];
    if format.uses_bitrate() {
        args.push("-b:a".into());
        args.push(format!("{quality_kbps}k"));
    }
    args.push("-threads".into());
    args.push("0".into());
    args.push(output.display().to_string());
    args
}

#[async_trait::async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: AudioFormat,
        quality_kbps: u32,
    ) -> Result<(), MediaError> {
        let binary = self.binary()?;
        let args = transcode_args(input, output, format, quality_kbps);
        process::run(&binary, &args, TRANSCODE_TIMEOUT).await?;

        if !tokio::fs::try_exists(output).await? {
            return Err(MediaError::InvalidOutput(format!(
                "ffmpeg did not write {}",
                output.display()
            )));
        }
        Ok(())
    }
}
