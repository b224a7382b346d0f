use crate::core::{Result, TrackFormat};
use crate::player::audio_output::{AudioSinkConfig, ChannelConfig};
use crate::player::codec::{AudioSink, MediaBackend, MediaCodec, MediaExtractor, SurfaceHandle};
use crate::player::decoder::FfmpegCodec;
use crate::player::demuxer::FfmpegExtractor;
use ffmpeg_next as ffmpeg;
use log::info;
use std::path::Path;

#[cfg(feature = "cpal-output")]
use crate::player::audio_output::CpalAudioSink;

/// 本地文件后端：FFmpeg 解封装 + 解码，cpal 输出声音
///
/// 没有启用 `cpal-output` 时无法创建音频设备，音频循环会以 AudioError 结束，
/// 视频循环不受影响。
pub struct FfmpegBackend {
    _private: (),
}

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        info!("✅ FFmpeg 初始化完成");
        Ok(Self { _private: () })
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_extractor(&self, path: &Path) -> Result<Box<dyn MediaExtractor>> {
        let extractor = FfmpegExtractor::open(path)?;
        info!("📁 {}", extractor.description());
        Ok(Box::new(extractor))
    }

    fn create_decoder(&self, format: &TrackFormat, surface: Option<SurfaceHandle>) -> Result<Box<dyn MediaCodec>> {
        Ok(Box::new(FfmpegCodec::new(format, surface)?))
    }

    #[cfg(feature = "cpal-output")]
    fn min_audio_buffer_size(&self, sample_rate: u32, channels: ChannelConfig) -> Option<usize> {
        CpalAudioSink::min_buffer_size(sample_rate, channels)
    }

    #[cfg(not(feature = "cpal-output"))]
    fn min_audio_buffer_size(&self, _sample_rate: u32, _channels: ChannelConfig) -> Option<usize> {
        None
    }

    #[cfg(feature = "cpal-output")]
    fn create_audio_sink(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(CpalAudioSink::new(config)?))
    }

    #[cfg(not(feature = "cpal-output"))]
    fn create_audio_sink(&self, _config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>> {
        Err(crate::core::PlayerError::AudioError("未启用 cpal-output，没有可用的音频设备".to_string()))
    }

    fn description(&self) -> String {
        if cfg!(feature = "cpal-output") {
            "FFmpeg + cpal".to_string()
        } else {
            "FFmpeg（无声卡输出）".to_string()
        }
    }
}
