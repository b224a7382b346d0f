use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::player::codec::SurfaceHandle;

/// 轨道类型（每种类型各跑一个解码循环）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// 轨道选择用的 mime 前缀
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio/",
            TrackKind::Video => "video/",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "音频",
            TrackKind::Video => "视频",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解码器私有的编解码参数（例如 FFmpeg 的 codec parameters）
pub type CodecConfig = Arc<dyn Any + Send + Sync>;

/// 解封装器给出的轨道格式（对应容器里的一条流）
#[derive(Clone, Default)]
pub struct TrackFormat {
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_us: Option<i64>,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
    pub max_input_size: Option<usize>,
    /// 后端私有参数，只有创建它的后端认识
    pub codec_config: Option<CodecConfig>,
}

impl TrackFormat {
    pub fn audio(mime: &str, sample_rate: u32, channel_count: u16, max_input_size: usize) -> Self {
        Self {
            mime: mime.to_string(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            max_input_size: Some(max_input_size),
            ..Default::default()
        }
    }

    pub fn video(mime: &str, width: u32, height: u32, duration_us: i64) -> Self {
        Self {
            mime: mime.to_string(),
            width: Some(width),
            height: Some(height),
            duration_us: Some(duration_us),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = Some(size);
        self
    }

    pub fn with_codec_config(mut self, config: CodecConfig) -> Self {
        self.codec_config = Some(config);
        self
    }
}

impl fmt::Debug for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackFormat")
            .field("mime", &self.mime)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("duration_us", &self.duration_us)
            .field("channel_count", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("max_input_size", &self.max_input_size)
            .field("codec_config", &self.codec_config.is_some())
            .finish()
    }
}

/// 视频轨道描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTrackInfo {
    pub width: u32,
    pub height: u32,
    pub duration_us: i64,
}

/// 音频轨道描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub max_input_size: usize,
}

/// 单个解码会话读取到的轨道信息，创建后只读
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    pub index: usize,
    pub mime: String,
    pub kind: TrackKind,
    pub video: Option<VideoTrackInfo>,
    pub audio: Option<AudioTrackInfo>,
}

/// 缓冲区标志位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 2);

    pub fn contains(&self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(BufferFlags::END_OF_STREAM)
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

/// 每个输出缓冲的描述，出队时填充，随即消费
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn set(&mut self, offset: usize, size: usize, presentation_time_us: i64, flags: BufferFlags) {
        self.offset = offset;
        self.size = size;
        self.presentation_time_us = presentation_time_us;
        self.flags = flags;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_end_of_stream()
    }
}

/// 播放源：渲染表面（纯音频时可缺省）+ 本地文件路径
#[derive(Clone)]
pub struct MediaSource {
    pub surface: Option<SurfaceHandle>,
    pub file_path: PathBuf,
}

impl MediaSource {
    pub fn new(surface: Option<SurfaceHandle>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            surface,
            file_path: file_path.into(),
        }
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("surface", &self.surface.is_some())
            .field("file_path", &self.file_path)
            .finish()
    }
}

/// 解码循环状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// 解码循环的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
    /// 输出端收到 EOS
    EndOfStream,
    /// 外部 stop()，playing 标志被清除
    Stopped,
    /// destroy 取消
    Cancelled,
}

/// 解码循环结束后的统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopReport {
    pub kind: TrackKind,
    pub final_state: LoopState,
    pub exit: LoopExit,
    pub samples_queued: u64,
    pub buffers_released: u64,
    pub frames_rendered: u64,
    pub bytes_written: u64,
    pub last_pts_us: Option<i64>,
}

impl LoopReport {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            final_state: LoopState::Starting,
            exit: LoopExit::Stopped,
            samples_queued: 0,
            buffers_released: 0,
            frames_rendered: 0,
            bytes_written: 0,
            last_pts_us: None,
        }
    }
}

/// 解码线程上报给控制器的事件
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    LoopStarted(TrackKind),
    TrackMissing(TrackKind),
    LoopFinished(LoopReport),
    LoopFailed { kind: TrackKind, error: String },
}

/// 播放器状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub playing: bool,
    pub paused: bool,
    pub live_loops: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.is_end_of_stream());
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(!BufferFlags::NONE.is_end_of_stream());
        assert!(!BufferFlags::KEY_FRAME.contains(BufferFlags::NONE));
    }

    #[test]
    fn test_mime_prefix() {
        assert_eq!(TrackKind::Audio.mime_prefix(), "audio/");
        assert_eq!(TrackKind::Video.mime_prefix(), "video/");
    }
}
