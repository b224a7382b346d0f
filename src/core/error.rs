use crate::core::TrackKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("无法找到{0}轨道")]
    TrackNotFound(TrackKind),

    #[error("轨道格式缺少字段: {0}")]
    MissingFormatKey(&'static str),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("播放源未设置")]
    NotInitialized,

    #[error("{0}解码线程异常退出")]
    ThreadPanicked(TrackKind),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
