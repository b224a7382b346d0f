//! 本地音视频播放引擎：音频、视频各一个解码循环，按时间戳同步输出

pub mod core;
pub mod player;
