// 播放器核心模块

pub mod codec;          // 解封装/解码/音频设备/渲染表面的抽象接口
pub mod track_selector;
pub mod feeder;
pub mod state;
pub mod sync_pacer;
pub mod audio_output;
pub mod decode_loop;
pub mod manager;
pub mod memory;         // 内存后端（测试和 --synthetic 演示）

#[cfg(feature = "ffmpeg")]
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod backend;

pub use codec::{AudioSink, DequeueOutput, MediaBackend, MediaCodec, MediaExtractor, RenderSurface, RenderedFrame, SurfaceHandle};
pub use audio_output::{AudioOutputSink, AudioSinkConfig, ChannelConfig};
pub use decode_loop::{run_decode_loop, spawn_decode_loop, DecodeLoopContext};
pub use manager::PlaybackController;
pub use memory::{MemoryBackend, MemoryContainer, MemoryTrack, RecordingSurface};
pub use state::{CancelToken, SharedPlaybackState};
pub use sync_pacer::{PaceOutcome, SyncPacer};

#[cfg(feature = "ffmpeg")]
pub use backend::FfmpegBackend;
