use crate::core::{BufferFlags, BufferInfo, Result, TrackFormat};
use crate::player::audio_output::{AudioSinkConfig, ChannelConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 输出缓冲出队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueOutput {
    /// 输出格式变化
    FormatChanged,
    /// 超时内没有可用输出
    TryAgainLater,
    /// 输出缓冲集合已变化
    BuffersChanged,
    /// 可用的输出缓冲索引，BufferInfo 已填充
    Buffer(usize),
}

/// 解封装器 - 读取容器文件，按轨道给出压缩样本
///
/// 实例只在创建它的解码线程中使用，不要求 Send。
pub trait MediaExtractor {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    /// 选择要读取的轨道，之后只读取该轨道的样本
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// 把当前样本复制到 buf 开头
    ///
    /// 返回：
    /// - Ok(Some(size)): 样本大小
    /// - Ok(None): 没有更多样本
    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// 当前样本的时间戳（微秒）
    fn sample_time(&self) -> i64;

    /// 移到下一个样本；没有更多样本时返回 false
    fn advance(&mut self) -> Result<bool>;

    fn release(&mut self) -> Result<()>;
}

/// 有状态的解码器，按“申请输入缓冲 / 入队 / 取输出 / 归还”的协议工作
pub trait MediaCodec {
    fn start(&mut self) -> Result<()>;

    /// 申请一个空闲输入缓冲，超时返回 None
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    fn dequeue_output_buffer(&mut self, info: &mut BufferInfo, timeout: Duration) -> Result<DequeueOutput>;

    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    /// 单个输出缓冲的容量（未知时返回 None）
    fn output_buffer_capacity(&self) -> Option<usize> {
        None
    }

    /// 归还输出缓冲；绑定了渲染表面时 render=true 会把这一帧送显
    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

/// 音频输出设备（16 位 PCM 流式写入）
pub trait AudioSink {
    fn play(&mut self) -> Result<()>;

    /// 阻塞写入 data[offset..offset + len]，返回写入的字节数
    fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

/// 送显的一帧
#[derive(Debug, Clone, Copy)]
pub struct RenderedFrame<'a> {
    pub presentation_time_us: i64,
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

/// 渲染表面 - 由外部 UI 持有，视频解码器直接往里送帧
pub trait RenderSurface: Send + Sync {
    fn render(&self, frame: &RenderedFrame<'_>) -> Result<()>;
}

pub type SurfaceHandle = Arc<dyn RenderSurface>;

/// 平台后端：创建解封装器、解码器和音频设备
///
/// 后端在线程间共享；它创建出来的对象归各自的解码线程独占。
pub trait MediaBackend: Send + Sync {
    fn open_extractor(&self, path: &Path) -> Result<Box<dyn MediaExtractor>>;

    /// 按轨道格式创建并配置解码器；视频解码器绑定 surface
    fn create_decoder(
        &self,
        format: &TrackFormat,
        surface: Option<SurfaceHandle>,
    ) -> Result<Box<dyn MediaCodec>>;

    /// 设备的最小流式缓冲（字节，16 位 PCM）；未知时返回 None
    fn min_audio_buffer_size(&self, sample_rate: u32, channels: ChannelConfig) -> Option<usize>;

    fn create_audio_sink(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>>;

    fn description(&self) -> String;
}
