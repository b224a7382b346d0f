//! 内存后端
//!
//! 容器、解码器、音频设备、渲染表面全部在内存里实现：
//! - [`MemoryContainer`]：按轨道保存压缩样本（这里就是原始 PCM / 原始帧）
//! - [`PassthroughCodec`]：严格按输入/输出缓冲交换协议工作的直通解码器
//! - [`RecordingAudioSink`] / [`RecordingSurface`]：记录收到的数据
//!
//! 不依赖 FFmpeg 和声卡，用于测试和 `--synthetic` 演示。

use crate::core::{BufferFlags, BufferInfo, PlayerError, Result, TrackFormat};
use crate::player::audio_output::{AudioSinkConfig, ChannelConfig};
use crate::player::codec::{
    AudioSink, DequeueOutput, MediaBackend, MediaCodec, MediaExtractor, RenderSurface, RenderedFrame,
    SurfaceHandle,
};
use crossbeam::queue::SegQueue;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const INPUT_SLOTS: usize = 4;
const OUTPUT_SLOTS: usize = 4;
const DEFAULT_INPUT_CAPACITY: usize = 256 * 1024;

pub const RAW_AUDIO_MIME: &str = "audio/raw";
pub const RAW_VIDEO_MIME: &str = "video/raw";

/// 一个压缩样本
#[derive(Debug, Clone)]
pub struct MemorySample {
    pub presentation_time_us: i64,
    pub data: Vec<u8>,
}

/// 一条轨道
#[derive(Debug, Clone)]
pub struct MemoryTrack {
    pub format: TrackFormat,
    pub samples: Vec<MemorySample>,
}

impl MemoryTrack {
    pub fn new(format: TrackFormat) -> Self {
        Self {
            format,
            samples: Vec::new(),
        }
    }

    pub fn push_sample(&mut self, presentation_time_us: i64, data: Vec<u8>) {
        self.samples.push(MemorySample {
            presentation_time_us,
            data,
        });
    }

    /// 所有样本拼接后的字节
    pub fn concatenated(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.data.iter().copied()).collect()
    }

    pub fn total_bytes(&self) -> usize {
        self.samples.iter().map(|s| s.data.len()).sum()
    }

    /// 单声道/多声道 16 位正弦波 PCM，每个样本 1024 个采样帧
    pub fn sine_pcm(sample_rate: u32, channel_count: u16, duration: Duration, frequency: f32) -> Self {
        const FRAMES_PER_SAMPLE: usize = 1024;
        let frame_size = channel_count as usize * 2;
        let total_frames = (duration.as_secs_f64() * sample_rate as f64) as usize;
        let format = TrackFormat::audio(RAW_AUDIO_MIME, sample_rate, channel_count, FRAMES_PER_SAMPLE * frame_size)
            .with_duration(duration.as_micros() as i64);
        let mut track = MemoryTrack::new(format);

        let mut frame = 0usize;
        while frame < total_frames {
            let frames = FRAMES_PER_SAMPLE.min(total_frames - frame);
            let mut data = Vec::with_capacity(frames * frame_size);
            for i in frame..frame + frames {
                let t = i as f32 / sample_rate as f32;
                let value = ((t * frequency * std::f32::consts::TAU).sin() * i16::MAX as f32 * 0.5) as i16;
                for _ in 0..channel_count {
                    data.extend_from_slice(&value.to_le_bytes());
                }
            }
            let pts = frame as i64 * 1_000_000 / sample_rate as i64;
            track.push_sample(pts, data);
            frame += frames;
        }
        track
    }

    /// 原始视频帧轨道，每帧负载里写入帧序号
    pub fn raw_video(width: u32, height: u32, fps: u32, duration: Duration) -> Self {
        let frame_count = (duration.as_secs_f64() * fps as f64).round() as usize;
        let format = TrackFormat::video(RAW_VIDEO_MIME, width, height, duration.as_micros() as i64);
        let mut track = MemoryTrack::new(format);
        for n in 0..frame_count {
            let pts = n as i64 * 1_000_000 / fps as i64;
            let mut data = (n as u32).to_le_bytes().to_vec();
            data.extend_from_slice(&width.to_le_bytes());
            data.extend_from_slice(&height.to_le_bytes());
            track.push_sample(pts, data);
        }
        track
    }
}

/// 内存容器
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    tracks: Vec<MemoryTrack>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_track(&mut self, track: MemoryTrack) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    pub fn track(&self, index: usize) -> Option<&MemoryTrack> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[MemoryTrack] {
        &self.tracks
    }

    /// 一条单声道 44.1kHz 音轨 + 一条 320x240 视频轨
    pub fn synthetic_av(duration: Duration) -> Self {
        let mut container = Self::new();
        container.add_track(MemoryTrack::sine_pcm(44100, 1, duration, 440.0));
        container.add_track(MemoryTrack::raw_video(320, 240, 25, duration));
        container
    }
}

/// 资源计数器，用来检查每个对象恰好释放一次
#[derive(Debug, Default)]
pub struct MemoryProbe {
    extractors_opened: AtomicUsize,
    extractors_released: AtomicUsize,
    decoders_created: AtomicUsize,
    decoders_stopped: AtomicUsize,
    decoders_released: AtomicUsize,
    sinks_created: AtomicUsize,
    sinks_released: AtomicUsize,
    active_decoders: AtomicUsize,
    peak_active_decoders: AtomicUsize,
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSnapshot {
    pub extractors_opened: usize,
    pub extractors_released: usize,
    pub decoders_created: usize,
    pub decoders_stopped: usize,
    pub decoders_released: usize,
    pub sinks_created: usize,
    pub sinks_released: usize,
    pub active_decoders: usize,
    pub peak_active_decoders: usize,
}

impl MemoryProbe {
    pub fn snapshot(&self) -> ProbeSnapshot {
        ProbeSnapshot {
            extractors_opened: self.extractors_opened.load(Ordering::SeqCst),
            extractors_released: self.extractors_released.load(Ordering::SeqCst),
            decoders_created: self.decoders_created.load(Ordering::SeqCst),
            decoders_stopped: self.decoders_stopped.load(Ordering::SeqCst),
            decoders_released: self.decoders_released.load(Ordering::SeqCst),
            sinks_created: self.sinks_created.load(Ordering::SeqCst),
            sinks_released: self.sinks_released.load(Ordering::SeqCst),
            active_decoders: self.active_decoders.load(Ordering::SeqCst),
            peak_active_decoders: self.peak_active_decoders.load(Ordering::SeqCst),
        }
    }

    fn decoder_created(&self) {
        self.decoders_created.fetch_add(1, Ordering::SeqCst);
        let active = self.active_decoders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active_decoders.fetch_max(active, Ordering::SeqCst);
    }

    fn decoder_released(&self) {
        self.decoders_released.fetch_add(1, Ordering::SeqCst);
        self.active_decoders.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 内存解封装器
pub struct MemoryExtractor {
    container: Arc<MemoryContainer>,
    selected: Option<usize>,
    cursor: usize,
    probe: Option<Arc<MemoryProbe>>,
}

impl MemoryExtractor {
    pub fn new(container: Arc<MemoryContainer>, probe: Option<Arc<MemoryProbe>>) -> Self {
        if let Some(ref probe) = probe {
            probe.extractors_opened.fetch_add(1, Ordering::SeqCst);
        }
        Self {
            container,
            selected: None,
            cursor: 0,
            probe,
        }
    }

    /// 当前读游标（已读样本数）
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn current_sample(&self) -> Result<Option<&MemorySample>> {
        let index = self
            .selected
            .ok_or_else(|| PlayerError::DecodeError("未选择轨道".to_string()))?;
        let track = self
            .container
            .track(index)
            .ok_or_else(|| PlayerError::DecodeError(format!("轨道 #{} 不存在", index)))?;
        Ok(track.samples.get(self.cursor))
    }
}

impl MediaExtractor for MemoryExtractor {
    fn track_count(&self) -> usize {
        self.container.tracks().len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        self.container
            .track(index)
            .map(|t| t.format.clone())
            .ok_or_else(|| PlayerError::DecodeError(format!("轨道 #{} 不存在", index)))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.track_count() {
            return Err(PlayerError::DecodeError(format!("轨道 #{} 不存在", index)));
        }
        self.selected = Some(index);
        self.cursor = 0;
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let sample = match self.current_sample()? {
            Some(sample) => sample,
            None => return Ok(None),
        };
        if sample.data.len() > buf.len() {
            return Err(PlayerError::DecodeError(format!(
                "输入缓冲太小: {} < {}",
                buf.len(),
                sample.data.len()
            )));
        }
        let size = sample.data.len();
        buf[..size].copy_from_slice(&sample.data);
        Ok(Some(size))
    }

    fn sample_time(&self) -> i64 {
        match self.current_sample() {
            Ok(Some(sample)) => sample.presentation_time_us,
            _ => -1,
        }
    }

    fn advance(&mut self) -> Result<bool> {
        self.cursor += 1;
        Ok(self.current_sample()?.is_some())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(ref probe) = self.probe {
            probe.extractors_released.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct PendingInput {
    index: usize,
    size: usize,
    presentation_time_us: i64,
    flags: BufferFlags,
}

struct OutputSlot {
    data: Vec<u8>,
    info: BufferInfo,
    in_use: bool,
}

/// 直通解码器：输入缓冲里的字节原样成为输出
pub struct PassthroughCodec {
    width: u32,
    height: u32,
    surface: Option<SurfaceHandle>,
    probe: Option<Arc<MemoryProbe>>,
    started: bool,
    format_reported: bool,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    pending: VecDeque<PendingInput>,
    outputs: Vec<OutputSlot>,
    ready: VecDeque<usize>,
    input_capacity: usize,
}

impl PassthroughCodec {
    pub fn new(format: &TrackFormat, surface: Option<SurfaceHandle>, probe: Option<Arc<MemoryProbe>>) -> Self {
        if let Some(ref probe) = probe {
            probe.decoder_created();
        }
        let input_capacity = format.max_input_size.filter(|s| *s > 0).unwrap_or(DEFAULT_INPUT_CAPACITY);
        Self {
            width: format.width.unwrap_or(0),
            height: format.height.unwrap_or(0),
            surface,
            probe,
            started: false,
            format_reported: false,
            inputs: (0..INPUT_SLOTS).map(|_| vec![0u8; input_capacity]).collect(),
            free_inputs: (0..INPUT_SLOTS).collect(),
            pending: VecDeque::new(),
            outputs: (0..OUTPUT_SLOTS)
                .map(|_| OutputSlot {
                    data: Vec::new(),
                    info: BufferInfo::default(),
                    in_use: false,
                })
                .collect(),
            ready: VecDeque::new(),
            input_capacity,
        }
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(PlayerError::DecodeError("解码器未启动".to_string()))
        }
    }

    /// 把已入队的输入搬到空闲输出槽
    fn pump(&mut self) {
        while !self.pending.is_empty() {
            let slot = match self.outputs.iter().position(|s| !s.in_use) {
                Some(slot) => slot,
                None => break,
            };
            let Some(input) = self.pending.pop_front() else { break };
            let output = &mut self.outputs[slot];
            output.data.clear();
            output.data.extend_from_slice(&self.inputs[input.index][..input.size]);
            output.info.set(0, input.size, input.presentation_time_us, input.flags);
            output.in_use = true;
            self.ready.push_back(slot);
            self.free_inputs.push_back(input.index);
        }
    }
}

impl MediaCodec for PassthroughCodec {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>> {
        self.ensure_started()?;
        self.pump();
        if let Some(index) = self.free_inputs.pop_front() {
            return Ok(Some(index));
        }
        thread::sleep(timeout);
        Ok(None)
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.inputs
            .get_mut(index)
            .map(|b| b.as_mut_slice())
            .ok_or_else(|| PlayerError::DecodeError(format!("无效的输入缓冲索引: {}", index)))
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.ensure_started()?;
        if index >= self.inputs.len() || size > self.input_capacity {
            return Err(PlayerError::DecodeError(format!("无效的输入: #{} {} 字节", index, size)));
        }
        self.pending.push_back(PendingInput {
            index,
            size,
            presentation_time_us,
            flags,
        });
        self.pump();
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, info: &mut BufferInfo, timeout: Duration) -> Result<DequeueOutput> {
        self.ensure_started()?;
        if !self.format_reported {
            self.format_reported = true;
            return Ok(DequeueOutput::FormatChanged);
        }
        self.pump();
        match self.ready.pop_front() {
            Some(slot) => {
                *info = self.outputs[slot].info;
                Ok(DequeueOutput::Buffer(slot))
            }
            None => {
                thread::sleep(timeout);
                Ok(DequeueOutput::TryAgainLater)
            }
        }
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        match self.outputs.get(index) {
            Some(slot) if slot.in_use => Ok(&slot.data[..slot.info.size]),
            _ => Err(PlayerError::DecodeError(format!("无效的输出缓冲索引: {}", index))),
        }
    }

    fn output_buffer_capacity(&self) -> Option<usize> {
        Some(self.input_capacity)
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<()> {
        let slot = match self.outputs.get_mut(index) {
            Some(slot) if slot.in_use => slot,
            _ => return Err(PlayerError::DecodeError(format!("重复释放输出缓冲: {}", index))),
        };
        if render && slot.info.size > 0 {
            if let Some(ref surface) = self.surface {
                surface.render(&RenderedFrame {
                    presentation_time_us: slot.info.presentation_time_us,
                    width: self.width,
                    height: self.height,
                    data: &slot.data[..slot.info.size],
                })?;
            }
        }
        slot.in_use = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        if let Some(ref probe) = self.probe {
            probe.decoders_stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.pending.clear();
        self.ready.clear();
        if let Some(ref probe) = self.probe {
            probe.decoder_released();
        }
        Ok(())
    }
}

/// 音频设备收到的数据
#[derive(Debug, Default, Clone)]
pub struct AudioLog {
    pub configs: Vec<AudioSinkConfig>,
    pub write_sizes: Vec<usize>,
    pub data: Vec<u8>,
    pub plays: usize,
    pub stops: usize,
    pub releases: usize,
}

impl AudioLog {
    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }
}

/// 记录写入内容的音频设备
pub struct RecordingAudioSink {
    log: Arc<Mutex<AudioLog>>,
    probe: Option<Arc<MemoryProbe>>,
}

impl RecordingAudioSink {
    pub fn new(config: &AudioSinkConfig, log: Arc<Mutex<AudioLog>>, probe: Option<Arc<MemoryProbe>>) -> Self {
        log.lock().configs.push(*config);
        if let Some(ref probe) = probe {
            probe.sinks_created.fetch_add(1, Ordering::SeqCst);
        }
        Self { log, probe }
    }
}

impl AudioSink for RecordingAudioSink {
    fn play(&mut self) -> Result<()> {
        self.log.lock().plays += 1;
        Ok(())
    }

    fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<usize> {
        let bytes = data
            .get(offset..offset + len)
            .ok_or_else(|| PlayerError::AudioError(format!("写入越界: {}+{} > {}", offset, len, data.len())))?;
        let mut log = self.log.lock();
        log.write_sizes.push(len);
        log.data.extend_from_slice(bytes);
        Ok(len)
    }

    fn stop(&mut self) -> Result<()> {
        self.log.lock().stops += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.log.lock().releases += 1;
        if let Some(ref probe) = self.probe {
            probe.sinks_released.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// 渲染记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRecord {
    pub presentation_time_us: i64,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

/// 记录送显帧的渲染表面
#[derive(Debug, Default)]
pub struct RecordingSurface {
    frames: SegQueue<RenderRecord>,
    rendered: AtomicUsize,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> usize {
        self.rendered.load(Ordering::SeqCst)
    }

    /// 取走目前记录的所有帧（按送显顺序）
    pub fn take_frames(&self) -> Vec<RenderRecord> {
        let mut frames = Vec::with_capacity(self.frames.len());
        while let Some(frame) = self.frames.pop() {
            frames.push(frame);
        }
        frames
    }
}

impl RenderSurface for RecordingSurface {
    fn render(&self, frame: &RenderedFrame<'_>) -> Result<()> {
        self.frames.push(RenderRecord {
            presentation_time_us: frame.presentation_time_us,
            width: frame.width,
            height: frame.height,
            size: frame.data.len(),
        });
        self.rendered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 内存后端
pub struct MemoryBackend {
    containers: Mutex<HashMap<PathBuf, Arc<MemoryContainer>>>,
    probe: Arc<MemoryProbe>,
    audio_log: Arc<Mutex<AudioLog>>,
    min_buffer_size: Option<usize>,
    failing_mime_prefixes: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            probe: Arc::new(MemoryProbe::default()),
            audio_log: Arc::new(Mutex::new(AudioLog::default())),
            min_buffer_size: None,
            failing_mime_prefixes: Mutex::new(Vec::new()),
        }
    }

    /// 设备最小缓冲（字节）
    pub fn with_min_buffer_size(mut self, size: usize) -> Self {
        self.min_buffer_size = Some(size);
        self
    }

    /// 在 path 下登记一个容器
    pub fn insert(&self, path: impl Into<PathBuf>, container: MemoryContainer) {
        self.containers.lock().insert(path.into(), Arc::new(container));
    }

    /// 让匹配前缀的轨道创建解码器失败
    pub fn fail_decoder_for(&self, mime_prefix: &str) {
        self.failing_mime_prefixes.lock().push(mime_prefix.to_string());
    }

    pub fn probe(&self) -> ProbeSnapshot {
        self.probe.snapshot()
    }

    pub fn audio_log(&self) -> AudioLog {
        self.audio_log.lock().clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for MemoryBackend {
    fn open_extractor(&self, path: &Path) -> Result<Box<dyn MediaExtractor>> {
        let container = self
            .containers
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| PlayerError::OpenError(path.display().to_string()))?;
        debug!("打开内存容器: {} ({} 条轨道)", path.display(), container.tracks().len());
        Ok(Box::new(MemoryExtractor::new(container, Some(self.probe.clone()))))
    }

    fn create_decoder(&self, format: &TrackFormat, surface: Option<SurfaceHandle>) -> Result<Box<dyn MediaCodec>> {
        let failing = self
            .failing_mime_prefixes
            .lock()
            .iter()
            .any(|prefix| format.mime.starts_with(prefix.as_str()));
        if failing {
            return Err(PlayerError::DecodeError(format!("不支持的解码类型: {}", format.mime)));
        }
        info!("创建直通解码器: {}", format.mime);
        Ok(Box::new(PassthroughCodec::new(format, surface, Some(self.probe.clone()))))
    }

    fn min_audio_buffer_size(&self, _sample_rate: u32, _channels: ChannelConfig) -> Option<usize> {
        self.min_buffer_size
    }

    fn create_audio_sink(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(RecordingAudioSink::new(
            config,
            self.audio_log.clone(),
            Some(self.probe.clone()),
        )))
    }

    fn description(&self) -> String {
        format!("内存后端 ({} 个容器)", self.containers.lock().len())
    }
}
