use crate::core::{
    BufferInfo, LoopExit, LoopReport, LoopState, PlaybackEvent, PlayerConfig, PlayerError, Result, SessionClock,
    TrackDescriptor, TrackKind,
};
use crate::player::audio_output::AudioOutputSink;
use crate::player::codec::{DequeueOutput, MediaBackend, MediaCodec, MediaExtractor, SurfaceHandle};
use crate::player::feeder::{feed_one, FeedResult};
use crate::player::state::{CancelToken, SharedPlaybackState};
use crate::player::sync_pacer::{PaceOutcome, SyncPacer};
use crate::player::track_selector::{describe_track, select_track};
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 启动一个解码循环需要的全部上下文（创建线程时注入）
pub struct DecodeLoopContext {
    pub kind: TrackKind,
    pub file_path: PathBuf,
    pub surface: Option<SurfaceHandle>,
    pub backend: Arc<dyn MediaBackend>,
    pub state: Arc<SharedPlaybackState>,
    pub cancel: CancelToken,
    pub config: PlayerConfig,
    /// 共享时钟模式下的统一起点；None 表示循环自己取起点
    pub clock_anchor: Option<Instant>,
    pub events: Option<Sender<PlaybackEvent>>,
}

impl DecodeLoopContext {
    fn emit(&self, event: PlaybackEvent) {
        if let Some(ref events) = self.events {
            let _ = events.send(event);
        }
    }
}

/// 一次解码会话独占的资源
///
/// 资源按创建顺序逐个放入；无论从哪条路径退出，drop 时都会执行一次
/// teardown：解码器 stop + release、解封装器 release、音频输出 stop + release。
struct DecodeSession {
    kind: TrackKind,
    extractor: Option<Box<dyn MediaExtractor>>,
    codec: Option<Box<dyn MediaCodec>>,
    audio: Option<AudioOutputSink>,
}

struct SessionParts<'a> {
    extractor: &'a mut Box<dyn MediaExtractor>,
    codec: &'a mut Box<dyn MediaCodec>,
    audio: Option<&'a mut AudioOutputSink>,
}

impl DecodeSession {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            extractor: None,
            codec: None,
            audio: None,
        }
    }

    /// STARTING：打开文件、选轨、创建并启动解码器、建立输出端
    ///
    /// 找不到对应轨道时返回 Ok(None)，此时不会创建解码器。
    fn open(ctx: &DecodeLoopContext) -> Result<Option<(Self, TrackDescriptor)>> {
        let mut session = Self::new(ctx.kind);
        let extractor = session.extractor.insert(ctx.backend.open_extractor(&ctx.file_path)?);

        let index = match select_track(&**extractor, ctx.kind.mime_prefix())? {
            Some(index) => index,
            None => return Ok(None),
        };
        let format = extractor.track_format(index)?;
        let track = describe_track(index, ctx.kind, &format)?;
        extractor.select_track(index)?;

        let surface = match ctx.kind {
            TrackKind::Video => Some(
                ctx.surface
                    .clone()
                    .ok_or_else(|| PlayerError::RenderError("视频解码需要渲染表面".to_string()))?,
            ),
            TrackKind::Audio => None,
        };
        let codec = session.codec.insert(ctx.backend.create_decoder(&format, surface)?);
        codec.start()?;

        if let Some(ref video) = track.video {
            info!(
                "{} 🎬 视频轨道 #{}: {} {}x{}, 时长 {}s",
                log_ctx(),
                index,
                track.mime,
                video.width,
                video.height,
                video.duration_us / 1_000_000
            );
        }
        if let Some(ref audio) = track.audio {
            info!(
                "{} 🔊 音频轨道 #{}: {} {} Hz, {} 声道",
                log_ctx(),
                index,
                track.mime,
                audio.sample_rate,
                audio.channel_count
            );
            let capacity = codec.output_buffer_capacity();
            session.audio = Some(AudioOutputSink::open(
                &*ctx.backend,
                audio,
                ctx.config.audio_buffer_multiplier,
                capacity,
            )?);
        }

        Ok(Some((session, track)))
    }

    fn parts(&mut self) -> Result<SessionParts<'_>> {
        let missing = || PlayerError::Other("解码会话未完整创建".to_string());
        Ok(SessionParts {
            extractor: self.extractor.as_mut().ok_or_else(missing)?,
            codec: self.codec.as_mut().ok_or_else(missing)?,
            audio: self.audio.as_mut(),
        })
    }

    fn teardown(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            if let Err(e) = codec.stop() {
                warn!("{} ⚠️  停止{}解码器失败: {}", log_ctx(), self.kind, e);
            }
            if let Err(e) = codec.release() {
                warn!("{} ⚠️  释放{}解码器失败: {}", log_ctx(), self.kind, e);
            }
        }
        if let Some(mut extractor) = self.extractor.take() {
            if let Err(e) = extractor.release() {
                warn!("{} ⚠️  释放{}解封装器失败: {}", log_ctx(), self.kind, e);
            }
        }
        if let Some(mut audio) = self.audio.take() {
            audio.close();
        }
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// 解码循环主体（在独立线程中运行）
///
/// 状态机：STARTING → RUNNING → DRAINING → STOPPED
/// - 每轮：检查 stop/cancel → 暂停等待 → 喂一个样本 → 取一个输出
/// - 取到输出：节拍器等到播放时刻 → 写声卡 / 送显 → 归还缓冲
/// - 输出带 EOS 标志：进入 DRAINING，释放资源后 STOPPED
pub fn run_decode_loop(ctx: &DecodeLoopContext) -> Result<LoopReport> {
    let kind = ctx.kind;
    let mut report = LoopReport::new(kind);
    info!("{} ▶ {}解码循环 STARTING: {}", log_ctx(), kind, ctx.file_path.display());

    let (mut session, _track) = match DecodeSession::open(ctx)? {
        Some(opened) => opened,
        None => {
            warn!("{} ⚠️  文件中没有{}轨道，{}解码循环退出", log_ctx(), kind, kind);
            return Err(PlayerError::TrackNotFound(kind));
        }
    };

    let mut clock = match ctx.clock_anchor {
        Some(anchor) => SessionClock::anchored_at(anchor),
        None => SessionClock::start_now(),
    };
    let pacer = SyncPacer::new(ctx.config.pause_poll());
    let timeout = ctx.config.dequeue_timeout();
    let render = kind == TrackKind::Video;
    let mut info = BufferInfo::default();
    let mut input_eos = false;

    report.final_state = LoopState::Running;
    info!("{} ▶ {}解码循环 RUNNING", log_ctx(), kind);
    ctx.emit(PlaybackEvent::LoopStarted(kind));

    let exit = {
        let parts = session.parts()?;
        let SessionParts { extractor, codec, mut audio } = parts;

        loop {
            if ctx.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }
            if !ctx.state.is_playing() {
                break LoopExit::Stopped;
            }
            if ctx.state.is_paused() {
                let waited = ctx.state.wait_while_paused(&ctx.cancel, ctx.config.pause_poll());
                clock.compensate_pause(waited);
                continue;
            }

            // 输入已经送完 EOS 后只继续取输出
            if !input_eos {
                match feed_one(&mut **extractor, &mut **codec, timeout)? {
                    FeedResult::EndOfStream => input_eos = true,
                    FeedResult::Queued { .. } => report.samples_queued += 1,
                    FeedResult::NoInputBuffer => {}
                }
            }

            match codec.dequeue_output_buffer(&mut info, timeout)? {
                DequeueOutput::FormatChanged => debug!("{} {} INFO_OUTPUT_FORMAT_CHANGED", log_ctx(), kind),
                DequeueOutput::TryAgainLater => debug!("{} {} INFO_TRY_AGAIN_LATER", log_ctx(), kind),
                DequeueOutput::BuffersChanged => debug!("{} {} INFO_OUTPUT_BUFFERS_CHANGED", log_ctx(), kind),
                DequeueOutput::Buffer(index) => {
                    if pacer.wait(&info, &mut clock, &ctx.state, &ctx.cancel) == PaceOutcome::Interrupted {
                        // 停止/取消：缓冲直接归还，不送显
                        codec.release_output_buffer(index, false)?;
                        continue;
                    }

                    if let Some(audio) = audio.as_deref_mut() {
                        if info.size > 0 {
                            let data = codec.output_buffer(index)?;
                            let data = data.get(info.offset..info.offset + info.size).unwrap_or(data);
                            report.bytes_written += audio.write_buffer(data)? as u64;
                        }
                    }
                    codec.release_output_buffer(index, render)?;
                    report.buffers_released += 1;
                    if render && info.size > 0 {
                        report.frames_rendered += 1;
                    }
                    if info.size > 0 {
                        report.last_pts_us = Some(info.presentation_time_us);
                    }

                    if info.is_end_of_stream() {
                        debug!("{} {} buffer stream end", log_ctx(), kind);
                        break LoopExit::EndOfStream;
                    }
                }
            }
        }
    };

    report.exit = exit;
    if exit == LoopExit::EndOfStream {
        report.final_state = LoopState::Draining;
        info!("{} ⏬ {}解码循环 DRAINING", log_ctx(), kind);
    }

    session.teardown();
    report.final_state = LoopState::Stopped;
    info!(
        "{} ⏹ {}解码循环 STOPPED（{:?}，入队 {} 个样本，释放 {} 个缓冲）",
        log_ctx(),
        kind,
        exit,
        report.samples_queued,
        report.buffers_released
    );
    Ok(report)
}

/// 在新线程中运行解码循环，结束时把结果上报到事件通道
pub fn spawn_decode_loop(ctx: DecodeLoopContext) -> Result<JoinHandle<Result<LoopReport>>> {
    let name = match ctx.kind {
        TrackKind::Audio => "audio-decode",
        TrackKind::Video => "video-decode",
    };
    let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
        let result = run_decode_loop(&ctx);
        match &result {
            Ok(report) => ctx.emit(PlaybackEvent::LoopFinished(report.clone())),
            Err(PlayerError::TrackNotFound(kind)) => ctx.emit(PlaybackEvent::TrackMissing(*kind)),
            Err(e) => {
                error!("{} ❌ {}解码循环失败: {}", log_ctx(), ctx.kind, e);
                ctx.emit(PlaybackEvent::LoopFailed {
                    kind: ctx.kind,
                    error: e.to_string(),
                });
            }
        }
        result
    })?;
    Ok(handle)
}
