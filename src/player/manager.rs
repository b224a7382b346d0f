use crate::core::{
    ClockMode, LoopReport, MediaSource, PlaybackEvent, PlaybackStatus, PlayerConfig, PlayerError, Result, TrackKind,
};
use crate::player::codec::{MediaBackend, SurfaceHandle};
use crate::player::decode_loop::{log_ctx, spawn_decode_loop, DecodeLoopContext};
use crate::player::state::{CancelToken, SharedPlaybackState};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 控制器持有的解码循环句柄：取消令牌 + 线程句柄
struct LoopHandle {
    kind: TrackKind,
    cancel: CancelToken,
    thread: JoinHandle<Result<LoopReport>>,
}

impl LoopHandle {
    fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

struct ControllerInner {
    source: Option<MediaSource>,
    loops: Vec<LoopHandle>,
}

/// 播放控制器 - 对外暴露 init/play/pause/resume/stop/destroy
///
/// 所有控制操作可以在任意线程调用，内部用一把锁串行化。
/// 解码循环只通过注入的 [`SharedPlaybackState`] 和各自的 [`CancelToken`] 感知控制。
pub struct PlaybackController {
    backend: Arc<dyn MediaBackend>,
    config: PlayerConfig,
    state: Arc<SharedPlaybackState>,
    inner: Mutex<ControllerInner>,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(backend: Arc<dyn MediaBackend>, config: PlayerConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        info!("{} 🎬 创建播放控制器: {}", log_ctx(), backend.description());
        Self {
            backend,
            config,
            state: Arc::new(SharedPlaybackState::new()),
            inner: Mutex::new(ControllerInner {
                source: None,
                loops: Vec::new(),
            }),
            events_tx,
            events_rx,
        }
    }

    /// 设置播放源，重置播放/暂停标志，不启动解码
    pub fn init_session(&self, surface: Option<SurfaceHandle>, file_path: impl Into<PathBuf>) {
        let mut inner = self.inner.lock();
        let source = MediaSource::new(surface, file_path);
        info!("{} 📁 初始化播放源: {:?}", log_ctx(), source);
        inner.source = Some(source);
        self.state.reset();
    }

    /// 开始播放
    ///
    /// 已在播放时什么也不做。上一轮的循环如果还没退出，先等它们结束再启动新循环。
    /// 没有渲染表面时只启动音频循环。
    pub fn play(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        if self.state.is_playing() {
            if inner.loops.iter().any(|l| !l.is_finished()) {
                debug!("{} 已在播放，忽略 play()", log_ctx());
                return Ok(());
            }
            // 两个循环都已自然结束（EOS），允许重新播放
            info!("{} 🔁 上一轮播放已结束，重新开始", log_ctx());
            self.state.set_playing(false);
        }

        let source = match inner.source.clone() {
            Some(source) => source,
            None => {
                warn!("{} ⚠️  播放源未设置，无法播放", log_ctx());
                return Err(PlayerError::NotInitialized);
            }
        };

        // 旧循环已收到 stop，这里等它们释放完资源
        let stale = std::mem::take(&mut inner.loops);
        for handle in stale {
            handle.cancel.cancel();
            self.state.notify_all();
            Self::join_loop(handle, self.config.join_timeout());
        }

        let clock_anchor = match self.config.clock_mode {
            ClockMode::Shared => Some(Instant::now()),
            ClockMode::PerTrack => None,
        };

        // 先置 playing，再启动线程，避免循环一开始就看到 playing=false
        self.state.set_playing(true);

        let mut kinds = Vec::with_capacity(2);
        if source.has_surface() {
            kinds.push(TrackKind::Video);
        } else {
            info!("{} 没有渲染表面，只播放音频", log_ctx());
        }
        kinds.push(TrackKind::Audio);

        for kind in kinds {
            let cancel = CancelToken::new();
            let ctx = DecodeLoopContext {
                kind,
                file_path: source.file_path.clone(),
                surface: source.surface.clone(),
                backend: self.backend.clone(),
                state: self.state.clone(),
                cancel: cancel.clone(),
                config: self.config.clone(),
                clock_anchor,
                events: Some(self.events_tx.clone()),
            };
            match spawn_decode_loop(ctx) {
                Ok(thread) => inner.loops.push(LoopHandle { kind, cancel, thread }),
                Err(e) => {
                    // 已启动的循环随 stop 退出
                    self.state.set_playing(false);
                    return Err(e);
                }
            }
        }

        info!("{} ▶ 开始播放（{} 个解码循环）", log_ctx(), inner.loops.len());
        Ok(())
    }

    /// 暂停：两个循环在下一次检查时进入等待
    pub fn pause(&self) {
        let _inner = self.inner.lock();
        info!("{} ⏸ 暂停", log_ctx());
        self.state.set_paused(true);
    }

    /// 恢复：唤醒等待中的循环
    pub fn resume(&self) {
        let _inner = self.inner.lock();
        info!("{} ▶ 恢复", log_ctx());
        self.state.set_paused(false);
    }

    /// 停止：清除 playing 标志，循环自行退出并释放资源（不等待）
    pub fn stop(&self) {
        let _inner = self.inner.lock();
        self.stop_locked();
    }

    fn stop_locked(&self) {
        info!("{} ⏹️  停止播放", log_ctx());
        self.state.set_playing(false);
    }

    /// 销毁会话：停止、清空播放源、取消并等待两个循环退出
    ///
    /// 返回各循环的结果；超时未退出的循环不在结果里。
    pub fn destroy_session(&self) -> Vec<Result<LoopReport>> {
        let mut inner = self.inner.lock();
        self.stop_locked();
        inner.source = None;

        let handles = std::mem::take(&mut inner.loops);
        for handle in &handles {
            handle.cancel.cancel();
        }
        self.state.notify_all();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(result) = Self::join_loop(handle, self.config.join_timeout()) {
                results.push(result);
            }
        }
        info!("{} 🗑️  会话已销毁（{} 个循环确认退出）", log_ctx(), results.len());
        results
    }

    /// 等待循环线程退出，最多 timeout
    fn join_loop(handle: LoopHandle, timeout: Duration) -> Option<Result<LoopReport>> {
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("{} ⚠️  {}解码线程 {:?} 内未退出，放弃等待", log_ctx(), handle.kind, timeout);
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let kind = handle.kind;
        match handle.thread.join() {
            Ok(result) => {
                debug!("{} ✅ {}解码线程已结束", log_ctx(), kind);
                Some(result)
            }
            Err(_) => Some(Err(PlayerError::ThreadPanicked(kind))),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    /// 状态快照
    pub fn status(&self) -> PlaybackStatus {
        let inner = self.inner.lock();
        PlaybackStatus {
            playing: self.state.is_playing(),
            paused: self.state.is_paused(),
            live_loops: inner.loops.iter().filter(|l| !l.is_finished()).count(),
        }
    }

    /// 解码循环上报的事件
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let live = self.inner.get_mut().loops.len();
        if live > 0 {
            warn!("{} ⚠ PlaybackController 被 drop，但未调用 destroy_session()，正在停止 {} 个循环", log_ctx(), live);
            self.destroy_session();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LoopExit, LoopState};
    use crate::player::memory::{MemoryBackend, MemoryContainer, MemoryTrack, RecordingSurface};

    const PATH: &str = "/media/movie.mp4";

    fn controller_with(container: MemoryContainer, config: PlayerConfig) -> (PlaybackController, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new().with_min_buffer_size(1024));
        backend.insert(PATH, container);
        (PlaybackController::new(backend.clone(), config), backend)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_play_without_source_is_error() {
        let backend = Arc::new(MemoryBackend::new());
        let controller = PlaybackController::new(backend.clone(), PlayerConfig::default());
        assert!(matches!(controller.play(), Err(PlayerError::NotInitialized)));
        assert!(!controller.is_playing());
        assert_eq!(backend.probe().extractors_opened, 0);
    }

    #[test]
    fn test_play_twice_spawns_one_pair() {
        let (controller, backend) = controller_with(MemoryContainer::synthetic_av(Duration::from_secs(5)), PlayerConfig::default());
        let surface = Arc::new(RecordingSurface::new());
        controller.init_session(Some(surface), PATH);

        controller.play().unwrap();
        controller.play().unwrap();
        assert!(wait_until(Duration::from_secs(2), || backend.probe().decoders_created == 2));
        controller.play().unwrap();
        thread::sleep(Duration::from_millis(50));

        let probe = backend.probe();
        assert_eq!(probe.decoders_created, 2);
        assert_eq!(probe.peak_active_decoders, 2);
        assert_eq!(controller.status().live_loops, 2);

        let results = controller.destroy_session();
        assert_eq!(results.len(), 2);
        assert_eq!(backend.probe().active_decoders, 0);
    }

    #[test]
    fn test_pause_blocks_output_until_resume() {
        let (controller, _backend) = controller_with(MemoryContainer::synthetic_av(Duration::from_secs(5)), PlayerConfig::default());
        let surface = Arc::new(RecordingSurface::new());
        controller.init_session(Some(surface.clone()), PATH);
        controller.play().unwrap();

        assert!(wait_until(Duration::from_secs(2), || surface.rendered() >= 3));
        controller.pause();
        assert!(controller.is_paused());
        // 正在节拍等待的那一帧最多再放出一帧
        thread::sleep(Duration::from_millis(100));
        let paused_at = surface.rendered();
        thread::sleep(Duration::from_millis(400));
        assert_eq!(surface.rendered(), paused_at);

        controller.resume();
        assert!(wait_until(Duration::from_secs(2), || surface.rendered() > paused_at));

        // 恢复后没有连续补帧，PTS 仍然单调
        let frames = surface.take_frames();
        assert!(frames.windows(2).all(|w| w[0].presentation_time_us <= w[1].presentation_time_us));
        controller.destroy_session();
    }

    #[test]
    fn test_stop_then_destroy_then_replay() {
        let (controller, backend) = controller_with(MemoryContainer::synthetic_av(Duration::from_secs(5)), PlayerConfig::default());
        controller.init_session(Some(Arc::new(RecordingSurface::new())), PATH);
        controller.play().unwrap();
        assert!(wait_until(Duration::from_secs(2), || backend.probe().decoders_created == 2));

        controller.stop();
        assert!(!controller.is_playing());
        assert!(wait_until(Duration::from_secs(2), || controller.status().live_loops == 0));

        let results = controller.destroy_session();
        assert_eq!(results.len(), 2);
        for result in results {
            let report = result.unwrap();
            assert_eq!(report.exit, LoopExit::Stopped);
            assert_eq!(report.final_state, LoopState::Stopped);
        }
        let probe = backend.probe();
        assert_eq!(probe.decoders_released, 2);
        assert_eq!(probe.extractors_released, 2);
        assert_eq!(probe.sinks_released, 1);

        // 源已清空
        assert!(matches!(controller.play(), Err(PlayerError::NotInitialized)));

        // 新的源，新的会话
        let other = "/media/other.mp4";
        backend.insert(other, MemoryContainer::synthetic_av(Duration::from_millis(320)));
        let surface = Arc::new(RecordingSurface::new());
        controller.init_session(Some(surface.clone()), other);
        controller.play().unwrap();
        assert!(wait_until(Duration::from_secs(3), || controller.status().live_loops == 0));
        assert_eq!(surface.take_frames().len(), 8);
        let probe = backend.probe();
        assert_eq!(probe.decoders_created, 4);
        assert_eq!(probe.decoders_released, 4);
        controller.destroy_session();
    }

    #[test]
    fn test_destroy_joins_loops() {
        let (controller, backend) = controller_with(MemoryContainer::synthetic_av(Duration::from_secs(30)), PlayerConfig::default());
        controller.init_session(Some(Arc::new(RecordingSurface::new())), PATH);
        controller.play().unwrap();
        assert!(wait_until(Duration::from_secs(2), || backend.probe().decoders_created == 2));

        let results = controller.destroy_session();
        // 返回时两个循环都已释放完资源
        assert_eq!(results.len(), 2);
        assert_eq!(backend.probe().active_decoders, 0);
        assert_eq!(backend.probe().sinks_released, 1);
    }

    #[test]
    fn test_audio_only_without_surface() {
        let (controller, backend) = controller_with(MemoryContainer::synthetic_av(Duration::from_millis(200)), PlayerConfig::default());
        controller.init_session(None, PATH);
        controller.play().unwrap();

        assert!(wait_until(Duration::from_secs(3), || controller.status().live_loops == 0));
        let results = controller.destroy_session();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().kind, TrackKind::Audio);
        assert_eq!(backend.probe().decoders_created, 1);
    }

    #[test]
    fn test_missing_track_reported_other_loop_continues() {
        let mut container = MemoryContainer::new();
        container.add_track(MemoryTrack::raw_video(320, 240, 25, Duration::from_millis(200)));
        let (controller, _backend) = controller_with(container, PlayerConfig::default());
        let events = controller.events();
        let surface = Arc::new(RecordingSurface::new());
        controller.init_session(Some(surface.clone()), PATH);
        controller.play().unwrap();

        assert!(wait_until(Duration::from_secs(3), || controller.status().live_loops == 0));
        let events: Vec<PlaybackEvent> = events.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, PlaybackEvent::TrackMissing(TrackKind::Audio))));
        assert!(events.iter().any(|e| matches!(e, PlaybackEvent::LoopFinished(r) if r.kind == TrackKind::Video)));
        assert_eq!(surface.take_frames().len(), 5);

        let results = controller.destroy_session();
        assert!(results.iter().any(|r| matches!(r, Err(PlayerError::TrackNotFound(TrackKind::Audio)))));
    }

    #[test]
    fn test_replay_after_natural_end() {
        let (controller, backend) = controller_with(MemoryContainer::synthetic_av(Duration::from_millis(200)), PlayerConfig::default());
        controller.init_session(Some(Arc::new(RecordingSurface::new())), PATH);
        controller.play().unwrap();
        assert!(wait_until(Duration::from_secs(3), || controller.status().live_loops == 0));
        assert!(controller.is_playing());

        controller.play().unwrap();
        assert!(wait_until(Duration::from_secs(3), || backend.probe().decoders_created == 4));
        controller.destroy_session();
    }

    #[test]
    fn test_end_to_end_two_seconds() {
        let duration = Duration::from_secs(2);
        let config = PlayerConfig {
            clock_mode: ClockMode::Shared,
            ..PlayerConfig::default()
        };
        let (controller, backend) = controller_with(MemoryContainer::synthetic_av(duration), config);
        let surface = Arc::new(RecordingSurface::new());
        controller.init_session(Some(surface.clone()), PATH);

        let start = Instant::now();
        controller.play().unwrap();
        assert!(wait_until(Duration::from_secs(6), || controller.status().live_loops == 0));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1900));

        // 音频：按顺序收到全部解码字节
        let expected = MemoryContainer::synthetic_av(duration).tracks()[0].concatenated();
        let log = backend.audio_log();
        assert_eq!(log.total_bytes(), expected.len());
        assert_eq!(log.data, expected);
        assert_eq!(log.write_sizes.iter().sum::<usize>(), expected.len());

        // 视频：约 2 秒的帧，PTS 不递减
        let frames = surface.take_frames();
        assert_eq!(frames.len(), 50);
        assert!(frames.windows(2).all(|w| w[0].presentation_time_us <= w[1].presentation_time_us));
        assert_eq!(frames.last().map(|f| f.presentation_time_us), Some(1_960_000));
        assert!(frames.iter().all(|f| f.width == 320 && f.height == 240));

        let results = controller.destroy_session();
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result.unwrap().exit, LoopExit::EndOfStream);
        }
        let probe = backend.probe();
        assert_eq!(probe.decoders_released, 2);
        assert_eq!(probe.extractors_released, 2);
        assert_eq!(probe.sinks_released, 1);
    }
}
