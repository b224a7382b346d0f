use crate::core::{BufferInfo, SessionClock};
use crate::player::state::{CancelToken, SharedPlaybackState};
use std::time::{Duration, Instant};

/// 节拍结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceOutcome {
    /// 到点了（或本来就晚了），可以释放/渲染
    Ready,
    /// 等待期间被 stop/cancel 打断
    Interrupted,
}

/// 音视频同步节拍器
///
/// 缓冲的 PTS 换算成相对会话起点的偏移，没到点之前不释放。
/// 落后的循环不丢帧，直接放行，自然追上。
#[derive(Debug, Clone)]
pub struct SyncPacer {
    pause_poll: Duration,
}

impl SyncPacer {
    pub fn new(pause_poll: Duration) -> Self {
        Self { pause_poll }
    }

    /// 目标偏移（毫秒）
    pub fn target_offset_ms(info: &BufferInfo) -> i64 {
        info.presentation_time_us / 1000
    }

    /// 距离到点还要等多久；已经到点返回 None
    pub fn delay_for(info: &BufferInfo, clock: &SessionClock, now: Instant) -> Option<Duration> {
        let target = Self::target_offset_ms(info);
        let elapsed = clock.elapsed_at(now).as_millis() as i64;
        if target > elapsed {
            Some(clock.deadline_for(info.presentation_time_us).saturating_duration_since(now))
        } else {
            None
        }
    }

    /// 等到这个缓冲的播放时刻
    ///
    /// 等待期间遇到暂停，会等到恢复并把暂停时长从时钟里扣掉。
    pub fn wait(
        &self,
        info: &BufferInfo,
        clock: &mut SessionClock,
        state: &SharedPlaybackState,
        cancel: &CancelToken,
    ) -> PaceOutcome {
        loop {
            if cancel.is_cancelled() || !state.is_playing() {
                return PaceOutcome::Interrupted;
            }
            if state.is_paused() {
                let waited = state.wait_while_paused(cancel, self.pause_poll);
                clock.compensate_pause(waited);
                continue;
            }
            let now = Instant::now();
            match Self::delay_for(info, clock, now) {
                None => return PaceOutcome::Ready,
                Some(delay) => {
                    // 毫秒取整后仍可能差不到 1ms，睡到真实 deadline 再复查
                    state.sleep_until(now + delay.max(Duration::from_millis(1)), cancel);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BufferFlags;
    use std::sync::Arc;
    use std::thread;

    fn info_at(pts_us: i64) -> BufferInfo {
        let mut info = BufferInfo::default();
        info.set(0, 16, pts_us, BufferFlags::NONE);
        info
    }

    #[test]
    fn test_target_offset_is_milliseconds() {
        assert_eq!(SyncPacer::target_offset_ms(&info_at(1_500_000)), 1500);
        assert_eq!(SyncPacer::target_offset_ms(&info_at(999)), 0);
    }

    #[test]
    fn test_late_buffer_needs_no_delay() {
        let base = Instant::now();
        let clock = SessionClock::anchored_at(base);
        let now = base + Duration::from_millis(100);
        assert_eq!(SyncPacer::delay_for(&info_at(50_000), &clock, now), None);
        assert_eq!(SyncPacer::delay_for(&info_at(100_000), &clock, now), None);
        assert_eq!(
            SyncPacer::delay_for(&info_at(140_000), &clock, now),
            Some(Duration::from_millis(40))
        );
    }

    #[test]
    fn test_wait_blocks_until_presentation_time() {
        let state = SharedPlaybackState::new();
        state.set_playing(true);
        let mut clock = SessionClock::start_now();
        let pacer = SyncPacer::new(Duration::from_millis(1000));

        let outcome = pacer.wait(&info_at(60_000), &mut clock, &state, &CancelToken::new());
        assert_eq!(outcome, PaceOutcome::Ready);
        assert!(clock.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let state = Arc::new(SharedPlaybackState::new());
        state.set_playing(true);
        let stopper = state.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.set_playing(false);
        });

        let mut clock = SessionClock::start_now();
        let pacer = SyncPacer::new(Duration::from_millis(1000));
        let start = Instant::now();
        let outcome = pacer.wait(&info_at(10_000_000), &mut clock, &state, &CancelToken::new());
        assert_eq!(outcome, PaceOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_pause_during_wait_shifts_clock() {
        let state = Arc::new(SharedPlaybackState::new());
        state.set_playing(true);
        let controller = state.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            controller.set_paused(true);
            thread::sleep(Duration::from_millis(150));
            controller.set_paused(false);
        });

        let mut clock = SessionClock::start_now();
        let pacer = SyncPacer::new(Duration::from_millis(1000));
        let start = Instant::now();
        let outcome = pacer.wait(&info_at(80_000), &mut clock, &state, &CancelToken::new());
        assert_eq!(outcome, PaceOutcome::Ready);
        // 暂停的 150ms 不算播放时间
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(clock.paused_total() >= Duration::from_millis(100));
    }
}
