use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 两个解码循环共享的播放状态
///
/// - playing / paused 用原子量，循环侧只做点读
/// - 状态切换由控制器串行执行，切换后唤醒所有在 condvar 上等待的循环
pub struct SharedPlaybackState {
    playing: AtomicBool,
    paused: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
        self.notify_all();
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.notify_all();
    }

    /// 重置为初始状态（未播放、未暂停）
    pub fn reset(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.notify_all();
    }

    /// 唤醒所有等待中的循环
    pub fn notify_all(&self) {
        // 先拿锁再通知，避免等待方检查完条件、还没睡下时丢失唤醒
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// 暂停期间等待一次（最多 max），被 resume/stop/cancel 唤醒后返回
    ///
    /// 返回实际等待的时长，调用方用它补偿会话时钟。
    pub fn wait_while_paused(&self, cancel: &CancelToken, max: Duration) -> Duration {
        let start = Instant::now();
        let deadline = start + max;
        let mut guard = self.wake_lock.lock();
        while self.is_paused() && self.is_playing() && !cancel.is_cancelled() {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        start.elapsed()
    }

    /// 睡到 deadline；期间状态变化（stop/pause/cancel）会提前返回
    ///
    /// 返回 true 表示睡满了。
    pub fn sleep_until(&self, deadline: Instant, cancel: &CancelToken) -> bool {
        let mut guard = self.wake_lock.lock();
        loop {
            if !self.is_playing() || self.is_paused() || cancel.is_cancelled() {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                return true;
            }
        }
    }
}

impl Default for SharedPlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个解码循环的取消令牌，控制器持有一份，循环持有一份
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_resume_wakes_paused_waiter() {
        let state = Arc::new(SharedPlaybackState::new());
        state.set_playing(true);
        state.set_paused(true);

        let waiter_state = state.clone();
        let handle = thread::spawn(move || {
            waiter_state.wait_while_paused(&CancelToken::new(), Duration::from_secs(5))
        });

        thread::sleep(Duration::from_millis(50));
        state.set_paused(false);
        let waited = handle.join().unwrap();
        assert!(waited >= Duration::from_millis(40));
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn test_pause_wait_is_bounded() {
        let state = SharedPlaybackState::new();
        state.set_playing(true);
        state.set_paused(true);
        let waited = state.wait_while_paused(&CancelToken::new(), Duration::from_millis(30));
        assert!(waited >= Duration::from_millis(30));
    }

    #[test]
    fn test_not_paused_returns_immediately() {
        let state = SharedPlaybackState::new();
        state.set_playing(true);
        let waited = state.wait_while_paused(&CancelToken::new(), Duration::from_secs(5));
        assert!(waited < Duration::from_millis(100));
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let state = Arc::new(SharedPlaybackState::new());
        state.set_playing(true);

        let sleeper_state = state.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let slept_full = sleeper_state.sleep_until(start + Duration::from_secs(5), &CancelToken::new());
            (slept_full, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        state.set_playing(false);
        let (slept_full, elapsed) = handle.join().unwrap();
        assert!(!slept_full);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_sleep_until_reaches_deadline() {
        let state = SharedPlaybackState::new();
        state.set_playing(true);
        let start = Instant::now();
        assert!(state.sleep_until(start + Duration::from_millis(20), &CancelToken::new()));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancelled_token_skips_sleep() {
        let state = SharedPlaybackState::new();
        state.set_playing(true);
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(!state.sleep_until(Instant::now() + Duration::from_secs(5), &token));
    }
}
