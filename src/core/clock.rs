use std::time::{Duration, Instant};

/// 会话时钟 - 每个解码循环用它把 PTS 换算成墙上时间
///
/// 起点在会话开始时确定；暂停期间花掉的时间会被扣除，
/// 恢复后不会因为落后而连续放出一批缓冲。
#[derive(Debug, Clone)]
pub struct SessionClock {
    base_instant: Instant,      // 基准时刻
    paused_total: Duration,     // 累计暂停时长
}

impl SessionClock {
    /// 以当前时刻为起点
    pub fn start_now() -> Self {
        Self::anchored_at(Instant::now())
    }

    /// 以指定时刻为起点（共享时钟模式下两个循环用同一个起点）
    pub fn anchored_at(base_instant: Instant) -> Self {
        Self {
            base_instant,
            paused_total: Duration::ZERO,
        }
    }

    /// 已播放时长（不含暂停）
    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.base_instant)
            .saturating_sub(self.paused_total)
    }

    /// 已播放时长（毫秒）
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().as_millis() as i64
    }

    /// 某个 PTS（微秒）对应的墙上时刻
    pub fn deadline_for(&self, presentation_time_us: i64) -> Instant {
        let offset = Duration::from_micros(presentation_time_us.max(0) as u64);
        self.base_instant + self.paused_total + offset
    }

    /// 扣除一段暂停时长
    pub fn compensate_pause(&mut self, paused_for: Duration) {
        self.paused_total += paused_for;
    }

    pub fn paused_total(&self) -> Duration {
        self.paused_total
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_excludes_pause() {
        let base = Instant::now();
        let mut clock = SessionClock::anchored_at(base);
        let now = base + Duration::from_millis(500);
        assert_eq!(clock.elapsed_at(now), Duration::from_millis(500));

        clock.compensate_pause(Duration::from_millis(200));
        assert_eq!(clock.elapsed_at(now), Duration::from_millis(300));
        assert_eq!(clock.paused_total(), Duration::from_millis(200));
    }

    #[test]
    fn test_deadline_shifts_with_pause() {
        let base = Instant::now();
        let mut clock = SessionClock::anchored_at(base);
        assert_eq!(clock.deadline_for(40_000), base + Duration::from_millis(40));

        clock.compensate_pause(Duration::from_millis(1000));
        assert_eq!(clock.deadline_for(40_000), base + Duration::from_millis(1040));
        // 负 PTS 按 0 处理
        assert_eq!(clock.deadline_for(-5), base + Duration::from_millis(1000));
    }

    #[test]
    fn test_elapsed_before_anchor_is_zero() {
        let base = Instant::now() + Duration::from_secs(10);
        let clock = SessionClock::anchored_at(base);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
