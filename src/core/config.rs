use crate::core::{PlayerError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 两个解码循环的时间基准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// 每个循环以自己的启动时刻为起点（音视频间的漂移不做校正）
    #[default]
    PerTrack,
    /// 两个循环共用 play() 时刻作为起点
    Shared,
}

/// 播放器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 输入/输出缓冲出队超时（毫秒）
    pub dequeue_timeout_ms: u64,
    /// 暂停时单次等待上限（毫秒）
    pub pause_poll_ms: u64,
    /// 音频设备最小缓冲的放大倍数
    pub audio_buffer_multiplier: usize,
    pub clock_mode: ClockMode,
    /// destroy 时等待每个解码线程退出的上限（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout_ms: 10,
            pause_poll_ms: 1000,
            audio_buffer_multiplier: 4,
            clock_mode: ClockMode::PerTrack,
            join_timeout_ms: 3000,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载，缺省字段使用默认值
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        info!("📄 已加载配置: {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dequeue_timeout_ms == 0 {
            return Err(PlayerError::ConfigError("dequeue_timeout_ms 不能为 0".to_string()));
        }
        if self.pause_poll_ms == 0 {
            return Err(PlayerError::ConfigError("pause_poll_ms 不能为 0".to_string()));
        }
        if self.audio_buffer_multiplier == 0 {
            return Err(PlayerError::ConfigError("audio_buffer_multiplier 不能为 0".to_string()));
        }
        if self.join_timeout_ms == 0 {
            return Err(PlayerError::ConfigError("join_timeout_ms 不能为 0".to_string()));
        }
        Ok(())
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PlayerConfig::from_json(r#"{ "clock_mode": "shared", "pause_poll_ms": 200 }"#).unwrap();
        assert_eq!(config.clock_mode, ClockMode::Shared);
        assert_eq!(config.pause_poll(), Duration::from_millis(200));
        assert_eq!(config.dequeue_timeout_ms, 10);
        assert_eq!(config.audio_buffer_multiplier, 4);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = PlayerConfig::from_json(r#"{ "dequeue_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, PlayerError::ConfigError(_)));
    }

    #[test]
    fn test_bad_json_is_json_error() {
        let err = PlayerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, PlayerError::JsonError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "audio_buffer_multiplier": 2 }}"#).unwrap();
        let config = PlayerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.audio_buffer_multiplier, 2);
        assert_eq!(config.clock_mode, ClockMode::PerTrack);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PlayerConfig::from_file("/nonexistent/player.json").unwrap_err();
        assert!(matches!(err, PlayerError::IoError(_)));
    }
}
