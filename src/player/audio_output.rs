use crate::core::{AudioTrackInfo, PlayerError, Result};
use crate::player::codec::{AudioSink, MediaBackend};
use log::{debug, info, warn};

/// 输出声道配置（最多支持立体声）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelConfig {
    Mono,
    Stereo,
}

impl ChannelConfig {
    pub fn from_channel_count(channel_count: u16) -> Self {
        if channel_count == 1 {
            ChannelConfig::Mono
        } else {
            ChannelConfig::Stereo
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            ChannelConfig::Mono => 1,
            ChannelConfig::Stereo => 2,
        }
    }
}

/// 16 位 PCM 每个采样帧的字节数
pub fn frame_size_bytes(channel_count: u16) -> usize {
    channel_count as usize * 2
}

/// 音频输出参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSinkConfig {
    pub sample_rate: u32,
    pub channel_config: ChannelConfig,
    pub channel_count: u16,
    /// 设备缓冲大小（字节，整数个采样帧）
    pub buffer_size_bytes: usize,
}

impl AudioSinkConfig {
    /// 按轨道参数计算设备配置
    ///
    /// 缓冲大小：设备最小缓冲 × multiplier；查不到时退回 max_input_size；
    /// 最后向下取整到整数个采样帧。
    pub fn from_track(track: &AudioTrackInfo, min_buffer_size: Option<usize>, multiplier: usize) -> Result<Self> {
        let channel_config = ChannelConfig::from_channel_count(track.channel_count);
        let frame_size = frame_size_bytes(track.channel_count);

        let raw_size = match min_buffer_size {
            Some(min) if min > 0 => min * multiplier,
            _ => {
                debug!("设备最小缓冲不可用，使用 max_input_size: {}", track.max_input_size);
                track.max_input_size
            }
        };
        if raw_size == 0 {
            return Err(PlayerError::AudioError("无法确定音频缓冲大小".to_string()));
        }

        let buffer_size_bytes = ((raw_size / frame_size) * frame_size).max(frame_size);

        Ok(Self {
            sample_rate: track.sample_rate,
            channel_config,
            channel_count: track.channel_count,
            buffer_size_bytes,
        })
    }
}

/// 音频输出端：解码后的 PCM 先拷到暂存区，再阻塞写入设备
pub struct AudioOutputSink {
    sink: Box<dyn AudioSink>,
    config: AudioSinkConfig,
    staging: Vec<u8>,
    bytes_written: u64,
    released: bool,
}

impl AudioOutputSink {
    /// 创建设备并立即开始播放（解码循环消费输出之前）
    pub fn open(
        backend: &dyn MediaBackend,
        track: &AudioTrackInfo,
        multiplier: usize,
        output_capacity: Option<usize>,
    ) -> Result<Self> {
        let channel_config = ChannelConfig::from_channel_count(track.channel_count);
        let min_buffer_size = backend.min_audio_buffer_size(track.sample_rate, channel_config);
        let config = AudioSinkConfig::from_track(track, min_buffer_size, multiplier)?;
        info!(
            "🔊 初始化音频输出: {} Hz, {:?}, 缓冲 {} 字节",
            config.sample_rate, config.channel_config, config.buffer_size_bytes
        );

        let sink = backend.create_audio_sink(&config)?;

        // 暂存区优先按解码器输出缓冲容量分配
        let staging_size = match output_capacity {
            Some(capacity) if capacity > 0 => capacity,
            _ => config.buffer_size_bytes,
        };

        // 先包装再 play，play 失败时由 Drop 释放设备
        let mut output = Self {
            sink,
            config,
            staging: vec![0u8; staging_size],
            bytes_written: 0,
            released: false,
        };
        output.sink.play()?;
        Ok(output)
    }

    /// 写入一个解码输出缓冲
    pub fn write_buffer(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.staging.len() < data.len() {
            debug!("音频暂存区扩容: {} -> {}", self.staging.len(), data.len());
            self.staging.resize(data.len(), 0);
        }
        self.staging[..data.len()].copy_from_slice(data);
        let written = self.sink.write(&self.staging, 0, data.len())?;
        self.bytes_written += written as u64;
        Ok(written)
    }

    pub fn config(&self) -> &AudioSinkConfig {
        &self.config
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// 停止并释放设备（多次调用只执行一次）
    pub fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.sink.stop() {
            warn!("⚠️  停止音频输出失败: {}", e);
        }
        if let Err(e) = self.sink.release() {
            warn!("⚠️  释放音频输出失败: {}", e);
        }
        info!("🔊 音频输出已停止");
    }
}

impl Drop for AudioOutputSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "cpal-output")]
pub use cpal_sink::CpalAudioSink;

#[cfg(feature = "cpal-output")]
mod cpal_sink {
    use super::{AudioSinkConfig, ChannelConfig};
    use crate::core::{PlayerError, Result};
    use crate::player::codec::AudioSink;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedBufferSize, SupportedStreamConfigRange};
    use crossbeam::queue::SegQueue;
    use log::{debug, error, info};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// 声卡输出 - 使用 cpal 播放 16 位 PCM
    pub struct CpalAudioSink {
        device: Device,
        config: StreamConfig,
        stream: Option<Stream>,
        buffer: Arc<SegQueue<f32>>,
        /// 队列里最多积压的采样数，超过后 write 阻塞
        capacity_samples: usize,
    }

    impl CpalAudioSink {
        pub fn new(sink_config: &AudioSinkConfig) -> Result<Self> {
            let channels = sink_config.channel_config.channels();
            info!("初始化声卡输出: {} Hz, {} 声道", sink_config.sample_rate, channels);

            let device = default_device()?;
            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sink_config.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let supported_configs = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
            let is_supported = supported_configs
                .into_iter()
                .any(|supported| is_config_compatible(&config, &supported));
            if !is_supported {
                return Err(PlayerError::AudioError(format!(
                    "音频设备不支持 {} Hz, {} 声道",
                    sink_config.sample_rate, channels
                )));
            }

            Ok(Self {
                device,
                config,
                stream: None,
                buffer: Arc::new(SegQueue::new()),
                capacity_samples: (sink_config.buffer_size_bytes / 2).max(channels as usize),
            })
        }

        /// 查询设备最小缓冲（字节）
        pub fn min_buffer_size(sample_rate: u32, channels: ChannelConfig) -> Option<usize> {
            let device = default_device().ok()?;
            let wanted = StreamConfig {
                channels: channels.channels(),
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let supported = device
                .supported_output_configs()
                .ok()?
                .find(|supported| is_config_compatible(&wanted, supported))?;
            match supported.buffer_size() {
                SupportedBufferSize::Range { min, .. } if *min > 0 => {
                    Some(*min as usize * channels.channels() as usize * 2)
                }
                _ => None,
            }
        }

        /// 清空缓冲区
        pub fn clear_buffer(&self) {
            while self.buffer.pop().is_some() {}
        }
    }

    fn default_device() -> Result<Device> {
        cpal::default_host()
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        rate_in_range && config.channels == supported.channels()
    }

    impl AudioSink for CpalAudioSink {
        fn play(&mut self) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }

            let buffer = self.buffer.clone();

            let stream = self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for sample in data.iter_mut() {
                            *sample = buffer.pop().unwrap_or(0.0);
                        }
                    },
                    move |err| {
                        error!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

            self.stream = Some(stream);
            info!("声卡输出已启动");
            Ok(())
        }

        fn write(&mut self, data: &[u8], offset: usize, len: usize) -> Result<usize> {
            let end = offset
                .checked_add(len)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| PlayerError::AudioError(format!("写入越界: {}+{} > {}", offset, len, data.len())))?;

            // 设备消费不过来时阻塞，等队列回落
            while self.stream.is_some() && self.buffer.len() > self.capacity_samples {
                thread::sleep(Duration::from_millis(2));
            }

            for chunk in data[offset..end].chunks_exact(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                self.buffer.push(sample as f32 / i16::MAX as f32);
            }
            Ok(len - len % 2)
        }

        fn stop(&mut self) -> Result<()> {
            if let Some(stream) = self.stream.take() {
                stream
                    .pause()
                    .map_err(|e| PlayerError::AudioError(format!("暂停音频流失败: {}", e)))?;
                drop(stream);
                info!("声卡输出已停止");
            }
            Ok(())
        }

        fn release(&mut self) -> Result<()> {
            self.stream.take();
            self.clear_buffer();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(channel_count: u16, max_input_size: usize) -> AudioTrackInfo {
        AudioTrackInfo {
            channel_count,
            sample_rate: 44100,
            max_input_size,
        }
    }

    #[test]
    fn test_channel_config() {
        assert_eq!(ChannelConfig::from_channel_count(1), ChannelConfig::Mono);
        assert_eq!(ChannelConfig::from_channel_count(2), ChannelConfig::Stereo);
        // 多声道按立体声处理
        assert_eq!(ChannelConfig::from_channel_count(6), ChannelConfig::Stereo);
    }

    #[test]
    fn test_buffer_from_min_size_is_frame_aligned() {
        let config = AudioSinkConfig::from_track(&track(2, 8192), Some(3001), 4).unwrap();
        assert_eq!(config.buffer_size_bytes, 12004);
        assert_eq!(config.buffer_size_bytes % frame_size_bytes(2), 0);
        assert_eq!(config.channel_config, ChannelConfig::Stereo);
    }

    #[test]
    fn test_buffer_falls_back_to_max_input_size() {
        let config = AudioSinkConfig::from_track(&track(2, 4099), None, 4).unwrap();
        assert_eq!(config.buffer_size_bytes, 4096);

        let config = AudioSinkConfig::from_track(&track(1, 4099), Some(0), 4).unwrap();
        assert_eq!(config.buffer_size_bytes, 4098);
        assert_eq!(config.channel_config, ChannelConfig::Mono);
    }

    #[test]
    fn test_unknown_buffer_size_is_error() {
        let err = AudioSinkConfig::from_track(&track(1, 0), None, 4).unwrap_err();
        assert!(matches!(err, PlayerError::AudioError(_)));
    }

    #[test]
    fn test_tiny_buffer_keeps_one_frame() {
        let config = AudioSinkConfig::from_track(&track(2, 3), None, 4).unwrap();
        assert_eq!(config.buffer_size_bytes, 4);
    }
}
