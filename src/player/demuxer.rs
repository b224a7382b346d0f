use crate::core::{PlayerError, Result, TrackFormat};
use crate::player::codec::MediaExtractor;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, Rational};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 视频轨道单个输入缓冲的下限
const MIN_VIDEO_INPUT_SIZE: usize = 1024 * 1024;
/// 音频轨道单个输入缓冲大小
const AUDIO_INPUT_SIZE: usize = 256 * 1024;

/// 随 TrackFormat 交给解码器的 FFmpeg 流参数
pub struct FfmpegCodecParameters {
    pub parameters: codec::Parameters,
    pub time_base: Rational,
}

// Parameters 里是裸指针，不是 Send/Sync
// 这里存的是 clone 出来的独立副本，创建后只读，解码线程拿到后只用来构造解码器
unsafe impl Send for FfmpegCodecParameters {}
unsafe impl Sync for FfmpegCodecParameters {}

/// 流时间戳 -> 微秒
pub(crate) fn ts_to_us(ts: i64, time_base: Rational) -> i64 {
    (ts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64 * 1_000_000.0) as i64
}

/// 微秒 -> 流时间戳
pub(crate) fn us_to_ts(us: i64, time_base: Rational) -> i64 {
    if time_base.numerator() == 0 {
        return us;
    }
    (us as f64 / 1_000_000.0 * time_base.denominator() as f64 / time_base.numerator() as f64) as i64
}

/// 解封装器 - 读取媒体文件，只输出选中流的数据包
pub struct FfmpegExtractor {
    input_ctx: format::context::Input,
    source_path: PathBuf,
    selected: Option<usize>,
    /// 当前样本（已读出、未 advance）
    current: Option<ffmpeg::Packet>,
    released: bool,
}

impl FfmpegExtractor {
    /// 打开媒体文件
    pub fn open(path: &Path) -> Result<Self> {
        info!("正在打开文件: {}", path.display());

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("无法打开文件 {}: {}", path.display(), e)))?;

        debug!("容器: {}, {} 条流", input_ctx.format().name(), input_ctx.streams().count());

        Ok(Self {
            input_ctx,
            source_path: path.to_path_buf(),
            selected: None,
            current: None,
            released: false,
        })
    }

    /// 读取选中流的下一个数据包，跳过其他流
    fn next_selected_packet(&mut self) -> Option<ffmpeg::Packet> {
        let selected = self.selected?;
        for (stream, packet) in self.input_ctx.packets() {
            if stream.index() == selected {
                return Some(packet);
            }
        }
        None
    }

    fn selected_time_base(&self) -> Option<Rational> {
        self.selected
            .and_then(|index| self.input_ctx.stream(index))
            .map(|stream| stream.time_base())
    }

    pub fn description(&self) -> String {
        format!("FFmpeg Extractor: {}", self.source_path.display())
    }
}

impl MediaExtractor for FfmpegExtractor {
    fn track_count(&self) -> usize {
        self.input_ctx.streams().count()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        let stream = self
            .input_ctx
            .stream(index)
            .ok_or_else(|| PlayerError::DecodeError(format!("流索引越界: {}", index)))?;

        let parameters = stream.parameters();
        let codec_name = parameters.id().name().to_string();
        let time_base = stream.time_base();

        let duration_us = if stream.duration() > 0 {
            ts_to_us(stream.duration(), time_base)
        } else {
            // 容器时长本身就是微秒
            self.input_ctx.duration().max(0)
        };

        let codec_config = Arc::new(FfmpegCodecParameters {
            parameters: parameters.clone(),
            time_base,
        });

        let format = match parameters.medium() {
            media::Type::Video => {
                let decoder = codec::context::Context::from_parameters(parameters)?.decoder().video()?;
                let (width, height) = (decoder.width(), decoder.height());
                let input_size = (width as usize * height as usize * 3).max(MIN_VIDEO_INPUT_SIZE);
                TrackFormat::video(&format!("video/{}", codec_name), width, height, duration_us)
                    .with_max_input_size(input_size)
            }
            media::Type::Audio => {
                let decoder = codec::context::Context::from_parameters(parameters)?.decoder().audio()?;
                TrackFormat::audio(
                    &format!("audio/{}", codec_name),
                    decoder.rate(),
                    decoder.channels(),
                    AUDIO_INPUT_SIZE,
                )
                .with_duration(duration_us)
            }
            media::Type::Subtitle => TrackFormat {
                mime: format!("text/{}", codec_name),
                ..Default::default()
            },
            other => TrackFormat {
                mime: format!("application/{:?}", other).to_lowercase(),
                ..Default::default()
            },
        };

        Ok(format.with_codec_config(codec_config))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if self.input_ctx.stream(index).is_none() {
            return Err(PlayerError::DecodeError(format!("流索引越界: {}", index)));
        }
        debug!("选择流 {}", index);
        self.selected = Some(index);
        self.current = self.next_selected_packet();
        Ok(())
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let packet = match &self.current {
            Some(packet) => packet,
            None => return Ok(None),
        };
        let data = packet.data().unwrap_or(&[]);
        if data.len() > buf.len() {
            return Err(PlayerError::DecodeError(format!(
                "数据包 {} 字节超过输入缓冲 {} 字节",
                data.len(),
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(Some(data.len()))
    }

    fn sample_time(&self) -> i64 {
        let time_base = match self.selected_time_base() {
            Some(time_base) => time_base,
            None => return -1,
        };
        self.current
            .as_ref()
            .and_then(|packet| packet.pts().or_else(|| packet.dts()))
            .map(|ts| ts_to_us(ts, time_base))
            .unwrap_or(-1)
    }

    fn advance(&mut self) -> Result<bool> {
        self.current = self.next_selected_packet();
        Ok(self.current.is_some())
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.current = None;
            debug!("释放解封装器: {}", self.source_path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_conversion() {
        let tb = Rational::new(1, 90_000);
        assert_eq!(ts_to_us(90_000, tb), 1_000_000);
        assert_eq!(us_to_ts(40_000, tb), 3_600);

        let ms = Rational::new(1, 1000);
        assert_eq!(ts_to_us(40, ms), 40_000);
        assert_eq!(us_to_ts(ts_to_us(1234, ms), ms), 1234);
    }

    #[test]
    fn test_open_missing_file_fails() {
        ffmpeg::init().unwrap();
        let result = FfmpegExtractor::open(Path::new("/nonexistent/file.mp4"));
        assert!(matches!(result, Err(PlayerError::OpenError(_))));
    }
}
