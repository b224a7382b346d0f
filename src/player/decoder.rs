use crate::core::{BufferFlags, BufferInfo, PlayerError, Result, TrackFormat, TrackKind};
use crate::player::audio_output::ChannelConfig;
use crate::player::codec::{DequeueOutput, MediaCodec, RenderedFrame, SurfaceHandle};
use crate::player::demuxer::{ts_to_us, us_to_ts, FfmpegCodecParameters};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{codec, software, util, Rational};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

const INPUT_SLOTS: usize = 2;
const OUTPUT_SLOTS: usize = 2;
/// 已入队但还没送进解码器的包上限
const MAX_PENDING_PACKETS: usize = 8;
const DEFAULT_INPUT_SIZE: usize = 256 * 1024;

enum DecoderType {
    Video(codec::decoder::Video),
    Audio(codec::decoder::Audio),
}

impl DecoderType {
    fn opened(&mut self) -> &mut codec::decoder::Opened {
        match self {
            DecoderType::Video(decoder) => decoder,
            DecoderType::Audio(decoder) => decoder,
        }
    }
}

struct InputSlot {
    data: Vec<u8>,
    busy: bool,
}

#[derive(Default)]
struct OutputSlot {
    data: Vec<u8>,
    size: usize,
    width: u32,
    height: u32,
    presentation_time_us: i64,
    busy: bool,
}

/// FFmpeg 解码器，对外按缓冲交换协议工作
///
/// 视频帧转成 RGBA，归还时（render=true）送到渲染表面。
/// 音频帧重采样成 16 位交错 PCM（单声道或立体声，采样率不变）。
pub struct FfmpegCodec {
    kind: TrackKind,
    decoder: DecoderType,
    time_base: Rational,
    surface: Option<SurfaceHandle>,
    input_slots: Vec<InputSlot>,
    pending: VecDeque<ffmpeg::Packet>,
    output_slots: Vec<OutputSlot>,
    scaler: Option<software::scaling::Context>,
    resampler: Option<software::resampling::Context>,
    target_channels: u16,
    input_eos: bool,
    eof_sent: bool,
    drained: bool,
    eos_emitted: bool,
    format_reported: bool,
    started: bool,
    released: bool,
}

impl FfmpegCodec {
    /// 按轨道格式创建解码器
    pub fn new(format: &TrackFormat, surface: Option<SurfaceHandle>) -> Result<Self> {
        let params = format
            .codec_config
            .as_ref()
            .and_then(|config| config.downcast_ref::<FfmpegCodecParameters>())
            .ok_or_else(|| PlayerError::DecodeError(format!("{} 缺少 FFmpeg 流参数", format.mime)))?;

        let context = codec::context::Context::from_parameters(params.parameters.clone())?;
        let (kind, decoder) = if format.mime.starts_with(TrackKind::Video.mime_prefix()) {
            let decoder = context.decoder().video()?;
            debug!(
                "视频解码器: {}x{}, 格式: {:?}",
                decoder.width(),
                decoder.height(),
                decoder.format()
            );
            (TrackKind::Video, DecoderType::Video(decoder))
        } else if format.mime.starts_with(TrackKind::Audio.mime_prefix()) {
            let decoder = context.decoder().audio()?;
            debug!(
                "音频解码器: {} Hz, {} 声道, 格式: {:?}",
                decoder.rate(),
                decoder.channels(),
                decoder.format()
            );
            (TrackKind::Audio, DecoderType::Audio(decoder))
        } else {
            return Err(PlayerError::DecodeError(format!("不支持的轨道类型: {}", format.mime)));
        };

        let input_size = format.max_input_size.unwrap_or(DEFAULT_INPUT_SIZE);
        let target_channels = ChannelConfig::from_channel_count(format.channel_count.unwrap_or(2)).channels();

        info!("创建{}解码器: {}", kind, format.mime);

        Ok(Self {
            kind,
            decoder,
            time_base: params.time_base,
            surface,
            input_slots: (0..INPUT_SLOTS)
                .map(|_| InputSlot {
                    data: vec![0u8; input_size],
                    busy: false,
                })
                .collect(),
            pending: VecDeque::with_capacity(MAX_PENDING_PACKETS),
            output_slots: (0..OUTPUT_SLOTS).map(|_| OutputSlot::default()).collect(),
            scaler: None,
            resampler: None,
            target_channels,
            input_eos: false,
            eof_sent: false,
            drained: false,
            eos_emitted: false,
            format_reported: false,
            started: false,
            released: false,
        })
    }

    /// 把积压的包送进解码器；输入已结束时补发 EOF
    fn pump(&mut self) -> Result<()> {
        while let Some(packet) = self.pending.front() {
            match self.decoder.opened().send_packet(packet) {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => break,
                Err(ffmpeg::Error::Eof) => {
                    debug!("{}解码器已收到 EOF，丢弃 {} 个积压包", self.kind, self.pending.len());
                    self.pending.clear();
                }
                Err(e) => {
                    // 单个损坏的包跳过即可
                    warn!("{}解码错误（已跳过）: {}", self.kind, e);
                    self.pending.pop_front();
                }
            }
        }

        if self.input_eos && self.pending.is_empty() && !self.eof_sent {
            match self.decoder.opened().send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => {}
                Err(e) => return Err(e.into()),
            }
            self.eof_sent = true;
        }
        Ok(())
    }

    fn free_output_slot(&self) -> Option<usize> {
        self.output_slots.iter().position(|slot| !slot.busy)
    }

    /// 取一帧解码结果放进空闲输出槽
    fn receive_into_slot(&mut self) -> Result<Option<usize>> {
        let index = match self.free_output_slot() {
            Some(index) => index,
            None => return Ok(None),
        };

        let filled = match &mut self.decoder {
            DecoderType::Video(decoder) => {
                let mut frame = util::frame::Video::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        self.convert_video_frame(&frame, index)?;
                        true
                    }
                    Err(e) => self.handle_receive_error(e)?,
                }
            }
            DecoderType::Audio(decoder) => {
                let mut frame = util::frame::Audio::empty();
                match decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        self.convert_audio_frame(&frame, index)?;
                        true
                    }
                    Err(e) => self.handle_receive_error(e)?,
                }
            }
        };

        if filled {
            self.output_slots[index].busy = true;
            Ok(Some(index))
        } else {
            Ok(None)
        }
    }

    fn handle_receive_error(&mut self, error: ffmpeg::Error) -> Result<bool> {
        match error {
            ffmpeg::Error::Other { errno } if errno == EAGAIN => Ok(false),
            ffmpeg::Error::Eof => {
                self.drained = true;
                Ok(false)
            }
            e => Err(e.into()),
        }
    }

    fn frame_pts_us(&self, timestamp: Option<i64>) -> i64 {
        timestamp.map(|ts| ts_to_us(ts, self.time_base)).unwrap_or(0)
    }

    /// 转换帧格式为 RGBA，写入输出槽
    fn convert_video_frame(&mut self, frame: &util::frame::Video, index: usize) -> Result<()> {
        let width = frame.width();
        let height = frame.height();

        // 初始化 scaler（YUV -> RGBA），尺寸变化时重建
        let needs_new_scaler = match &self.scaler {
            Some(scaler) => scaler.input().width != width || scaler.input().height != height,
            None => true,
        };
        if needs_new_scaler {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }

        let mut rgba_frame = util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgba_frame)?;
        }

        let presentation_time_us = self.frame_pts_us(frame.timestamp());

        // 复制数据到连续内存
        let row_size = width as usize * 4;
        let data_size = row_size * height as usize;
        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);

        let slot = &mut self.output_slots[index];
        if slot.data.len() < data_size {
            slot.data.resize(data_size, 0);
        }
        for y in 0..height as usize {
            let src_offset = y * stride;
            let dst_offset = y * row_size;
            slot.data[dst_offset..dst_offset + row_size]
                .copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }
        slot.size = data_size;
        slot.width = width;
        slot.height = height;
        slot.presentation_time_us = presentation_time_us;
        Ok(())
    }

    /// 重采样成 16 位交错 PCM，写入输出槽
    fn convert_audio_frame(&mut self, frame: &util::frame::Audio, index: usize) -> Result<()> {
        if self.resampler.is_none() {
            let source_layout = if frame.channel_layout().is_empty() {
                util::channel_layout::ChannelLayout::default(frame.channels() as i32)
            } else {
                frame.channel_layout()
            };
            let target_layout = match self.target_channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };

            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch (s16)",
                frame.rate(),
                frame.channels(),
                frame.rate(),
                self.target_channels
            );

            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                source_layout,
                frame.rate(),
                util::format::Sample::I16(util::format::sample::Type::Packed),
                target_layout,
                frame.rate(),
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }

        let presentation_time_us = self.frame_pts_us(frame.timestamp());

        let data_size = resampled.samples() * self.target_channels as usize * 2;
        let frame_data = resampled.data(0);
        let data_size = data_size.min(frame_data.len());

        let slot = &mut self.output_slots[index];
        if slot.data.len() < data_size {
            slot.data.resize(data_size, 0);
        }
        slot.data[..data_size].copy_from_slice(&frame_data[..data_size]);
        slot.size = data_size;
        slot.width = 0;
        slot.height = 0;
        slot.presentation_time_us = presentation_time_us;
        Ok(())
    }

    fn check_started(&self) -> Result<()> {
        if self.released {
            return Err(PlayerError::DecodeError(format!("{}解码器已释放", self.kind)));
        }
        if !self.started {
            return Err(PlayerError::DecodeError(format!("{}解码器未启动", self.kind)));
        }
        Ok(())
    }
}

impl MediaCodec for FfmpegCodec {
    fn start(&mut self) -> Result<()> {
        if self.released {
            return Err(PlayerError::DecodeError(format!("{}解码器已释放", self.kind)));
        }
        self.started = true;
        debug!("{}解码器已启动", self.kind);
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.check_started()?;
        if self.input_eos {
            return Ok(None);
        }
        if self.pending.len() >= MAX_PENDING_PACKETS {
            self.pump()?;
            if self.pending.len() >= MAX_PENDING_PACKETS {
                return Ok(None);
            }
        }
        let free = self.input_slots.iter().position(|slot| !slot.busy);
        if let Some(index) = free {
            self.input_slots[index].busy = true;
        }
        Ok(free)
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        match self.input_slots.get_mut(index) {
            Some(slot) if slot.busy => Ok(&mut slot.data),
            _ => Err(PlayerError::DecodeError(format!("无效的输入缓冲索引: {}", index))),
        }
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.check_started()?;
        let slot = match self.input_slots.get_mut(index) {
            Some(slot) if slot.busy => slot,
            _ => return Err(PlayerError::DecodeError(format!("无效的输入缓冲索引: {}", index))),
        };
        slot.busy = false;

        if size > 0 {
            let mut packet = ffmpeg::Packet::copy(&slot.data[..size]);
            packet.set_pts(Some(us_to_ts(presentation_time_us, self.time_base)));
            self.pending.push_back(packet);
        }
        if flags.is_end_of_stream() {
            debug!("{}输入结束", self.kind);
            self.input_eos = true;
        }
        self.pump()
    }

    fn dequeue_output_buffer(&mut self, info: &mut BufferInfo, _timeout: Duration) -> Result<DequeueOutput> {
        self.check_started()?;
        if !self.format_reported {
            self.format_reported = true;
            return Ok(DequeueOutput::FormatChanged);
        }

        self.pump()?;
        if let Some(index) = self.receive_into_slot()? {
            let slot = &self.output_slots[index];
            info.set(0, slot.size, slot.presentation_time_us, BufferFlags::NONE);
            return Ok(DequeueOutput::Buffer(index));
        }

        // 解码器排空后给出一个空的 EOS 缓冲
        if self.eof_sent && self.drained && !self.eos_emitted {
            if let Some(index) = self.free_output_slot() {
                self.eos_emitted = true;
                let last_pts = self
                    .output_slots
                    .iter()
                    .map(|slot| slot.presentation_time_us)
                    .max()
                    .unwrap_or(0);
                let slot = &mut self.output_slots[index];
                slot.size = 0;
                slot.presentation_time_us = last_pts;
                slot.busy = true;
                info.set(0, 0, last_pts, BufferFlags::END_OF_STREAM);
                return Ok(DequeueOutput::Buffer(index));
            }
        }

        Ok(DequeueOutput::TryAgainLater)
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        match self.output_slots.get(index) {
            Some(slot) if slot.busy => Ok(&slot.data[..slot.size]),
            _ => Err(PlayerError::DecodeError(format!("无效的输出缓冲索引: {}", index))),
        }
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<()> {
        let slot = match self.output_slots.get_mut(index) {
            Some(slot) if slot.busy => slot,
            _ => return Err(PlayerError::DecodeError(format!("无效的输出缓冲索引: {}", index))),
        };
        slot.busy = false;

        if render && slot.size > 0 && self.kind == TrackKind::Video {
            if let Some(surface) = &self.surface {
                surface.render(&RenderedFrame {
                    presentation_time_us: slot.presentation_time_us,
                    width: slot.width,
                    height: slot.height,
                    data: &slot.data[..slot.size],
                })?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.started {
            self.started = false;
            self.pending.clear();
            self.decoder.opened().flush();
            debug!("{}解码器已停止", self.kind);
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.scaler = None;
            self.resampler = None;
            self.output_slots.clear();
            self.input_slots.clear();
            debug!("{}解码器已释放", self.kind);
        }
        Ok(())
    }
}
