use crate::core::{BufferFlags, Result};
use crate::player::codec::{MediaCodec, MediaExtractor};
use log::debug;
use std::time::Duration;

/// 喂一次数据：从解封装器取一个压缩样本放进解码器的输入缓冲
///
/// 源读完时送入 EOS 并返回 EndOfStream，之后调用方不再喂数据。
/// 拿不到空闲输入缓冲时什么也不做，下一轮再试。
pub fn feed_one(
    extractor: &mut dyn MediaExtractor,
    codec: &mut dyn MediaCodec,
    timeout: Duration,
) -> Result<FeedResult> {
    let index = match codec.dequeue_input_buffer(timeout)? {
        Some(index) => index,
        None => return Ok(FeedResult::NoInputBuffer),
    };

    let buffer = codec.input_buffer(index)?;
    match extractor.read_sample_data(buffer)? {
        None => {
            debug!("📄 解封装器已无数据，输入端送入 EOS");
            codec.queue_input_buffer(index, 0, 0, BufferFlags::END_OF_STREAM)?;
            Ok(FeedResult::EndOfStream)
        }
        Some(size) => {
            let presentation_time_us = extractor.sample_time();
            codec.queue_input_buffer(index, size, presentation_time_us, BufferFlags::NONE)?;
            extractor.advance()?;
            Ok(FeedResult::Queued { size, presentation_time_us })
        }
    }
}

/// 单次喂数据的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResult {
    NoInputBuffer,
    Queued { size: usize, presentation_time_us: i64 },
    EndOfStream,
}

impl FeedResult {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FeedResult::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BufferInfo, TrackFormat};
    use crate::player::codec::DequeueOutput;
    use crate::player::memory::{MemoryContainer, MemoryExtractor, MemoryTrack, PassthroughCodec};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn setup(samples: usize) -> (MemoryExtractor, PassthroughCodec) {
        let mut track = MemoryTrack::new(TrackFormat::audio("audio/raw", 8000, 1, 64));
        for i in 0..samples {
            track.push_sample(i as i64 * 1000, vec![i as u8; 8]);
        }
        let mut container = MemoryContainer::new();
        container.add_track(track);
        let mut extractor = MemoryExtractor::new(Arc::new(container), None);
        extractor.select_track(0).unwrap();
        let format = extractor.track_format(0).unwrap();
        let mut codec = PassthroughCodec::new(&format, None, None);
        codec.start().unwrap();
        (extractor, codec)
    }

    #[test]
    fn test_feed_queues_sample_with_timestamp() {
        let (mut extractor, mut codec) = setup(2);
        let result = feed_one(&mut extractor, &mut codec, TIMEOUT).unwrap();
        assert_eq!(result, FeedResult::Queued { size: 8, presentation_time_us: 0 });
        let result = feed_one(&mut extractor, &mut codec, TIMEOUT).unwrap();
        assert_eq!(result, FeedResult::Queued { size: 8, presentation_time_us: 1000 });
    }

    #[test]
    fn test_exhausted_source_sends_eos() {
        let (mut extractor, mut codec) = setup(1);
        assert!(!feed_one(&mut extractor, &mut codec, TIMEOUT).unwrap().is_end_of_stream());
        assert!(feed_one(&mut extractor, &mut codec, TIMEOUT).unwrap().is_end_of_stream());

        // 先取到数据缓冲，再取到 EOS 缓冲
        let mut info = BufferInfo::default();
        let mut saw_eos = false;
        for _ in 0..10 {
            if let DequeueOutput::Buffer(index) = codec.dequeue_output_buffer(&mut info, TIMEOUT).unwrap() {
                codec.release_output_buffer(index, false).unwrap();
                if info.is_end_of_stream() {
                    saw_eos = true;
                    assert_eq!(info.size, 0);
                    break;
                }
                assert_eq!(info.size, 8);
            }
        }
        assert!(saw_eos);
    }

    #[test]
    fn test_no_free_input_buffer_is_noop() {
        let (mut extractor, mut codec) = setup(32);
        // 不取输出，输入缓冲迟早耗尽
        let mut results = Vec::new();
        for _ in 0..16 {
            results.push(feed_one(&mut extractor, &mut codec, TIMEOUT).unwrap());
        }
        assert!(results.contains(&FeedResult::NoInputBuffer));
        // 耗尽后解封装器的游标没有前进
        let queued = results.iter().filter(|r| matches!(r, FeedResult::Queued { .. })).count();
        assert_eq!(extractor.position(), queued);
    }
}
