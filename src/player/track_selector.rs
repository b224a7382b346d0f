use crate::core::{AudioTrackInfo, PlayerError, Result, TrackDescriptor, TrackFormat, TrackKind, VideoTrackInfo};
use crate::player::codec::MediaExtractor;
use log::debug;

/// 按索引顺序查找第一条 mime 以 prefix 开头的轨道
pub fn select_track(extractor: &dyn MediaExtractor, mime_prefix: &str) -> Result<Option<usize>> {
    for index in 0..extractor.track_count() {
        let format = extractor.track_format(index)?;
        if format.mime.starts_with(mime_prefix) {
            debug!("轨道 #{} 匹配 {}: {}", index, mime_prefix, format.mime);
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// 从轨道格式读出本次会话需要的字段
pub fn describe_track(index: usize, kind: TrackKind, format: &TrackFormat) -> Result<TrackDescriptor> {
    let mut descriptor = TrackDescriptor {
        index,
        mime: format.mime.clone(),
        kind,
        video: None,
        audio: None,
    };

    match kind {
        TrackKind::Video => {
            descriptor.video = Some(VideoTrackInfo {
                width: format.width.ok_or(PlayerError::MissingFormatKey("width"))?,
                height: format.height.ok_or(PlayerError::MissingFormatKey("height"))?,
                duration_us: format.duration_us.unwrap_or(0),
            });
        }
        TrackKind::Audio => {
            let channel_count = format
                .channel_count
                .ok_or(PlayerError::MissingFormatKey("channel-count"))?;
            let sample_rate = format
                .sample_rate
                .ok_or(PlayerError::MissingFormatKey("sample-rate"))?;
            if channel_count == 0 || sample_rate == 0 {
                return Err(PlayerError::DecodeError(format!(
                    "无效的音频参数: {} Hz, {} 声道",
                    sample_rate, channel_count
                )));
            }
            descriptor.audio = Some(AudioTrackInfo {
                channel_count,
                sample_rate,
                max_input_size: format.max_input_size.unwrap_or(0),
            });
        }
    }

    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::memory::{MemoryContainer, MemoryExtractor, MemoryTrack};
    use std::sync::Arc;

    fn extractor_with(mimes: &[&str]) -> MemoryExtractor {
        let mut container = MemoryContainer::new();
        for mime in mimes {
            let format = if mime.starts_with("video/") {
                TrackFormat::video(mime, 320, 240, 1_000_000)
            } else {
                TrackFormat::audio(mime, 44100, 1, 4096)
            };
            container.add_track(MemoryTrack::new(format));
        }
        MemoryExtractor::new(Arc::new(container), None)
    }

    #[test]
    fn test_no_tracks() {
        let extractor = extractor_with(&[]);
        assert_eq!(select_track(&extractor, "audio/").unwrap(), None);
        assert_eq!(select_track(&extractor, "video/").unwrap(), None);
    }

    #[test]
    fn test_single_match() {
        let extractor = extractor_with(&["video/avc"]);
        assert_eq!(select_track(&extractor, "video/").unwrap(), Some(0));
        assert_eq!(select_track(&extractor, "audio/").unwrap(), None);
    }

    #[test]
    fn test_lowest_index_wins() {
        let extractor = extractor_with(&["text/vtt", "audio/mp4a-latm", "video/avc", "audio/opus", "video/hevc"]);
        assert_eq!(select_track(&extractor, "audio/").unwrap(), Some(1));
        assert_eq!(select_track(&extractor, "video/").unwrap(), Some(2));
    }

    #[test]
    fn test_describe_audio_requires_rate_and_channels() {
        let mut format = TrackFormat::audio("audio/raw", 44100, 1, 4096);
        let descriptor = describe_track(0, TrackKind::Audio, &format).unwrap();
        let audio = descriptor.audio.unwrap();
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.channel_count, 1);

        format.sample_rate = None;
        let err = describe_track(0, TrackKind::Audio, &format).unwrap_err();
        assert!(matches!(err, PlayerError::MissingFormatKey("sample-rate")));
    }

    #[test]
    fn test_describe_video() {
        let format = TrackFormat::video("video/raw", 320, 240, 2_000_000);
        let descriptor = describe_track(3, TrackKind::Video, &format).unwrap();
        assert_eq!(descriptor.index, 3);
        assert_eq!(
            descriptor.video,
            Some(VideoTrackInfo { width: 320, height: 240, duration_us: 2_000_000 })
        );
    }
}
