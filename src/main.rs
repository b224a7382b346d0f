use anyhow::{Context, Result};
use crossbeam_channel::{never, select, tick, unbounded, Receiver};
use log::{debug, error, info, warn};
use myy_codec_player::core::{PlaybackEvent, PlayerConfig};
use myy_codec_player::player::{
    MediaBackend, MemoryBackend, MemoryContainer, PlaybackController, RenderSurface, RenderedFrame, SurfaceHandle,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const USAGE: &str = "用法: myy_codec_player <file> [--config <json>] [--audio-only]\n       myy_codec_player --synthetic [--config <json>] [--audio-only]";
const SYNTHETIC_PATH: &str = "synthetic://av";

/// 命令行上没有窗口，帧只计数并打日志
#[derive(Default)]
struct LoggingSurface {
    frames: AtomicU64,
}

impl RenderSurface for LoggingSurface {
    fn render(&self, frame: &RenderedFrame<'_>) -> myy_codec_player::core::Result<()> {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 25 == 1 {
            debug!(
                "🖼 第 {} 帧: pts={}ms {}x{} ({} 字节)",
                count,
                frame.presentation_time_us / 1000,
                frame.width,
                frame.height,
                frame.data.len()
            );
        }
        Ok(())
    }
}

struct CliArgs {
    config: Option<PathBuf>,
    audio_only: bool,
    synthetic: bool,
    file: Option<PathBuf>,
}

fn parse_args() -> Result<CliArgs> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        println!("{}", USAGE);
        std::process::exit(0);
    }

    Ok(CliArgs {
        config: args.opt_value_from_str("--config")?,
        audio_only: args.contains("--audio-only"),
        synthetic: args.contains("--synthetic"),
        file: args.finish().into_iter().next().map(PathBuf::from),
    })
}

#[cfg(feature = "ffmpeg")]
fn file_backend() -> Result<Arc<dyn MediaBackend>> {
    let backend = myy_codec_player::player::FfmpegBackend::new().context("FFmpeg 初始化失败")?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "ffmpeg"))]
fn file_backend() -> Result<Arc<dyn MediaBackend>> {
    anyhow::bail!("编译时未启用 ffmpeg 特性，只能使用 --synthetic")
}

enum Command {
    Pause,
    Resume,
    Stop,
    Quit,
}

/// 后台线程读 stdin，一行一条命令
fn spawn_stdin_reader() -> Result<Receiver<Command>> {
    let (tx, rx) = unbounded();
    thread::Builder::new().name("stdin-commands".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            let command = match line.trim() {
                "p" => Command::Pause,
                "r" => Command::Resume,
                "s" => Command::Stop,
                "q" => Command::Quit,
                "" => continue,
                other => {
                    warn!("未知命令: {}（可用: p 暂停 / r 恢复 / s 停止 / q 退出）", other);
                    continue;
                }
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::LoopStarted(kind) => info!("▶ {}循环已启动", kind),
        PlaybackEvent::TrackMissing(kind) => warn!("⚠️  文件里没有{}轨道", kind),
        PlaybackEvent::LoopFinished(report) => info!(
            "✅ {}循环结束: {:?}，{} 个样本入队，{} 个缓冲输出",
            report.kind, report.exit, report.samples_queued, report.buffers_released
        ),
        PlaybackEvent::LoopFailed { kind, error } => error!("❌ {}循环失败: {}", kind, error),
    }
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Codec Player 启动");

    let cli = parse_args()?;

    let config = match &cli.config {
        Some(path) => PlayerConfig::from_file(path).with_context(|| format!("加载配置失败: {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    let (backend, path): (Arc<dyn MediaBackend>, PathBuf) = if cli.synthetic {
        let backend = MemoryBackend::new().with_min_buffer_size(4096);
        backend.insert(SYNTHETIC_PATH, MemoryContainer::synthetic_av(Duration::from_secs(2)));
        (Arc::new(backend), PathBuf::from(SYNTHETIC_PATH))
    } else {
        let file = cli.file.clone().context(USAGE)?;
        (file_backend()?, file)
    };

    let surface: Option<SurfaceHandle> = if cli.audio_only {
        None
    } else {
        Some(Arc::new(LoggingSurface::default()))
    };

    let controller = PlaybackController::new(backend, config);
    controller.init_session(surface, &path);
    controller.play().context("启动播放失败")?;
    info!("命令: p 暂停 / r 恢复 / s 停止 / q 退出");

    let commands = spawn_stdin_reader()?;
    let mut stdin_open = true;
    let events = controller.events();
    let ticker = tick(Duration::from_millis(200));

    loop {
        let command_rx = if stdin_open { commands.clone() } else { never() };
        select! {
            recv(command_rx) -> command => match command {
                Ok(Command::Pause) => controller.pause(),
                Ok(Command::Resume) => controller.resume(),
                Ok(Command::Stop) => controller.stop(),
                Ok(Command::Quit) => break,
                // stdin 关闭后只等播放结束
                Err(_) => stdin_open = false,
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    log_event(&event);
                }
            },
            recv(ticker) -> _ => {
                if controller.status().live_loops == 0 {
                    info!("⏹️  所有解码循环已结束");
                    break;
                }
            },
        }
    }

    for event in events.try_iter() {
        log_event(&event);
    }

    let mut failures = 0;
    for result in controller.destroy_session() {
        if let Err(e) = result {
            warn!("⚠️  {}", e);
            failures += 1;
        }
    }
    info!("👋 退出（{} 个循环出错）", failures);
    Ok(())
}
