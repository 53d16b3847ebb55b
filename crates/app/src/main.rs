use std::time::Duration;

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use tonedial_app::io_loop::{self, EndpointOptions};
use tonedial_app::tone;
use tonedial_audio::OutputDeviceSelector;
use tonedial_foundation::ShutdownHandler;

#[derive(Parser, Debug)]
#[command(
    name = "tonedial",
    about = "Software telephony endpoint simulator: DTMF keypad input and PCM playback"
)]
struct Cli {
    /// Output device name (exact match, then case-insensitive substring)
    #[arg(long, env = "TONEDIAL_DEVICE")]
    device: Option<String>,

    /// Sample rate the device is warmed up at before the first playback
    #[arg(long, default_value_t = 8000)]
    rate: u32,

    /// Keyboard-only mode without the on-screen keypad
    #[arg(long)]
    headless: bool,

    /// Feedback tone length per keypress in milliseconds; 0 disables tones
    #[arg(long, default_value_t = 180)]
    tone_ms: u64,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn init_logging() -> anyhow::Result<()> {
    // The TUI owns stdout, so logs go to a file only
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "tonedial.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    std::mem::forget(guard);
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let selector = OutputDeviceSelector::new(None)?;
    for device in selector.enumerate_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{}", device.name, marker);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices();
    }

    init_logging()?;
    tracing::info!(rate = cli.rate, headless = cli.headless, "Starting tonedial");

    // The loop is the DTMF producer; this binary is its own hosting
    // application, answering each key with a local feedback tone.
    let (key_tx, key_rx) = crossbeam_channel::unbounded();
    let sink: io_loop::DtmfSink = Box::new(move |key| {
        key_tx
            .send(key)
            .map_err(|e| anyhow::anyhow!("key channel closed: {e}"))
    });

    let options = EndpointOptions {
        sample_rate: cli.rate,
        show_window: !cli.headless,
        device: cli.device.clone(),
        ..Default::default()
    };
    let handle = io_loop::start(options, sink)?;

    ShutdownHandler::new(handle.shutdown_flag()).install();

    let playback = handle.playback();
    let tone_len = Duration::from_millis(cli.tone_ms);
    let rate = cli.rate;
    let feedback = tokio::task::spawn_blocking(move || {
        // Ends when the loop drops the sink and the channel disconnects
        while let Ok(key) = key_rx.recv() {
            tracing::info!(%key, "DTMF key");
            if !tone_len.is_zero() {
                playback.play(tone::dtmf_tone(key, rate, tone_len));
            }
        }
    });

    handle.join().await;
    let _ = feedback.await;
    tracing::info!("tonedial stopped");
    Ok(())
}
