use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use framemux::cli::Args;
use framemux::config;
use framemux::{EncodeParameters, FfmpegBackend, FfmpegSession, PixelFormat};

fn init_logger(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| "framemux.log".into());
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(log_level.as_str().to_lowercase()),
        )
        .format_timestamp_millis()
        .init();
    }
    Ok(())
}

/// Moving RGB24 gradient, one frame per call
fn fill_test_pattern(buf: &mut [u8], width: u32, frame: u32) {
    let width = width as usize;
    let shift = (frame * 4) as usize;
    for (i, px) in buf.chunks_exact_mut(3).enumerate() {
        let (x, y) = (i % width, i / width);
        px[0] = ((x + shift) & 0xff) as u8;
        px[1] = ((y + shift / 2) & 0xff) as u8;
        px[2] = (((x + y) / 4) & 0xff) as u8;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args)?;
    debug!("Command-line args: {:?}", args);

    let params = args.apply(config::load_or_default(args.config.clone())?);
    if let Some(ref path) = args.save_config {
        config::save_params(path, &params)?;
    }

    // Test pattern is generated as RGB24
    let params = EncodeParameters {
        src_format: PixelFormat::Rgb24,
        ..params
    };

    let mut session = FfmpegSession::create(FfmpegBackend::new(), &args.output, &params)
        .with_context(|| format!("Failed to open {}", args.output.display()))?;

    let mut frame = vec![0u8; params.frame_size()];
    for n in 0..args.frames {
        fill_test_pattern(&mut frame, params.width, n);
        session
            .write(&frame)
            .with_context(|| format!("Failed to encode frame {}", n))?;
    }
    session.close();

    let stats = session.stats();
    println!(
        "{}: {} frames, {} packets ({} keyframes), {} bytes",
        args.output.display(),
        stats.frames_submitted,
        stats.packets_written,
        stats.keyframes,
        stats.bytes_written
    );
    Ok(())
}
