//! shrm-loop - loopback exerciser for the SHRM transport
//!
//! Attaches a full AP context to the software modem, runs the boot
//! handshake, then pushes messages through a loopback channel and checks
//! that every echo comes back intact.
//!
//! Usage:
//!   shrm-loop --channel audio --count 5000 --size 512
//!   shrm-loop --config shrm.toml

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use shrm::mock::MockModem;
use shrm::{BootInfo, BootState, Channel, SharedSegment, ShrmConfig, ShrmContext, StatsSnapshot};

#[derive(Parser, Debug)]
#[command(name = "shrm-loop")]
#[command(version)]
#[command(about = "Exercise the SHRM link against the software modem", long_about = None)]
struct Args {
    /// Transport configuration (TOML); built-in defaults if omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Physical channel to loop over
    #[arg(long, value_enum, default_value_t = LoopChannel::Common)]
    channel: LoopChannel,

    /// Messages to send
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Payload bytes per message
    #[arg(long, default_value_t = 256)]
    size: usize,

    /// Per-message timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LoopChannel {
    Common,
    Audio,
}

impl LoopChannel {
    fn channel(self) -> Channel {
        match self {
            LoopChannel::Common => Channel::CommonLoopback,
            LoopChannel::Audio => Channel::AudioLoopback,
        }
    }
}

fn payload(seq: usize, size: usize) -> Vec<u8> {
    (0..size).map(|i| (seq.wrapping_add(i) & 0xFF) as u8).collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ShrmConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ShrmConfig::default(),
    };
    log::debug!("config: {:?}", config);
    let timeout = Duration::from_millis(args.timeout);
    let channel = args.channel.channel();

    println!("{} SHRM loopback over {:?}", "▶".green(), channel);
    println!(
        "  {} messages of {} bytes, {} ms timeout",
        args.count, args.size, args.timeout
    );

    let segment = SharedSegment::new(&config.fifo).context("Failed to allocate segment")?;
    let modem = MockModem::new(segment.clone());
    let ctx = ShrmContext::attach(config.clone(), segment, modem.doorbell())
        .context("Failed to attach context")?;
    modem.connect(ctx.irq_line());
    modem.start().context("Failed to start software modem")?;

    modem
        .send_boot_request(BootInfo {
            config: config.boot_config_mask,
            version: config.protocol_version,
        })
        .context("Failed to send boot request")?;
    let deadline = Instant::now().checked_add(timeout);
    while ctx.boot_state() != BootState::Done {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            bail!("Boot handshake stuck in {:?}", ctx.boot_state());
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    if let Some(info) = ctx.negotiated() {
        println!(
            "{} Booted: config={:#04x} version={}",
            "✓".green(),
            info.config,
            info.version
        );
    }

    modem.set_echo(true);

    let start = Instant::now();
    for seq in 0..args.count {
        let sent = payload(seq, args.size);
        ctx.write_msg_timeout(channel, &sent, timeout)
            .with_context(|| format!("Failed to send message {}", seq))?;
        let echo = ctx
            .read_message_timeout(channel, timeout)
            .with_context(|| format!("No echo for message {}", seq))?;
        if echo.payload != sent {
            bail!(
                "Echo {} differs: sent {} bytes, got {} bytes",
                seq,
                sent.len(),
                echo.payload.len()
            );
        }
    }
    let elapsed = start.elapsed();

    let bytes = (args.count * args.size) as f64;
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "{} {} round trips in {:.2?} ({:.0} msg/s, {:.2} MiB/s each way)",
        "✓".green(),
        args.count,
        elapsed,
        args.count as f64 / secs,
        bytes / secs / (1024.0 * 1024.0)
    );

    print_stats(&ctx.stats());

    ctx.detach();
    modem.stop();
    Ok(())
}

fn print_stats(stats: &StatsSnapshot) {
    println!("{}", "Link statistics".bold());
    println!("  tx:      {} messages, {} bytes", stats.tx_messages, stats.tx_bytes);
    println!("  rx:      {} messages, {} bytes", stats.rx_messages, stats.rx_bytes);
    println!("  notify:  {} read notifications", stats.read_notifications);

    let dropped = format!("{}", stats.rx_dropped);
    let timeouts = format!("{}", stats.wake_timeouts);
    let resets = format!("{}", stats.resets);
    println!(
        "  errors:  {} dropped, {} wake timeouts, {} resets",
        if stats.rx_dropped > 0 { dropped.red() } else { dropped.normal() },
        if stats.wake_timeouts > 0 { timeouts.red() } else { timeouts.normal() },
        if stats.resets > 0 { resets.red() } else { resets.normal() }
    );
}
