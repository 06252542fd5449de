use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use airplay_client::{CallbackSink, Device, DeviceId, RaopSender, SenderHandle, StatusEvent};
use airplay_core::{AudioFormat, SenderConfig, DEFAULT_RAOP_PORT};
use airplay_timing::now_unix_ns;
use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stream raw PCM to AirPlay (RAOP) receivers.
#[derive(Parser, Debug)]
#[command(name = "raop-sender", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RAOP_CONFIG")]
    config: Option<String>,

    /// Receiver as NAME=IP[:PORT]; repeatable. Configured devices with an
    /// address are always included.
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// 16-bit little-endian stereo 44.1 kHz PCM, "-" for stdin
    #[arg(short, long)]
    input: Option<String>,

    /// Logical volume 0-100
    #[arg(long, default_value_t = 50)]
    volume: i32,

    /// Delay between the first packet and its playback
    #[arg(long, default_value_t = 2000)]
    latency_ms: u64,

    /// Probe the receivers and exit
    #[arg(long)]
    probe: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = SenderConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_logging(&config.log_level);

    let devices = collect_devices(&args.devices, &config)?;
    if devices.is_empty() {
        bail!("no receivers given; use --device NAME=IP or configure one with an address");
    }

    let sink = CallbackSink::new(|event: StatusEvent| {
        info!("{} ({}) {}: {}", event.name, event.device, event.session, event.state);
    });
    let (sender, task) = RaopSender::spawn(config, Arc::new(sink)).await?;

    let result = if args.probe {
        probe_all(&sender, devices).await
    } else {
        stream(&sender, devices, &args).await
    };

    let stats = sender.stats();
    info!(
        "Sent {} packets, {} syncs, resent {} ({} rejected), {:.2}% loss",
        stats.packets_sent,
        stats.sync_sent,
        stats.rtx_fulfilled,
        stats.rtx_rejected,
        stats.loss_percent()
    );
    sender.shutdown().await?;
    task.await?;
    result
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn collect_devices(specs: &[String], config: &SenderConfig) -> anyhow::Result<Vec<Device>> {
    let mut devices = Vec::new();
    for spec in specs {
        let (name, addr) = spec
            .split_once('=')
            .with_context(|| format!("device {:?} is not NAME=IP[:PORT]", spec))?;
        let (ip, port) = match addr.parse::<SocketAddr>() {
            Ok(socket) => (socket.ip(), socket.port()),
            Err(_) => (
                addr.parse::<IpAddr>()
                    .with_context(|| format!("bad address in {:?}", spec))?,
                DEFAULT_RAOP_PORT,
            ),
        };
        devices.push(Device::new(device_id(devices.len()), name, vec![ip], port));
    }

    let mut configured: Vec<_> = config.devices.iter().collect();
    configured.sort_by(|a, b| a.0.cmp(b.0));
    for (name, device_config) in configured {
        let Some(ip) = device_config.address else {
            continue;
        };
        if devices.iter().any(|d| &d.name == name) {
            continue;
        }
        let port = device_config.port.unwrap_or(DEFAULT_RAOP_PORT);
        devices.push(Device::new(device_id(devices.len()), name.clone(), vec![ip], port));
    }
    Ok(devices)
}

/// Locally administered MAC-style id for receivers given by address.
fn device_id(index: usize) -> DeviceId {
    let [.., hi, lo] = (index as u32).to_be_bytes();
    DeviceId([0x02, 0, 0, 0, hi, lo])
}

async fn probe_all(sender: &SenderHandle, devices: Vec<Device>) -> anyhow::Result<()> {
    for device in devices {
        let name = device.name.clone();
        match sender.probe(device).await {
            Ok(status) => println!("{}: {}", name, status.state),
            Err(e) => println!("{}: {}", name, e),
        }
    }
    Ok(())
}

async fn stream(sender: &SenderHandle, devices: Vec<Device>, args: &Args) -> anyhow::Result<()> {
    let Some(input) = args.input.as_deref() else {
        bail!("--input is required unless --probe is given");
    };
    let mut reader: Box<dyn AsyncRead + Unpin + Send> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(input)
                .await
                .with_context(|| format!("opening {}", input))?,
        )
    };

    let format = AudioFormat::default();
    let mut rtptime = now_unix_ns() as u32;

    let mut connected = 0;
    for device in devices {
        let name = device.name.clone();
        match sender.start(device, args.volume, rtptime).await {
            Ok(status) if status.state.is_live() => connected += 1,
            Ok(status) => warn!("{}: not streaming ({})", name, status.state),
            Err(e) => warn!("{}: {}", name, e),
        }
    }
    if connected == 0 {
        bail!("no receiver accepted the stream");
    }

    let start_wall = now_unix_ns() + args.latency_ms * 1_000_000;
    sender.playback_start(rtptime, start_wall)?;

    let period = Duration::from_nanos(
        u64::from(format.frames_per_packet) * 1_000_000_000 / u64::from(format.sample_rate),
    );
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut buf = vec![0u8; format.bytes_per_packet()];
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let n = read_block(&mut reader, &mut buf).await?;
                if n == 0 {
                    info!("End of input");
                    break;
                }
                // Pad the final partial block with silence
                buf[n..].fill(0);
                sender.write_audio(buf.clone(), rtptime)?;
                rtptime = rtptime.wrapping_add(format.frames_per_packet);
            }
        }
    }

    sender.playback_stop()?;
    Ok(())
}

/// Fill `buf` as far as the input allows.
async fn read_block<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> anyhow::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
