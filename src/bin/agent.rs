use anyhow::Context;
use skycast::detection::{load_engine, InferenceEngine, NullEngine};
use skycast::gps::{GpsSource, SimulatedGps};
use skycast::platform::{default_openers, BackendOpener};
use skycast::signaling::{connect_websocket, ReconnectPolicy};
use skycast::testing::SyntheticOpener;
use skycast::{AgentServices, RtcSessionFactory, SkycastConfig, StreamError, StreamingAgent};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

const USAGE: &str = "Usage: skycast-agent [--config <path>] [--server <ws-url>] \
[--device-id <id>] [--device-name <name>] [--width <px>] [--height <px>] [--fps <n>] \
[--model <onnx>] [--synthetic] [--no-detection]";

struct Args {
    config: PathBuf,
    server: Option<String>,
    device_id: Option<String>,
    device_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    model: Option<PathBuf>,
    synthetic: bool,
    no_detection: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut parsed = Args {
        config: SkycastConfig::default_path(),
        server: None,
        device_id: None,
        device_name: None,
        width: None,
        height: None,
        fps: None,
        model: None,
        synthetic: false,
        no_detection: false,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> anyhow::Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .with_context(|| format!("{} needs a value", flag))
        };
        match flag {
            "--config" => parsed.config = PathBuf::from(value()?),
            "--server" => parsed.server = Some(value()?),
            "--device-id" => parsed.device_id = Some(value()?),
            "--device-name" => parsed.device_name = Some(value()?),
            "--width" => parsed.width = Some(value()?.parse().context("invalid --width")?),
            "--height" => parsed.height = Some(value()?.parse().context("invalid --height")?),
            "--fps" => parsed.fps = Some(value()?.parse().context("invalid --fps")?),
            "--model" => parsed.model = Some(PathBuf::from(value()?)),
            "--synthetic" => parsed.synthetic = true,
            "--no-detection" => parsed.no_detection = true,
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => anyhow::bail!("Unknown argument: {}\n{}", other, USAGE),
        }
        i += 1;
    }
    Ok(parsed)
}

fn apply_overrides(config: &mut SkycastConfig, args: &Args) {
    if let Some(server) = &args.server {
        config.bus.url = server.clone();
    }
    if let Some(id) = &args.device_id {
        config.device.id = id.clone();
    }
    if let Some(name) = &args.device_name {
        config.device.name = name.clone();
    }
    if let Some(width) = args.width {
        config.camera.width = width;
    }
    if let Some(height) = args.height {
        config.camera.height = height;
    }
    if let Some(fps) = args.fps {
        config.camera.fps = fps;
    }
    if let Some(model) = &args.model {
        config.detection.model_path = model.clone();
    }
    if args.synthetic {
        config.camera.synthetic = true;
    }
    if args.no_detection {
        config.detection.enabled = false;
    }
}

async fn run(config: SkycastConfig) -> anyhow::Result<()> {
    let openers: Vec<Arc<dyn BackendOpener>> = if config.camera.synthetic {
        vec![Arc::new(SyntheticOpener::new())]
    } else {
        default_openers()
    };
    let gps = config.gps.simulated.then(|| {
        Box::new(SimulatedGps::new(
            config.gps.start_latitude,
            config.gps.start_longitude,
        )) as Box<dyn GpsSource>
    });
    let engine: Box<dyn InferenceEngine> = if config.detection.enabled {
        load_engine(&config.detection)
    } else {
        Box::new(NullEngine)
    };
    let services = AgentServices {
        openers,
        engine,
        sessions: Arc::new(RtcSessionFactory::from(&config)),
        gps,
        still_sink: None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    })
    .context("failed to install signal handler")?;

    let url = config.bus.url.clone();
    let policy = ReconnectPolicy::from(&config.bus);
    log::info!(
        "Starting {} ({}) against {}",
        config.device.name,
        config.device.id,
        url
    );

    let agent = StreamingAgent::start(config, services, move || connect_websocket(url, policy))
        .await?;
    let summary = agent.run(shutdown_rx).await;
    println!("{}", serde_json::to_string(&serde_json::json!({
        "frames_captured": summary.frames_captured,
        "frames_written": summary.frames_written,
        "detections_processed": summary.detections_processed,
        "restarts": summary.restarts,
    }))?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    skycast::init_logging();

    let args: Vec<String> = env::args().collect();
    let args = parse_args(&args)?;

    let mut config = SkycastConfig::load_layered(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, &args);
    config.validate().map_err(anyhow::Error::msg)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    match runtime.block_on(run(config)) {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(StreamError::CameraUnavailable { .. }) = e.downcast_ref::<StreamError>() {
                log::error!("{}", e);
                std::process::exit(2);
            }
            Err(e)
        }
    }
}
