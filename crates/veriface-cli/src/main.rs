use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use veriface_capture::CaptureConfig;
use veriface_core::{ExecutionContext, FaceNet, ModelSource};
use veriface_hw::geometry::{self, Rotation};
use veriface_hw::{
    frame, CameraTarget, CapturedImage, Frame, FrameSource, GrabKind, V4l2Devices, WebFrameSource,
};

#[derive(Parser)]
#[command(name = "veriface", about = "Veriface face verification CLI")]
struct Cli {
    /// Capture configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List video devices, external cameras first
    Devices,
    /// Grab one still, crop it to the guide frame and save it as JPEG
    Snapshot {
        /// Output file
        #[arg(short, long, default_value = "snapshot.jpg")]
        out: PathBuf,
        /// Device path (default: configured device, else first external camera)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Orient and size-limit a photo the way uploaded references are
    Prepare {
        input: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Rotate a photo by -90, 90, 180 or 270 degrees
    Rotate {
        input: PathBuf,
        #[arg(short, long, allow_hyphen_values = true)]
        degrees: i32,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Centre-crop a photo to a width/height ratio
    Crop {
        input: PathBuf,
        #[arg(short, long, default_value_t = geometry::GUIDE_ASPECT)]
        aspect: f32,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Show the model manifests required for an execution context
    Models {
        #[arg(long, value_enum)]
        context: Option<ContextArg>,
        /// Base URL the model weights are served from
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
    Browser,
    Native,
}

impl From<ContextArg> for ExecutionContext {
    fn from(c: ContextArg) -> Self {
        match c {
            ContextArg::Browser => ExecutionContext::Browser,
            ContextArg::Native => ExecutionContext::Native,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = CaptureConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Devices => {
            let mut source = WebFrameSource::new(V4l2Devices::new());
            let devices = source.list_devices().await;
            if devices.is_empty() {
                println!("No video devices found");
            }
            for device in devices {
                let kind = if device.is_built_in() { "built-in" } else { "external" };
                println!("{:<14} {:<9} {}", device.device_id, kind, device.label);
            }
        }
        Commands::Snapshot { out, device } => {
            let image = snapshot(&config, device).await?;
            write_image(&out, &image)?;
        }
        Commands::Prepare { input, out } => {
            let bytes = read_file(&input)?;
            let image = CapturedImage::from_upload(&bytes)?;
            write_image(&out, &image)?;
        }
        Commands::Rotate {
            input,
            degrees,
            out,
        } => {
            let rotation = Rotation::try_from(degrees)?;
            let frame = load_frame(&input)?;
            let rotated = geometry::rotate(&frame, rotation);
            write_image(&out, &CapturedImage::from_frame(&rotated, config.output_quality)?)?;
        }
        Commands::Crop { input, aspect, out } => {
            let frame = load_frame(&input)?;
            let cropped = geometry::crop_to_aspect(&frame, aspect)?;
            write_image(&out, &CapturedImage::from_frame(&cropped, config.output_quality)?)?;
        }
        Commands::Models { context, base_url } => {
            let context = context.map(ExecutionContext::from).unwrap_or(config.execution_context);
            let source = ModelSource::new(base_url.unwrap_or(config.model_base_url));
            println!("Execution context: {context:?}");
            for net in FaceNet::required_for(context) {
                println!("  {:<20} {}", net.asset_name(), source.manifest_url(net));
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Open a V4L2 camera as a web-mode frame source and take one guided still.
async fn snapshot(config: &CaptureConfig, device: Option<String>) -> Result<CapturedImage> {
    let mut source = WebFrameSource::new(V4l2Devices::new());
    let session = match device.or_else(|| config.camera_device.clone()) {
        Some(path) => source.start(CameraTarget::Device(Some(path))).await?,
        None => source.initialize().await?,
    };
    tracing::info!(device = ?session.device_id, "camera ready");

    let mut frame = source.grab_frame(GrabKind::Still).await;
    // The first buffers after stream-on can still be black.
    for _ in 0..3 {
        let dark = matches!(&frame, Ok(f) if config.skip_dark_frames && f.is_dark());
        if !dark {
            break;
        }
        tracing::debug!("dark frame, grabbing again");
        frame = source.grab_frame(GrabKind::Still).await;
    }
    source.stop().await;

    let frame = frame?;
    let cropped = geometry::crop_to_aspect(&frame, config.guide_aspect)?;
    Ok(CapturedImage::from_frame(&cropped, config.output_quality)?)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = frame::decode_oriented(&read_file(path)?)?;
    Ok(Frame::new(image, 0))
}

fn write_image(path: &Path, image: &CapturedImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        bail!("refusing to write an empty image");
    }
    std::fs::write(path, image.to_bytes()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "Wrote {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(())
}
