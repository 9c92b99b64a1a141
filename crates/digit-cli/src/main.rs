use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use digit_hw::{Resolution, Session};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod preview;

use config::Config;

#[derive(Parser)]
#[command(name = "digit", about = "DIGIT tactile sensor CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected sensors
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect and show device and stream information
    Info {
        serial: String,
        /// Friendly name shown in the report (e.g., "Left Gripper")
        #[arg(short, long)]
        name: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture a single frame to an image file
    Capture {
        serial: String,
        /// Output path; the image format follows the extension
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        stream: StreamArgs,
        /// Keep the sensor's native orientation
        #[arg(long)]
        raw: bool,
    },
    /// Live preview in the terminal (Esc or q to quit)
    Preview {
        serial: String,
        #[command(flatten)]
        stream: StreamArgs,
        /// Show the difference from the first captured frame
        #[arg(long)]
        reference: bool,
    },
    /// Set LED illumination
    #[command(group(ArgGroup::new("setting").required(true).args(["level", "rgb"])))]
    Led {
        serial: String,
        /// Same level on every LED
        #[arg(long, conflicts_with = "rgb")]
        level: Option<u8>,
        /// Per-channel levels, 0-15 each
        #[arg(long, num_args = 3, value_names = ["R", "G", "B"])]
        rgb: Option<Vec<u8>>,
    },
}

#[derive(Args)]
struct StreamArgs {
    /// Stream resolution (QVGA or VGA)
    #[arg(short, long)]
    resolution: Option<Resolution>,
    /// Frame rate; must be supported at the chosen resolution
    #[arg(short, long)]
    fps: Option<u32>,
}

enum LedSetting {
    Level(u8),
    Rgb(u8, u8, u8),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::List { json } => {
            let devices = config.registry()?.list_devices();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No DIGIT sensors connected");
            } else {
                println!("Connected DIGITs:");
                for d in &devices {
                    let streams: Vec<String> = d
                        .streams
                        .iter()
                        .map(|s| format!("{} {:?}fps", s.label, s.fps_options()))
                        .collect();
                    println!(
                        "  {}  {}  {} {} rev {}  [{}]",
                        d.serial,
                        d.path,
                        d.manufacturer,
                        d.model,
                        d.revision,
                        streams.join(", ")
                    );
                }
            }
        }
        Commands::Info { serial, name, json } => {
            let mut session = Session::with_backend(serial.as_str(), config.registry()?, config.backend());
            if let Some(name) = name {
                session = session.with_name(name);
            }
            connect(&mut session, &config)?;
            let info = session.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{info}");
            }
        }
        Commands::Capture {
            serial,
            output,
            stream,
            raw,
        } => {
            let mut session = open(&serial, &config)?;
            stream.apply(&mut session)?;
            let frame = if raw {
                session.get_frame_raw()?
            } else {
                session.get_frame()?
            };
            frame
                .save(&output)
                .with_context(|| format!("failed to save frame to {}", output.display()))?;
            println!(
                "Saved {}x{} frame #{} to {} (mean {:.1})",
                frame.width,
                frame.height,
                frame.sequence,
                output.display(),
                frame.avg_brightness()
            );
        }
        Commands::Preview {
            serial,
            stream,
            reference,
        } => {
            let mut session = open(&serial, &config)?;
            stream.apply(&mut session)?;
            let reference = if reference {
                Some(session.get_frame()?)
            } else {
                None
            };
            let mut view = preview::TerminalView::enter(format!("DIGIT {serial}"))?;
            session.show_view(&mut view, reference.as_ref())?;
        }
        Commands::Led { serial, level, rgb } => {
            let setting = match (level, rgb.as_deref()) {
                (Some(level), None) => LedSetting::Level(level),
                (None, Some(&[r, g, b])) => LedSetting::Rgb(r, g, b),
                _ => bail!("pass --level N or --rgb R G B"),
            };
            let mut session = open(&serial, &config)?;
            let packed = match setting {
                LedSetting::Level(level) => session.set_intensity(level)?,
                LedSetting::Rgb(r, g, b) => session.set_intensity_rgb(r, g, b)?,
            };
            println!("LED intensity set to {packed:#05x}");
        }
    }

    Ok(())
}

impl StreamArgs {
    fn apply(&self, session: &mut Session) -> Result<()> {
        if let Some(resolution) = self.resolution {
            session.set_resolution(resolution)?;
        }
        if let Some(fps) = self.fps {
            session.set_fps(fps)?;
        }
        Ok(())
    }
}

fn open(serial: &str, config: &Config) -> Result<Session> {
    let mut session = Session::with_backend(serial, config.registry()?, config.backend());
    connect(&mut session, config)?;
    Ok(session)
}

/// Connect and discard warmup frames.
fn connect(session: &mut Session, config: &Config) -> Result<()> {
    session
        .connect()
        .with_context(|| format!("failed to connect to DIGIT {}", session.serial()))?;
    if config.warmup_frames > 0 {
        tracing::debug!(count = config.warmup_frames, "discarding warmup frames");
        for _ in 0..config.warmup_frames {
            session.get_frame_raw()?;
        }
    }
    Ok(())
}
