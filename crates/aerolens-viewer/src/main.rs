mod pattern;
mod runtime;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use winit::dpi::LogicalSize;

use aerolens_engine::device::GpuInit;
use aerolens_engine::logging::{init_logging, LoggingConfig};
use aerolens_engine::media::{ElementaryStreamType, StreamDescriptor};
use aerolens_engine::settings::{HmdModel, Settings, SettingsStore};

use pattern::PatternSource;
use runtime::{Runtime, ViewerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "aerolens",
    version,
    about = "Live drone-video viewer driven by a synthetic test pattern"
)]
struct Cli {
    /// Split into two eyes and correct for HMD lenses
    #[arg(long)]
    hmd: bool,

    /// Lens model used for HMD correction
    #[arg(long, value_enum, default_value_t = LensModel::Cockpitglasses)]
    lens: LensModel,

    /// Interpupillary distance in millimetres
    #[arg(long, default_value_t = 63.0)]
    ipd: f32,

    /// Hide the HUD overlay
    #[arg(long)]
    no_hud: bool,

    /// Offset the picture by the viewer's head attitude
    #[arg(long)]
    head_tracking: bool,

    /// Test pattern width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Test pattern height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Test pattern frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Log filter, env_logger syntax (overrides RUST_LOG)
    #[arg(long)]
    log: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LensModel {
    /// Lens centered in each eye, no distortion
    None,
    Cockpitglasses,
}

impl From<LensModel> for HmdModel {
    fn from(model: LensModel) -> Self {
        match model {
            LensModel::None => HmdModel::Unknown,
            LensModel::Cockpitglasses => HmdModel::Cockpitglasses,
        }
    }
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.hmd.model = self.lens.into();
        settings.hmd.ipd_mm = self.ipd;
        settings
    }

    fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            initial_size: LogicalSize::new(f64::from(self.width), f64::from(self.height)),
            hud: !self.no_hud,
            hmd_correction: self.hmd,
            head_tracking: self.head_tracking,
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..Default::default()
    });

    let settings = Arc::new(SettingsStore::new(cli.settings()));

    let stream = StreamDescriptor::new(1, ElementaryStreamType::H264);
    stream.enable_decoder(&PatternSource::new(cli.width, cli.height, cli.fps))?;

    Runtime::run(cli.viewer_config(), GpuInit::default(), settings, stream)
}
