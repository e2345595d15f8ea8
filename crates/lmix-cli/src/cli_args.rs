use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use lmix_core::billing::BillingInterval;
use lmix_core::config::RuntimeOverrides;
use lmix_core::renderer::RenderMode;
use lmix_core::selection::{LoudnessTarget, Preset, ProcessingMode, UserTier};

/// Top-level CLI entrypoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "lmix", version, about = "LevelMix audio normalization client", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every subcommand.
#[derive(Debug, Clone, Args, Default)]
pub struct GlobalArgs {
    /// Server base URL (overrides config and LEVELMIX_BASE_URL).
    #[arg(long = "base-url", global = true, value_hint = ValueHint::Url)]
    pub base_url: Option<String>,

    /// Status poll interval in milliseconds.
    #[arg(long = "poll-interval-ms", global = true, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Account tier (0 = free, 2 = premium, 3 = professional).
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub tier: Option<u8>,
}

impl GlobalArgs {
    /// Returns true when no overrides were provided.
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none() && self.poll_interval_ms.is_none() && self.tier.is_none()
    }

    pub fn to_runtime_overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            base_url: self.base_url.clone(),
            poll_interval_ms: self.poll_interval_ms,
            tier: self.tier.map(UserTier),
            ..RuntimeOverrides::default()
        }
    }
}

/// Supported subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Upload a file and follow its processing until it finishes.
    Upload(UploadArgs),
    /// Show the status of a job.
    Status(StatusArgs),
    /// Track several jobs at once until they all finish.
    Watch(WatchArgs),
    /// Retry a failed job and follow it.
    Retry(JobArgs),
    /// Cancel a job that is still processing.
    Cancel(JobArgs),
    /// Download the processed file of a completed job.
    #[command(alias = "dl")]
    Download(DownloadArgs),
    /// List loudness presets.
    Presets,
    /// Subscription management.
    #[command(subcommand)]
    Billing(BillingCommand),
    /// Inspect or create the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Args)]
pub struct UploadArgs {
    /// Audio file to normalize.
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: String,

    /// Loudness preset (dj, streaming, podcast, broadcast, custom).
    #[arg(long, value_name = "PRESET")]
    pub preset: Option<String>,

    /// Processing mode (fast or precise).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<String>,

    /// Custom integrated loudness target in LUFS (-30 to -2). Implies --preset custom.
    #[arg(long, value_name = "LUFS", allow_hyphen_values = true)]
    pub lufs: Option<String>,

    /// Show progress without easing.
    #[arg(long, action = ArgAction::SetTrue)]
    pub direct: bool,
}

/// Resolved upload flags.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadChoice {
    pub preset: Option<Preset>,
    pub mode: Option<ProcessingMode>,
    pub custom_target: Option<LoudnessTarget>,
    pub render_mode: Option<RenderMode>,
}

impl UploadArgs {
    /// Parse preset/mode/LUFS flags. Validation errors carry user-facing text.
    pub fn resolve(&self) -> Result<UploadChoice, String> {
        let mut preset = self
            .preset
            .as_deref()
            .map(str::parse::<Preset>)
            .transpose()
            .map_err(|err| err.to_string())?;
        let mode = self
            .mode
            .as_deref()
            .map(str::parse::<ProcessingMode>)
            .transpose()
            .map_err(|err| err.to_string())?;
        let custom_target = self
            .lufs
            .as_deref()
            .map(str::parse::<LoudnessTarget>)
            .transpose()
            .map_err(|err| err.to_string())?;

        if custom_target.is_some() {
            match preset {
                None | Some(Preset::Custom) => preset = Some(Preset::Custom),
                Some(other) => {
                    return Err(format!(
                        "--lufs can only be combined with the custom preset (got '{other}')."
                    ));
                }
            }
        } else if preset == Some(Preset::Custom) {
            return Err("The custom preset requires --lufs <VALUE>.".into());
        }

        Ok(UploadChoice {
            preset,
            mode,
            custom_target,
            render_mode: self.direct.then_some(RenderMode::Direct),
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    pub id: String,

    /// Keep polling until the job reaches a terminal status.
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub watch: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct JobArgs {
    pub id: String,
}

#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    pub id: String,

    /// Output file or directory (defaults to the current directory).
    #[arg(short, long, value_hint = ValueHint::AnyPath)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum BillingCommand {
    /// Print (or open) the subscription management portal.
    Portal {
        #[arg(long, action = ArgAction::SetTrue)]
        open: bool,
    },
    /// Start a checkout for a plan.
    Checkout {
        #[arg(long, value_name = "PLAN")]
        plan: String,
        #[arg(long, value_name = "INTERVAL", default_value = "monthly", value_parser = parse_interval)]
        interval: BillingInterval,
        #[arg(long, action = ArgAction::SetTrue)]
        open: bool,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show,
    /// Print the configuration file location.
    Path,
    /// Write a default configuration file if none exists.
    Init {
        /// Overwrite an existing file.
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
}

fn parse_interval(value: &str) -> Result<BillingInterval, String> {
    value.parse()
}
