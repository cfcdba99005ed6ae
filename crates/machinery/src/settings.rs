//! Runtime settings of the machine daemon.
//!
//! The best way to build settings is [`Settings::default_settings`] or, with
//! the "cli" feature, [`Settings::new_from_flags`].

use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

use crate::config::{RuntimeMode, ValidationOptions};
use crate::constants;

const DEFAULT_STATE_DIR: &str = "/system/state";
const DEFAULT_DEV_ROOT: &str = "/dev";

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format {:?}", other),
        }
    }
}

/// Settings the daemon runs with.
///
/// This can be filled in by hand or, when exposing a CLI, with
/// [`Settings::new_from_flags`] (requires the "cli" feature).
#[derive(Clone, Debug)]
pub struct Settings {
    /// Where the machine runs
    pub mode: RuntimeMode,
    /// Promote validation warnings to errors
    pub strict: bool,
    /// Skip validation that needs the local hardware
    pub local: bool,
    /// Directory the rendered state lives in
    pub state_dir: PathBuf,
    /// Base directory of the CRI registry hosts tree
    pub cri_hosts_dir: PathBuf,
    /// Device root under which `disk/by-id` links are managed
    pub dev_root: PathBuf,
    /// Hostname used until the config sets one
    pub hostname: String,
    /// Lifetime of the admin kubeconfig certificate
    pub admin_kubeconfig_lifetime: Duration,
    /// Log output format
    pub log_format: LogFormat,
}

impl Settings {
    /// Settings with every default filled in.
    pub fn default_settings() -> anyhow::Result<Self> {
        Ok(Settings {
            mode: RuntimeMode::default(),
            strict: false,
            local: false,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            cri_hosts_dir: PathBuf::from(constants::CRI_REGISTRY_HOSTS_PATH),
            dev_root: PathBuf::from(DEFAULT_DEV_ROOT),
            hostname: default_hostname()?,
            admin_kubeconfig_lifetime: constants::ADMIN_CERT_DEFAULT_LIFETIME,
            log_format: LogFormat::Text,
        })
    }

    /// Validation options matching these settings.
    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            strict: self.strict,
            local: self.local,
            ..Default::default()
        }
    }

    /// Builds settings from parsed options, defaulting what is unset.
    #[cfg(any(feature = "cli", feature = "docs"))]
    #[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
    pub fn from_opts(opts: Opts) -> anyhow::Result<Self> {
        let hostname = match opts.hostname {
            Some(hostname) => hostname,
            None => default_hostname()?,
        };
        Ok(Settings {
            mode: opts.mode,
            strict: opts.strict,
            local: opts.local,
            state_dir: opts.state_dir,
            cri_hosts_dir: opts.cri_hosts_dir,
            dev_root: opts.dev_root,
            hostname,
            admin_kubeconfig_lifetime: Duration::from_secs(opts.admin_kubeconfig_lifetime_hours * 3600),
            log_format: opts.log_format,
        })
    }

    /// Parses all command line flags and sets the proper defaults. The
    /// version of your application is passed for the `--version` flag.
    #[cfg(any(feature = "cli", feature = "docs"))]
    #[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
    pub fn new_from_flags(version: &str) -> anyhow::Result<Self> {
        let app = Opts::clap().version(version);
        let opts = Opts::from_clap(&app.get_matches());
        Self::from_opts(opts)
    }
}

/// CLI options that configure the daemon.
///
/// They can be flattened into a larger command with `#[structopt(flatten)]`.
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
#[structopt(name = "machined", about = "Declarative machine configuration daemon")]
pub struct Opts {
    #[structopt(
        long = "mode",
        default_value = "metal",
        env = "MACHINED_MODE",
        help = "Runtime mode: metal, container or cloud"
    )]
    mode: RuntimeMode,

    #[structopt(
        long = "strict",
        help = "Treat validation warnings as errors"
    )]
    strict: bool,

    #[structopt(
        long = "local",
        help = "Skip validation checks that need the local hardware"
    )]
    local: bool,

    #[structopt(
        long = "state-dir",
        default_value = DEFAULT_STATE_DIR,
        env = "MACHINED_STATE_DIR",
        help = "Directory the rendered state is written to"
    )]
    state_dir: PathBuf,

    #[structopt(
        long = "cri-hosts-dir",
        default_value = constants::CRI_REGISTRY_HOSTS_PATH,
        env = "MACHINED_CRI_HOSTS_DIR",
        help = "Base directory of the CRI registry hosts tree"
    )]
    cri_hosts_dir: PathBuf,

    #[structopt(
        long = "dev-root",
        default_value = DEFAULT_DEV_ROOT,
        env = "MACHINED_DEV_ROOT",
        help = "Device root for persistent disk links"
    )]
    dev_root: PathBuf,

    #[structopt(
        long = "hostname",
        env = "MACHINED_HOSTNAME",
        help = "Hostname used until the config sets one, defaults to the hostname of this machine"
    )]
    hostname: Option<String>,

    #[structopt(
        long = "admin-kubeconfig-lifetime-hours",
        default_value = "8760",
        env = "MACHINED_ADMIN_KUBECONFIG_LIFETIME_HOURS",
        help = "Lifetime of the admin kubeconfig certificate in hours"
    )]
    admin_kubeconfig_lifetime_hours: u64,

    #[structopt(
        long = "log-format",
        default_value = "text",
        env = "MACHINED_LOG_FORMAT",
        help = "Log format: text or json"
    )]
    log_format: LogFormat,
}

fn default_hostname() -> anyhow::Result<String> {
    hostname::get()?
        .into_string()
        .map_err(|_| anyhow::anyhow!("invalid utf-8 hostname string"))
}
