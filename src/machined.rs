use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use machinery::config::validation::format_warnings;
use machinery::config::{Container, EncoderOptions};
use machinery::controllers::{self, Options};
use machinery::resources::config::{MachineConfig, ACTIVE_ID};
use machinery::resources::cri::{RegistriesConfig, REGISTRIES_ID};
use machinery::resources::k8s::*;
use machinery::resources::network::{HostnameStatus, NodeAddresses, CURRENT_ADDRESSES_ID, HOSTNAME_ID};
use machinery::resources::secrets::{Kubernetes, KUBERNETES_ID};
use machinery::settings::{LogFormat, Opts};
use machinery::{control_plane, cri, encoding, nodename, protofile, scsi, Settings};
use resource_state::{Context, Resource, ResourceSpec, RunningRuntime, Runtime, State};
use structopt::StructOpt;
use tracing::{info, warn};

const SETTLE_QUIET: Duration = Duration::from_millis(250);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(StructOpt, Debug)]
#[structopt(name = "machined", about = "Declarative machine configuration daemon")]
struct Cli {
    #[structopt(flatten)]
    opts: Opts,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Decodes and validates a machine config
    Validate {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
    /// Prints a machine config with its secrets replaced
    Redact {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
        #[structopt(long = "placeholder", default_value = "******")]
        placeholder: String,
    },
    /// Prints the Kubernetes node name derived from a hostname
    Nodename {
        hostname: String,
        #[structopt(long = "fqdn", help = "Keep the domain part")]
        fqdn: bool,
    },
    /// Prints the XFS prototype file of a directory tree
    Protofile {
        #[structopt(parse(from_os_str))]
        dir: PathBuf,
        #[structopt(long = "uid")]
        uid: Option<u32>,
        #[structopt(long = "gid")]
        gid: Option<u32>,
    },
    /// Runs SCSI INQUIRY against a sg device and prints its identity
    Inquiry {
        #[structopt(parse(from_os_str))]
        device: PathBuf,
    },
    /// Derives every artifact of a machine config into a directory
    Render {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
        #[structopt(long = "out", parse(from_os_str))]
        out: PathBuf,
        #[structopt(long = "address", help = "Node address as ip/prefix, repeatable")]
        addresses: Vec<String>,
    },
    /// Runs the controllers against a machine config until interrupted
    Run {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
        #[structopt(long = "address", help = "Node address as ip/prefix, repeatable")]
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::from_args();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_opts(cli.opts)?;
    init_logging(settings.log_format);

    match cli.command {
        Command::Validate { file } => {
            let container = load(&file, &settings)?;
            println!(
                "{} is valid for {} mode ({} documents)",
                file.display(),
                settings.mode,
                container.documents().len()
            );
            Ok(())
        }
        Command::Redact { file, placeholder } => {
            let container = decode(&file)?;
            let redacted = container.redact(&placeholder).encode(&EncoderOptions::default())?;
            print!("{}", redacted);
            Ok(())
        }
        Command::Nodename { hostname, fqdn } => {
            let status = HostnameStatus::from_fqdn(&hostname);
            println!(
                "{}",
                nodename::from_hostname_parts(&status.hostname, &status.domainname, fqdn)?
            );
            Ok(())
        }
        Command::Protofile { dir, uid, gid } => {
            let options = protofile::Options {
                uid,
                gid,
                ..protofile::Options::from_env()
            };
            print!("{}", protofile::generate(&dir, &options)?);
            Ok(())
        }
        Command::Inquiry { device } => {
            let mut device = scsi::SgDevice::open(&device)?;
            let identity = scsi::inquire(&mut device)?;
            print!("{}", encoding::to_yaml(&identity)?);
            Ok(())
        }
        Command::Render { file, out, addresses } => {
            let container = load(&file, &settings)?;
            let ctx = Context::new();
            let state = State::new();
            let running = start(&ctx, &state, &container, &settings, addresses).await?;
            if !running.settle(SETTLE_QUIET, SETTLE_TIMEOUT).await {
                warn!("controllers did not settle, writing what is there");
            }
            let written = render(&ctx, &state, &settings, &out).await;
            ctx.cancel();
            running.join().await;
            let written = written?;
            info!(files = written, out = %out.display(), "rendered machine artifacts");
            Ok(())
        }
        Command::Run { file, addresses } => {
            let container = load(&file, &settings)?;
            let reaper = match machinery::reaper::Reaper::run() {
                Ok(reaper) => Some(reaper),
                Err(e) => {
                    warn!(error = %e, "running without the process reaper");
                    None
                }
            };

            let ctx = Context::new();
            let state = State::new();
            let running = start(&ctx, &state, &container, &settings, addresses).await?;

            let tls_ctx = ctx.clone();
            let tls_state = state.clone();
            tokio::spawn(async move {
                match machinery::tls::CertificateProvider::bootstrap(&tls_ctx, &tls_state).await {
                    Ok((_, watcher)) => {
                        let _ = watcher.await;
                    }
                    Err(e) => warn!(error = %e, "machine API certificates unavailable"),
                }
            });

            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            ctx.cancel();
            running.join().await;
            if let Some(reaper) = reaper {
                reaper.shutdown().await;
            }
            Ok(())
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn decode(file: &Path) -> anyhow::Result<Container> {
    let raw = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    Container::from_bytes(&raw).with_context(|| format!("failed to decode {}", file.display()))
}

/// Decodes and validates `file`, printing warnings to stderr.
fn load(file: &Path, settings: &Settings) -> anyhow::Result<Container> {
    let container = decode(file)?;
    match container.validate(settings.mode, &settings.validation_options()) {
        Ok(warnings) => {
            eprint!("{}", format_warnings(&warnings));
            Ok(container)
        }
        Err(e) => {
            eprint!("{}", format_warnings(&e.warnings));
            Err(anyhow::Error::new(e).context(format!("{} is invalid", file.display())))
        }
    }
}

async fn start(
    ctx: &Context,
    state: &State,
    container: &Container,
    settings: &Settings,
    addresses: Vec<String>,
) -> anyhow::Result<RunningRuntime> {
    let machine_config = MachineConfig::new(container)?;
    let hostname = machine_config
        .v1alpha1()?
        .map(|config| config.machine().network().hostname)
        .filter(|hostname| !hostname.is_empty())
        .unwrap_or_else(|| settings.hostname.clone());

    state.create(ctx, Resource::new(ACTIVE_ID, machine_config)).await?;
    state
        .create(ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn(&hostname)))
        .await?;
    state
        .create(ctx, Resource::new(CURRENT_ADDRESSES_ID, NodeAddresses { addresses }))
        .await?;

    let mut runtime = Runtime::new(state.clone());
    controllers::register_all(&mut runtime, &Options::from(settings))?;
    Ok(runtime.start(ctx))
}

/// Writes every derived artifact under `out`. Returns the number of files
/// written.
async fn render(ctx: &Context, state: &State, settings: &Settings, out: &Path) -> anyhow::Result<usize> {
    let mut files = Files::new(out);

    if let Some(kubelet) = present::<KubeletSpec>(ctx, state, KUBELET_ID).await? {
        files.write("kubelet/args", kubelet.spec().args.join("\n") + "\n")?;
        files.write("kubelet/kubelet.yaml", encoding::to_yaml(&kubelet.spec().config)?)?;
    }

    for pod in state.list::<StaticPod>(ctx).await? {
        report(&pod);
        files.write(
            &format!("manifests/{}.yaml", pod.metadata().id()),
            encoding::to_yaml(&pod.spec().pod)?,
        )?;
    }

    if let Some(cfg) = present::<AdmissionControlConfig>(ctx, state, ADMISSION_CONTROL_ID).await? {
        files.write(
            &format!("config/{}", control_plane::ADMISSION_CONTROL_FILE),
            control_plane::admission_control_file(cfg.spec())?,
        )?;
    }
    if let Some(cfg) = present::<AuditPolicyConfig>(ctx, state, AUDIT_POLICY_ID).await? {
        files.write(
            &format!("config/{}", control_plane::AUDIT_POLICY_FILE),
            control_plane::audit_policy_file(cfg.spec())?,
        )?;
    }
    if let Some(cfg) = present::<AuthorizationConfig>(ctx, state, AUTHORIZATION_ID).await? {
        files.write(
            &format!("config/{}", control_plane::AUTHORIZATION_FILE),
            control_plane::authorization_file(cfg.spec())?,
        )?;
    }
    if let Some(cfg) = present::<SchedulerConfig>(ctx, state, SCHEDULER_ID).await? {
        files.write(
            &format!("config/{}", control_plane::SCHEDULER_CONFIG_FILE),
            control_plane::scheduler_config_file(cfg.spec())?,
        )?;
    }

    for manifest in state.list::<Manifest>(ctx).await? {
        files.write(
            &format!("bootstrap/{}.yaml", manifest.metadata().id()),
            manifest.spec().to_yaml_stream(),
        )?;
    }

    if let Some(secrets) = present::<Kubernetes>(ctx, state, KUBERNETES_ID).await? {
        files.write("secrets/admin.kubeconfig", secrets.spec().admin_kubeconfig.clone())?;
        files.write("secrets/encryptionconfig.yaml", secrets.spec().encryption_config.clone())?;
    }

    if let Some(registries) = present::<RegistriesConfig>(ctx, state, REGISTRIES_ID).await? {
        let hosts_path = settings.cri_hosts_dir.to_string_lossy();
        let hosts = cri::generate_hosts(registries.spec(), &hosts_path)?;
        hosts.write(&out.join("cri/hosts")).await?;
        files.count += hosts.directories.values().map(|d| d.files.len()).sum::<usize>();
        files.write(
            &format!("cri/{}", machinery::constants::CRI_REGISTRY_CONFIG_PART),
            cri::registry_plugin_config(registries.spec(), &hosts_path)?,
        )?;
    }

    Ok(files.count)
}

/// The resource `id`, reporting its error if it has one.
async fn present<S: ResourceSpec>(ctx: &Context, state: &State, id: &str) -> anyhow::Result<Option<Resource<S>>> {
    let resource = state.try_get::<S>(ctx, id).await?;
    if let Some(resource) = resource.as_ref() {
        report(resource);
    }
    Ok(resource)
}

fn report<S: ResourceSpec>(resource: &Resource<S>) {
    if let Some(error) = resource.metadata().error() {
        eprintln!("warning: {}: {}", resource.metadata(), error);
    }
}

struct Files<'a> {
    root: &'a Path,
    count: usize,
}

impl<'a> Files<'a> {
    fn new(root: &'a Path) -> Self {
        Files { root, count: 0 }
    }

    fn write(&mut self, name: &str, contents: String) -> anyhow::Result<()> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
        self.count += 1;
        Ok(())
    }
}
