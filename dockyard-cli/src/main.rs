mod backend;
mod keyboard;
mod printer;

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dockyard_core::api::{BuildOptions, CreateOptions, StartOptions, UpOptions};
use dockyard_core::controller::{
    ControllerHandle, InteractiveController, SystemLauncher, TerminalViewport,
};
use dockyard_core::debug::{DebugAttacher, DebugOverrides, DebugRequest};
use dockyard_core::error::{Error, Result};
use dockyard_core::project::Project;
use dockyard_core::session::{Attachment, Menu, SessionOrchestrator};
use dockyard_core::settings::Settings;
use dockyard_core::signal::{SignalGate, spawn_os_listener};

use backend::ComposeCliBackend;
use keyboard::{KEY_BUFFER, KeyboardReader};
use printer::{Console, ConsolePrinter};

const LOG_ENV: &str = "DOCKYARD_LOG";

#[derive(Parser)]
#[command(name = "dockyard")]
#[command(about = "Start multi-service projects and stay attached", long_about = None)]
struct Cli {
    /// Project file(s)
    #[arg(short = 'f', long = "file", global = true)]
    files: Vec<PathBuf>,

    #[arg(short = 'p', long = "project-name", global = true)]
    project_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start services, then follow their output
    Up(UpArgs),
    /// Attach a debug shell to a service container
    Debug(DebugArgs),
}

#[derive(Args, Debug)]
struct UpArgs {
    services: Vec<String>,

    #[arg(short, long)]
    detach: bool,

    /// Rebuild and refresh services when their files change
    #[arg(short, long)]
    watch: bool,

    #[arg(long)]
    abort_on_container_exit: bool,

    #[arg(long, value_name = "SERVICE")]
    exit_code_from: Option<String>,

    #[arg(long)]
    no_build: bool,

    #[arg(long)]
    remove_orphans: bool,

    /// Show the navigation menu
    #[arg(long, overrides_with = "no_menu")]
    menu: bool,

    #[arg(long, overrides_with = "menu")]
    no_menu: bool,
}

impl UpArgs {
    fn menu_preference(&self, settings: &Settings) -> bool {
        if self.menu {
            true
        } else if self.no_menu {
            false
        } else {
            settings.menu.unwrap_or(true)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.detach && (self.abort_on_container_exit || self.exit_code_from.is_some()) {
            return Err(Error::Config(
                "--detach cannot be combined with --abort-on-container-exit or --exit-code-from"
                    .into(),
            ));
        }
        if self.detach && self.watch {
            return Err(Error::Config("--detach cannot be combined with --watch".into()));
        }
        Ok(())
    }

    fn options(&self, services: Vec<String>) -> UpOptions {
        let attach = (!self.detach).then(|| services.clone());
        UpOptions {
            create: CreateOptions {
                services: services.clone(),
                build: (!self.no_build).then(BuildOptions::default),
                remove_orphans: self.remove_orphans,
            },
            start: StartOptions {
                services,
                attach,
                cascade_stop: self.abort_on_container_exit || self.exit_code_from.is_some(),
                exit_code_from: self.exit_code_from.clone(),
                watch: self.watch,
            },
        }
    }
}

#[derive(Args, Debug)]
struct DebugArgs {
    service: String,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    shell: Option<String>,

    #[arg(long)]
    command: Option<String>,

    /// Replica index
    #[arg(long, default_value_t = 1)]
    index: u32,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::from_env();
    debug!(?settings, "settings loaded");

    let result = match &cli.command {
        Commands::Up(args) => run_up(&cli, args, &settings).await,
        Commands::Debug(args) => run_debug(&cli, args, &settings).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let message = err.to_string();
            if !message.is_empty() {
                eprintln!("Error: {message}");
            }
            ExitCode::from(exit_byte(err.exit_code()))
        }
    }
}

/// Process status for a failed run; never 0
fn exit_byte(code: i32) -> u8 {
    match u8::try_from(code) {
        Ok(0) | Err(_) => 1,
        Ok(code) => code,
    }
}

/// Load the project from `-f` files or by discovery. Later files add or
/// replace services of earlier ones.
fn load_project(cli: &Cli) -> Result<Project> {
    let files = if cli.files.is_empty() {
        let cwd = std::env::current_dir()?;
        vec![Project::discover(&cwd)?]
    } else {
        cli.files.clone()
    };

    let mut project = Project::load(&files[0], cli.project_name.as_deref())?;
    for extra in &files[1..] {
        let overlay = Project::load(extra, Some(&project.name))?;
        project.services.extend(overlay.services);
        project.config_files.push(extra.clone());
    }
    debug!(project = %project.name, files = ?project.config_files, "project loaded");
    Ok(project)
}

async fn run_up(cli: &Cli, args: &UpArgs, settings: &Settings) -> Result<()> {
    args.validate()?;
    let project = Arc::new(load_project(cli)?);
    let services = project.select_services(&args.services)?;
    if let Some(service) = &args.exit_code_from {
        project.service(service)?;
    }
    let options = args.options(services.clone());

    let backend = Arc::new(ComposeCliBackend::new(settings.docker_bin.clone()));
    let orchestrator = SessionOrchestrator::new(backend);
    let parent = CancellationToken::new();

    if args.detach {
        return orchestrator.up(parent, project, options, None).await;
    }

    let (signals, sender) = SignalGate::new(parent.clone());
    let os_listener = spawn_os_listener(sender.clone());

    let interactive =
        args.menu_preference(settings) && io::stdout().is_terminal() && io::stdin().is_terminal();
    let (printer, menu, keyboard) = if interactive {
        let (controller, events) = InteractiveController::new(
            Box::new(io::stdout()),
            Box::new(TerminalViewport),
            sender,
            project.name.clone(),
        );
        let controller = if settings.desktop {
            controller.with_gui(Arc::new(SystemLauncher))
        } else {
            controller
        };
        let controller = ControllerHandle::new(controller);
        let (keys_tx, keys) = mpsc::channel(KEY_BUFFER);
        let keyboard = KeyboardReader::spawn(keys_tx)?;
        let printer = ConsolePrinter::new(Console::Footer(controller.clone()), &services);
        let menu = Menu {
            controller,
            events,
            keys,
        };
        (printer, Some(menu), Some(keyboard))
    } else {
        (ConsolePrinter::new(Console::Plain, &services), None, None)
    };

    let attachment = Attachment {
        printer: Arc::new(printer),
        menu,
        signals,
    };
    let result = orchestrator
        .up(parent, project, options, Some(attachment))
        .await;

    // Restores the terminal before anything else is printed
    drop(keyboard);
    os_listener.abort();
    result
}

async fn run_debug(cli: &Cli, args: &DebugArgs, settings: &Settings) -> Result<()> {
    let project = load_project(cli)?;
    let request = DebugRequest {
        service: args.service.clone(),
        index: args.index,
        overrides: DebugOverrides {
            host: args.host.clone(),
            shell: args.shell.clone(),
            command: args.command.clone(),
        },
    };
    DebugAttacher::new(settings.attach_tool.clone())
        .attach(&project, &request, None)
        .await
}
