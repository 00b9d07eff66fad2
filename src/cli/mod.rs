//! # CLI Module
//!
//! Command-line interface for smile capture.
//!
//! ## Usage
//! ```bash
//! # Watch the camera (needs --features camera,haar)
//! smile-capture run
//!
//! # Start in manual mode without automatic email
//! smile-capture run --manual --no-email
//!
//! # Inspect the gallery
//! smile-capture list --output json
//! smile-capture delete 20240501_120000
//! smile-capture send 20240501_120000
//!
//! # Show the effective configuration
//! smile-capture config
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use crossbeam_channel::{bounded, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use smile_capture::config::{self, AppConfig};
use smile_capture::core::backends;
use smile_capture::core::decision::CaptureMode;
use smile_capture::core::dispatch::{DispatchWorker, EmailJob, JobOrigin, SmtpMailer};
use smile_capture::core::gallery::{CaptureId, CaptureRecord, GalleryStore};
use smile_capture::core::pipeline::{CaptureService, LoopStatus, ServiceConfig};
use smile_capture::error::{DispatchError, GalleryError, Result};
use smile_capture::events::{
    CaptureEvent, DeviceEvent, DispatchEvent, Event, EventChannel, EventReceiver, GalleryEvent, SessionEvent,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Smile Capture - Keep the moments you smile
#[derive(Parser, Debug)]
#[command(name = "smile-capture")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to <config dir>/smile-capture/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the camera and capture faces
    Run {
        /// Start in manual mode
        #[arg(long)]
        manual: bool,

        /// Do not email captures automatically
        #[arg(long)]
        no_email: bool,
    },
    /// List captures in the gallery
    List {
        /// Output format
        #[arg(short, long, default_value = "pretty")]
        output: OutputFormat,
    },
    /// Delete a capture
    Delete {
        /// Capture id (YYYYMMDD_HHMMSS)
        id: CaptureId,
    },
    /// Email a capture now
    Send {
        /// Capture id (YYYYMMDD_HHMMSS)
        id: CaptureId,
    },
    /// Print the effective configuration (secrets redacted)
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    smile_capture::init_tracing(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { manual, no_email } => run_capture(&config, manual, no_email),
        Commands::List { output } => run_list(&config, output),
        Commands::Delete { id } => run_delete(&config, &id),
        Commands::Send { id } => run_send(&config, &id),
        Commands::Config => run_config(&config, cli.config.as_deref()),
    }
}

fn open_gallery(config: &AppConfig) -> Result<Arc<GalleryStore>> {
    let gallery = GalleryStore::open(&config.gallery.directory)?.with_jpeg_quality(config.gallery.jpeg_quality);
    let report = gallery.load_existing()?;
    if !report.skipped.is_empty() {
        let term = Term::stderr();
        term.write_line(&format!(
            "{} skipped {} file(s) with unrecognised names",
            style("!").yellow().bold(),
            report.skipped.len()
        ))
        .ok();
    }
    Ok(Arc::new(gallery))
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn run_capture(config: &AppConfig, manual: bool, no_email: bool) -> Result<()> {
    let term = Term::stderr();
    term.write_line(&format!(
        "{} {}",
        style("Smile Capture").bold().cyan(),
        style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
    ))
    .ok();

    let device = backends::open_camera(&config.camera)?;
    let (face, smile) = backends::load_classifiers(&config.detector)?;
    let gallery = open_gallery(config)?;

    let mut service_config = ServiceConfig::from_app_config(config);
    if manual {
        service_config.mode = CaptureMode::Manual;
    }
    if no_email {
        service_config.auto_email = false;
    }

    let (events, receiver) = EventChannel::new();
    let mut builder = CaptureService::builder()
        .device(device)
        .classifiers(face, smile)
        .gallery(gallery)
        .events(events)
        .config(service_config);
    match config.email_settings() {
        Ok(settings) => builder = builder.email(settings),
        Err(e) => {
            term.write_line(&format!("{} {}; captures will not be emailed", style("!").yellow().bold(), e))
                .ok();
        }
    }
    let service = Arc::new(builder.build()?);
    service.start()?;

    let pb = spinner(status_line(&service));
    {
        let pb = pb.clone();
        thread::spawn(move || print_events(&receiver, &pb));
    }

    let (quit_tx, quit_rx) = bounded::<()>(1);
    {
        let quit_tx = quit_tx.clone();
        ctrlc::set_handler(move || {
            let _ = quit_tx.try_send(());
        })
        .map_err(|e| smile_capture::SmileCaptureError::Unsupported(format!("failed to install Ctrl+C handler: {e}")))?;
    }
    {
        let service = service.clone();
        let pb = pb.clone();
        thread::spawn(move || read_commands(&service, &pb, &quit_tx));
    }

    pb.println(format!(
        "  {} m=mode c=capture e=auto-email l=list d <id>=delete s <id>=send r=reconnect q=quit",
        style("Commands:").dim()
    ));

    let _ = quit_rx.recv();
    pb.set_message("Shutting down...");
    service.shutdown();
    pb.finish_and_clear();

    term.write_line(&format!("{} Stopped", style("✓").green().bold())).ok();
    Ok(())
}

fn status_line(service: &CaptureService) -> String {
    let email = if !service.email_configured() {
        "off (not configured)"
    } else if service.auto_email() {
        "on"
    } else {
        "off"
    };
    format!("Watching camera | mode: {} | auto email: {}", service.mode(), email)
}

/// Handle interactive commands until `q` or end of input
fn read_commands(service: &CaptureService, pb: &ProgressBar, quit: &Sender<()>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let argument = parts.next();

        match (command, argument) {
            ("", _) => continue,
            ("q", _) => break,
            ("m", _) => {
                service.toggle_mode();
            }
            ("c", _) => match service.capture_now() {
                Ok(record) => pb.println(format!("  {} captured {}", style("📸").green(), record.id)),
                Err(e) => pb.println(format!("  {} {}", style("✗").red(), e)),
            },
            ("e", _) => service.set_auto_email(!service.auto_email()),
            ("l", _) => {
                for line in gallery_lines(&service.list()) {
                    pb.println(line);
                }
            }
            ("d", Some(id)) => match id.parse::<CaptureId>() {
                Ok(id) => {
                    if let Err(e) = service.delete(&id) {
                        pb.println(format!("  {} {}", style("✗").red(), e));
                    }
                }
                Err(_) => pb.println(format!("  {} not a capture id: {id}", style("✗").red())),
            },
            ("s", Some(id)) => match id.parse::<CaptureId>() {
                Ok(id) => {
                    if let Err(e) = service.send_email(&id) {
                        pb.println(format!("  {} {}", style("✗").red(), e));
                    }
                }
                Err(_) => pb.println(format!("  {} not a capture id: {id}", style("✗").red())),
            },
            ("r", _) => match service.reconnect() {
                Ok(()) => {}
                Err(e) => pb.println(format!("  {} {}", style("✗").red(), e)),
            },
            _ => pb.println(format!("  {} unknown command: {line}", style("?").yellow())),
        }

        if service.status() == LoopStatus::Running {
            pb.set_message(status_line(service));
        }
    }
    let _ = quit.try_send(());
}

fn print_events(receiver: &EventReceiver, pb: &ProgressBar) {
    for event in receiver.iter() {
        match event {
            Event::Capture(CaptureEvent::Saved { id, trigger, .. }) => {
                pb.println(format!("  {} captured {} ({:?})", style("📸").green(), style(id).cyan(), trigger));
            }
            Event::Capture(CaptureEvent::Outcome { id, outcome }) => {
                pb.println(format!("  {} {} {}", style("✓").green(), id, style(outcome).dim()));
            }
            Event::Capture(CaptureEvent::Failed { message, .. }) => {
                pb.println(format!("  {} capture failed: {}", style("✗").red(), message));
            }
            Event::Dispatch(DispatchEvent::Failed { attachment, message }) => {
                pb.println(format!(
                    "  {} email for {} failed: {}",
                    style("✗").red(),
                    file_name(&attachment),
                    message
                ));
            }
            Event::Dispatch(DispatchEvent::Sent { attachment, recipient }) => {
                pb.println(format!("  {} {} sent to {}", style("✉").green(), file_name(&attachment), recipient));
            }
            Event::Dispatch(DispatchEvent::Backpressure { attachment, .. }) => {
                pb.println(format!(
                    "  {} email queue full, {} not sent",
                    style("!").yellow().bold(),
                    file_name(&attachment)
                ));
            }
            Event::Device(DeviceEvent::Disconnected { failures }) => {
                pb.set_message("Camera disconnected - press r to reconnect");
                pb.println(format!(
                    "  {} camera disconnected after {} failed reads",
                    style("✗").red().bold(),
                    failures
                ));
            }
            Event::Device(DeviceEvent::Reconnected) => {
                pb.println(format!("  {} camera reconnected", style("✓").green()));
            }
            Event::Session(SessionEvent::ModeChanged { mode }) => {
                pb.println(format!("  mode: {}", style(mode).yellow()));
            }
            Event::Session(SessionEvent::AutoEmailChanged { enabled }) => {
                pb.println(format!("  auto email: {}", if enabled { "on" } else { "off" }));
            }
            Event::Gallery(GalleryEvent::Deleted { id }) => {
                pb.println(format!("  {} deleted {}", style("🗑").dim(), id));
            }
            _ => {}
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn gallery_lines(records: &[CaptureRecord]) -> Vec<String> {
    if records.is_empty() {
        return vec![format!("  {}", style("No captures yet").dim())];
    }
    records
        .iter()
        .map(|r| format!("  {}  {}  {}", style(r.id).cyan(), r.display_time(), style(r.path.display()).dim()))
        .collect()
}

fn run_list(config: &AppConfig, output: OutputFormat) -> Result<()> {
    let gallery = open_gallery(config)?;
    let records = gallery.list();

    match output {
        OutputFormat::Pretty => {
            let term = Term::stdout();
            term.write_line(&format!(
                "{} ({})",
                style("Captured images").bold().underlined(),
                records.len()
            ))
            .ok();
            for line in gallery_lines(&records) {
                term.write_line(&line).ok();
            }
        }
        OutputFormat::Json => match serde_json::to_string_pretty(&records) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "failed to render gallery"),
        },
    }
    Ok(())
}

fn run_delete(config: &AppConfig, id: &CaptureId) -> Result<()> {
    let gallery = open_gallery(config)?;
    let record = gallery.delete(id)?;
    Term::stderr()
        .write_line(&format!("{} Deleted {}", style("✓").green().bold(), record.path.display()))
        .ok();
    Ok(())
}

fn run_send(config: &AppConfig, id: &CaptureId) -> Result<()> {
    let settings = config.email_settings()?;
    let gallery = open_gallery(config)?;
    let record = gallery.get(id).ok_or_else(|| GalleryError::NotFound { id: id.to_string() })?;

    let (events, receiver) = EventChannel::new();
    let mut worker = DispatchWorker::spawn(1, Arc::new(SmtpMailer::from_settings(&settings)), events)
        .map_err(|e| DispatchError::Transport(format!("failed to start email worker: {e}")))?;
    worker
        .queue()
        .enqueue(EmailJob::for_capture(&settings, &record, JobOrigin::ManualSend, chrono::Local::now()))?;

    let pb = spinner(format!("Sending {} to {}", record.file_name(), settings.recipient));
    let wait = settings.timeout + Duration::from_secs(5);
    let result = loop {
        match receiver.recv_timeout(wait) {
            Some(Event::Dispatch(DispatchEvent::Sent { .. })) => break Ok(()),
            Some(Event::Dispatch(DispatchEvent::Failed { message, .. })) => break Err(DispatchError::Transport(message)),
            Some(_) => continue,
            None => break Err(DispatchError::Transport(format!("no answer after {wait:?}"))),
        }
    };
    pb.finish_and_clear();
    worker.shutdown(Duration::from_secs(1));

    result?;
    Term::stderr()
        .write_line(&format!("{} Sent {} to {}", style("✓").green().bold(), record.file_name(), settings.recipient))
        .ok();
    Ok(())
}

fn run_config(config: &AppConfig, path: Option<&Path>) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config::default_path);
    println!("# {}", path.display());
    print!("{}", config.to_toml_redacted()?);
    Ok(())
}
