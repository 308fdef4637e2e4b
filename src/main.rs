//! Application entry point: a terminal interview room.
//!
//! # Startup sequence
//!
//! 1. Parse arguments.
//! 2. Initialise logging.
//! 3. Load [`AppConfig`] from disk (returns default on first run).
//! 4. Create the [`tokio`] runtime.
//! 5. Build the HTTP service and the headless platform.
//! 6. Validate the link and show the welcome summary.
//! 7. Read stdin lines until the interview completes or the user quits.
//!
//! Lines starting with `/` are commands (`/end`, `/voice`, `/status`);
//! anything else is sent to the interviewer.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use interview_room::{
    config::{AppConfig, VoiceConfig},
    platform::TerminalPlatform,
    room::{format_clock, InterviewRoom, RoomDeps, RoomStage, Urgency},
    service::{
        AccessValidator, HttpInterviewService, InterviewService, SessionCredentials,
        SessionDescriptor,
    },
    session::{Role, SessionSnapshot},
    voice::SpeechRecognizer,
};

#[derive(Debug, Parser)]
#[command(name = "interview-room", version, about = "Join a live interview from the terminal")]
struct Args {
    /// Interview identifier from the invitation link.
    #[arg(long)]
    interview_id: String,

    /// Access token from the invitation link.
    #[arg(long)]
    token: String,

    /// Alternative settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `service.base_url`.
    #[arg(long)]
    base_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_welcome(descriptor: &SessionDescriptor) {
    let kind = descriptor.kind.map(|k| k.label()).unwrap_or("General");
    println!();
    println!("  {kind} interview");
    match &descriptor.candidate.title {
        Some(title) => println!("  {} ({title})", descriptor.candidate.name),
        None => println!("  {}", descriptor.candidate.name),
    }
    println!("  About {} minutes", descriptor.estimated_minutes);
    println!();
    println!("  Commands: /end to finish, /voice to toggle dictation, /status");
    println!("  Press Enter to begin.");
}

fn print_status(room: &InterviewRoom) {
    let snap = room.snapshot();
    println!("  stage:      {}", snap.stage.label());
    if let Some(time) = snap.time {
        println!(
            "  time:       {} elapsed, {} left",
            format_clock(time.elapsed),
            format_clock(time.remaining)
        );
    }
    println!("  questions:  {}", snap.session.questions_asked);
    println!("  tab switches: {}", snap.proctor.tab_switches);
    println!("  flagged events: {}", snap.proctor.event_count);
    if snap.voice.is_listening {
        println!("  dictation:  on");
    }
}

/// Print interviewer tokens as they arrive.
fn spawn_renderer(mut rx: watch::Receiver<SessionSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shown = 0usize;
        let mut streaming = false;

        while rx.changed().await.is_ok() {
            let snap = rx.borrow_and_update().clone();
            let mut out = std::io::stdout().lock();

            if snap.is_streaming {
                if !streaming {
                    streaming = true;
                    shown = 0;
                    let _ = write!(out, "\ninterviewer> ");
                }
                if let Some(delta) = snap.streaming_text.get(shown..) {
                    let _ = write!(out, "{delta}");
                    shown = snap.streaming_text.len();
                }
                let _ = out.flush();
                continue;
            }

            if streaming {
                streaming = false;
                let rest = snap
                    .messages
                    .last()
                    .filter(|m| m.role == Role::Interviewer)
                    .and_then(|m| m.content.get(shown..))
                    .unwrap_or_default();
                let _ = writeln!(out, "{rest}");
                if let Some(error) = &snap.error {
                    let _ = writeln!(out, "! {error}");
                }
                let _ = out.flush();
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Dictation
// ---------------------------------------------------------------------------

#[cfg(feature = "local-voice")]
fn speech_recognizer(voice: &VoiceConfig) -> Option<Arc<dyn SpeechRecognizer>> {
    let model = voice.model.as_deref()?;
    match interview_room::voice::LocalRecognizer::load(model) {
        Ok(recognizer) => Some(Arc::new(recognizer) as Arc<dyn SpeechRecognizer>),
        Err(e) => {
            log::warn!("Dictation disabled: {e}");
            None
        }
    }
}

#[cfg(not(feature = "local-voice"))]
fn speech_recognizer(voice: &VoiceConfig) -> Option<Arc<dyn SpeechRecognizer>> {
    if voice.model.is_some() {
        log::warn!("voice.model is set but this build has no local-voice support");
    }
    None
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

async fn run(args: Args, config: AppConfig) -> anyhow::Result<()> {
    let service = Arc::new(HttpInterviewService::from_config(&config.service));
    let platform = TerminalPlatform::new();
    let deps = RoomDeps {
        validator: Arc::clone(&service) as Arc<dyn AccessValidator>,
        service: service as Arc<dyn InterviewService>,
        capabilities: platform.capabilities(),
        recognizer: speech_recognizer(&config.voice),
    };

    let room = InterviewRoom::new(
        SessionCredentials::new(args.interview_id, args.token),
        config,
        deps,
    );

    room.bootstrap().await;
    if let Some(error) = room.error() {
        anyhow::bail!("{error}");
    }

    let snap = room.snapshot();
    match snap.stage {
        RoomStage::Complete => {
            println!("This interview has already been completed. Thank you.");
            return Ok(());
        }
        RoomStage::Active => {
            println!("Resuming your interview.");
            for message in &snap.session.messages {
                let who = match message.role {
                    Role::Interviewer => "interviewer",
                    Role::Candidate => "you",
                };
                println!("{who}> {}", message.content);
            }
        }
        _ => {
            if let Some(descriptor) = &snap.descriptor {
                print_welcome(descriptor);
            }
        }
    }

    let renderer = spawn_renderer(room.session().subscribe());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut urgency = Urgency::Normal;
    let mut warned_quit = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                handle_line(&room, line.trim()).await;
            }

            _ = tokio::signal::ctrl_c() => {
                if platform.unload_blocked() && !warned_quit {
                    warned_quit = true;
                    eprintln!("Leaving now abandons the interview. Type /end to finish, or press Ctrl-C again to quit.");
                    continue;
                }
                break;
            }

            _ = tick.tick() => {
                let snap = room.snapshot();
                if snap.stage == RoomStage::Complete {
                    println!("\nThe interview is complete. Thank you for your time.");
                    break;
                }
                if let Some(time) = snap.time {
                    if time.urgency != urgency {
                        urgency = time.urgency;
                        if urgency != Urgency::Normal {
                            println!("\n[{} remaining]", format_clock(time.remaining));
                        }
                    }
                }
            }
        }
    }

    room.shutdown().await;
    renderer.abort();
    Ok(())
}

async fn handle_line(room: &InterviewRoom, line: &str) {
    let snap = room.snapshot();

    if snap.show_end_confirm {
        if line.eq_ignore_ascii_case("y") || line.eq_ignore_ascii_case("yes") {
            println!("Submitting your interview...");
            room.confirm_end().await;
        } else {
            room.cancel_end();
            println!("Continuing.");
        }
        return;
    }

    match (snap.stage, line) {
        (RoomStage::Welcome, _) => {
            if !room.request_webcam().await {
                log::info!("Continuing without a camera");
            }
            room.start().await;
        }
        (_, "/status") => print_status(room),
        (_, "/end") => {
            if room.request_end() {
                println!("End the interview now? [y/N]");
            }
        }
        (_, "/voice") => {
            let voice = room.voice();
            if !voice.is_supported() {
                println!("Dictation is not available here.");
                return;
            }
            if !voice.is_listening() {
                voice.toggle_listening();
                if voice.is_listening() {
                    println!("Listening. Type /voice again to send what you said.");
                }
                return;
            }
            let room = room.clone();
            tokio::spawn(async move {
                let spoken = room.voice().finish().await;
                if spoken.trim().is_empty() {
                    println!("Nothing was heard.");
                    return;
                }
                println!("you> {spoken}");
                if let Err(e) = room.send_message(&spoken).await {
                    eprintln!("! {e}");
                }
            });
        }
        (RoomStage::Active, text) if !text.is_empty() => send(room, text.to_string()),
        _ => {}
    }
}

/// Send without blocking input, so `/end` stays usable while a reply streams.
fn send(room: &InterviewRoom, text: String) {
    let room = room.clone();
    tokio::spawn(async move {
        if let Err(e) = room.send_message(&text).await {
            eprintln!("! {e}");
        }
    });
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("interview-room starting up");

    // 2. Configuration
    let loaded = match &args.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if let Some(base_url) = &args.base_url {
        config.service.base_url = base_url.clone();
    }

    // 3. Runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(args, config))
}
