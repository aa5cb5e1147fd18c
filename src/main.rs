//! HumanSign CLI
//!
//! Replays captured input events, classifies how the text was produced and
//! signs a typing report.

use clap::{Parser, Subcommand};
use humansign_agent::{
    collector::RawEvent,
    config::Config,
    core::{detect_anomalies, risk_score, ClassificationResult, NoModel, ReportBuilder, SignedReport},
    session::{BatchSink, CaptureContext, SessionError, SnapshotStore, SpoolSink},
    signing::{decode_public_key, verify_report, verify_report_with_key, ContentStatus, KeyStore, ReportSigner, SignatureStatus},
    transparency::{create_shared_log_with_persistence, SharedTransparencyLog},
    VERSION,
};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[cfg(feature = "gateway")]
use humansign_agent::{BlockingGatewayClient, GatewayConfig};

#[derive(Parser)]
#[command(name = "humansign")]
#[command(author = "HumanSign")]
#[command(version = VERSION)]
#[command(about = "Keystroke-dynamics verification with signed typing reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines raw event log and produce a signed report
    Record {
        /// Raw events, one JSON object per line
        events: PathBuf,

        /// Site or document the text was written for
        #[arg(long, default_value = "local")]
        domain: String,

        /// The final text the events produced
        #[arg(long)]
        text: Option<PathBuf>,

        /// Where to write the signed report
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Flush batches to a remote aggregate (requires gateway feature)
        #[arg(long)]
        remote: bool,

        /// Remote aggregate URL (overrides the config file)
        #[arg(long)]
        gateway_url: Option<String>,

        /// Bearer token for the remote aggregate
        #[arg(long)]
        gateway_token: Option<String>,

        /// Snapshot the session after replay instead of finishing it
        #[arg(long)]
        suspend: bool,

        /// Continue a suspended session
        #[arg(long)]
        resume: Option<Uuid>,
    },

    /// Verify a signed report and optionally the text that came with it
    Verify {
        report: PathBuf,

        /// Companion text file to check against the content hash
        #[arg(long)]
        text: Option<PathBuf>,

        /// Expected public key (base64 SEC1) instead of the embedded one
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Generate the signing key pair
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Show keys, suspended sessions and statistics
    Status,

    /// Show configuration
    Config,

    /// Serve the session aggregate over HTTP (requires server feature)
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            events,
            domain,
            text,
            output,
            remote,
            gateway_url,
            gateway_token,
            suspend,
            resume,
        } => {
            let options = RecordOptions {
                events,
                domain,
                text,
                output,
                remote,
                gateway_url,
                gateway_token,
                suspend,
                resume,
            };
            if let Err(e) = cmd_record(options) {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::Verify {
            report,
            text,
            public_key,
        } => {
            cmd_verify(&report, text.as_deref(), public_key.as_deref());
        }
        Commands::Keygen { force } => {
            cmd_keygen(force);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
        Commands::Serve { port } => {
            cmd_serve(port);
        }
    }
}

struct RecordOptions {
    events: PathBuf,
    domain: String,
    text: Option<PathBuf>,
    output: Option<PathBuf>,
    remote: bool,
    gateway_url: Option<String>,
    gateway_token: Option<String>,
    suspend: bool,
    resume: Option<Uuid>,
}

fn cmd_record(options: RecordOptions) -> anyhow::Result<()> {
    println!("HumanSign Agent v{VERSION}");
    println!();

    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let transparency_log = create_shared_log_with_persistence(config.transparency_path());
    let store = SnapshotStore::new(config.snapshot_dir());

    let mut context = CaptureContext::new(config.pipeline()).with_transparency(transparency_log.clone());
    let raws = read_events(&options.events)?;
    let first_ts = raws.first().map(RawEvent::timestamp).unwrap_or(0.0);

    let session_id = match options.resume {
        Some(id) => {
            context.resume(&store, id)?;
            println!("Resumed session {id}");
            id
        }
        None => context.start_session(&options.domain, first_ts)?,
    };
    println!("Session: {session_id}");

    let mut sink = open_sink(&config, &options, session_id)?;

    // Ctrl+C stops the replay and snapshots the session.
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let mut last_ts = first_ts;
    let mut interrupted = false;
    for raw in raws {
        if !running.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        last_ts = last_ts.max(raw.timestamp());
        let tap = context.tap(raw.source);
        if let Err(e) = tap.send(raw.payload) {
            tracing::warn!("event not queued: {e}");
        }
        context.pump(sink.as_mut(), last_ts)?;
    }

    if options.suspend || interrupted {
        let id = context.suspend(&store)?;
        save_stats(&transparency_log);
        println!("Session {id} suspended to {}", store.path_for(id).display());
        println!("Continue with: humansign record <events> --resume {id}");
        return Ok(());
    }

    if let Err(e) = context.stop(sink.as_mut(), last_ts + 1.0) {
        // Keep the unshipped events rather than dropping them.
        if let Ok(id) = context.suspend(&store) {
            eprintln!("Final flush failed; session {id} suspended for retry");
        }
        save_stats(&transparency_log);
        return Err(e.into());
    }

    let mut aggregate = context
        .take()
        .ok_or(SessionError::NoActiveSession)?;
    let result = classify(&config, &options, &mut aggregate);

    let text = match &options.text {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            eprintln!("Warning: no --text given; signing an empty text");
            String::new()
        }
    };

    let identity = KeyStore::new(config.key_dir()).load_or_generate()?;
    let features = aggregate.features();
    let report = ReportBuilder::new().build(session_id, &features, aggregate.ledger(), &result, &text);
    let signed = ReportSigner::new(identity).sign(report)?;
    transparency_log.record_report_signed();

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| config.export_path.join(format!("{session_id}.json")));
    write_report(&signed, &text, &output)?;

    let anomalies = detect_anomalies(&features.model_features(&config.features), &features.burst);
    print_result(&result, aggregate.ledger().typed, aggregate.ledger().pasted, aggregate.ledger().assistant);
    println!("  Risk score: {}", risk_score(&result, &anomalies));
    for anomaly in &anomalies {
        println!("  Anomaly ({:?}): {}", anomaly.severity, anomaly.description);
    }
    println!();
    println!("Report written to {}", output.display());

    save_stats(&transparency_log);
    println!();
    println!("{}", transparency_log.summary());
    Ok(())
}

fn read_events(path: &Path) -> anyhow::Result<Vec<RawEvent>> {
    let file = std::fs::File::open(path)?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(line = index + 1, "skipping unreadable event: {e}"),
        }
    }
    Ok(events)
}

#[allow(unused_variables)]
fn open_sink(config: &Config, options: &RecordOptions, session_id: Uuid) -> anyhow::Result<Box<dyn BatchSink>> {
    #[cfg(feature = "gateway")]
    if options.remote {
        let client = create_gateway_client(config, options)?;
        client.start_session(&options.domain, Some(session_id))?;
        println!("  Flushing to remote aggregate");
        return Ok(Box::new(client));
    }
    #[cfg(not(feature = "gateway"))]
    if options.remote {
        eprintln!("Warning: --remote ignored (gateway feature not enabled at compile time)");
    }

    let spool = SpoolSink::new(config.spool_dir().join(format!("{session_id}.jsonl")));
    println!("  Spooling batches to {}", spool.path().display());
    Ok(Box::new(spool))
}

#[allow(unused_variables)]
fn classify(
    config: &Config,
    options: &RecordOptions,
    aggregate: &mut humansign_agent::SessionAggregate,
) -> ClassificationResult {
    #[cfg(feature = "gateway")]
    if options.remote {
        if let Ok(client) = create_gateway_client(config, options) {
            let text = options
                .text
                .as_ref()
                .and_then(|p| std::fs::read_to_string(p).ok());
            let (result, source) = client.verify_with_fallback(aggregate, &NoModel, text.as_deref());
            println!("  Verdict source: {source:?}");
            let _ = client.end_session(aggregate.id());
            return result;
        }
    }
    aggregate.classify(&NoModel)
}

fn write_report(report: &SignedReport, text: &str, output: &Path) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, report.to_json()?)?;
    std::fs::write(output.with_extension("txt"), text)?;
    Ok(())
}

fn print_result(result: &ClassificationResult, typed: u64, pasted: u64, assistant: u64) {
    println!();
    println!("Verdict: {} ({:.0}% confidence)", result.verdict, result.confidence * 100.0);
    println!("  Typed: {typed}  Pasted: {pasted}  Assistant: {assistant}");
    if !result.feedback.is_empty() {
        println!("  {}", result.feedback);
    }
}

fn save_stats(log: &SharedTransparencyLog) {
    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save transparency stats: {e}");
    }
}

fn cmd_verify(report_path: &Path, text_path: Option<&Path>, public_key: Option<&str>) {
    let report = match std::fs::read_to_string(report_path)
        .map_err(anyhow::Error::from)
        .and_then(|json| SignedReport::from_json(&json).map_err(anyhow::Error::from))
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error reading report: {e}");
            std::process::exit(1);
        }
    };

    let text = match text_path.map(std::fs::read_to_string).transpose() {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading text: {e}");
            std::process::exit(1);
        }
    };

    let verification = match public_key {
        Some(encoded) => match decode_public_key(encoded) {
            Ok(key) => verify_report_with_key(&report, &key, text.as_deref()),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        None => verify_report(&report, text.as_deref()),
    };

    println!("Report {}", report.session_id);
    println!("  Verdict: {} ({:.0}%)", report.classification.verdict, report.classification.confidence * 100.0);
    match &verification.signature {
        SignatureStatus::Valid => println!("  Signature: valid ✓"),
        SignatureStatus::Invalid { reason } => println!("  Signature: INVALID ✗ ({reason})"),
        SignatureStatus::NotPresent => println!("  Signature: not present ✗"),
    }
    match &verification.content {
        ContentStatus::Match => println!("  Content: matches hash ✓"),
        ContentStatus::Mismatch { expected, actual } => {
            println!("  Content: TAMPERED ✗");
            println!("    expected {expected}");
            println!("    actual   {actual}");
        }
        ContentStatus::NotChecked => println!("  Content: not checked (no --text)"),
    }

    if !verification.is_trusted() {
        std::process::exit(1);
    }
}

fn cmd_keygen(force: bool) {
    let config = Config::load().unwrap_or_default();
    let store = KeyStore::new(config.key_dir());
    match store.generate(force) {
        Ok(identity) => {
            println!("Signing key generated");
            println!("  Key ID: {}", identity.info().key_id);
            println!("  Public key: {}", identity.info().public_key);
            println!("  Stored in: {}", store.dir().display());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if !force {
                eprintln!("Use --force to replace the existing key.");
            }
            std::process::exit(1);
        }
    }
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("HumanSign Agent Status");
    println!("======================");
    println!();

    let keys = KeyStore::new(config.key_dir());
    match keys.load() {
        Ok(identity) => {
            println!("Signing key: {} (created {})", identity.info().key_id, identity.info().created_at);
            println!("  Host: {}", identity.info().host);
        }
        Err(_) => println!("Signing key: none (run 'humansign keygen')"),
    }
    println!();

    println!("Configuration:");
    println!("  Dedup window: {}ms", config.capture.dedup_window_ms);
    println!("  Trusted assistant channel: {}", config.capture.trusted_assistant_channel);
    println!("  Batch size: {} events / {}ms", config.batching.max_events, config.batching.interval_ms);
    match &config.remote {
        Some(remote) => println!("  Remote aggregate: {}", remote.url),
        None => println!("  Remote aggregate: none (local spool)"),
    }
    println!();

    match SnapshotStore::new(config.snapshot_dir()).list() {
        Ok(ids) if !ids.is_empty() => {
            println!("Suspended sessions:");
            for id in ids {
                println!("  {id}");
            }
        }
        _ => println!("No suspended sessions."),
    }
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        let log = create_shared_log_with_persistence(stats_path);
        println!("Cumulative Statistics:");
        println!("{}", log.summary());
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

#[cfg(feature = "server")]
fn cmd_serve(port: Option<u16>) {
    use humansign_agent::server::{run, ServerConfig};
    use humansign_agent::SessionService;

    let config = Config::load().unwrap_or_default();
    let transparency_log = create_shared_log_with_persistence(config.transparency_path());

    let mut service = SessionService::new(config.pipeline())
        .with_session_timeout(config.session_timeout())
        .with_transparency(transparency_log.clone());
    match KeyStore::new(config.key_dir()).load_or_generate() {
        Ok(identity) => service = service.with_signer(ReportSigner::new(identity)),
        Err(e) => eprintln!("Warning: report signing disabled: {e}"),
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let server_config = ServerConfig::from_config(port.unwrap_or(config.server_port), &config);
    let result = runtime.block_on(async {
        let (addr, shutdown) = run(server_config, service).await?;
        println!("HumanSign aggregate listening on http://{addr}");
        println!("Press Ctrl+C to stop.");
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        let _ = shutdown.send(());
        anyhow::Ok(())
    });

    save_stats(&transparency_log);
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_port: Option<u16>) {
    eprintln!("Error: serve requires the server feature (cargo build --features server)");
    std::process::exit(1);
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}

/// Create gateway client from CLI args or the config file.
#[cfg(feature = "gateway")]
fn create_gateway_client(config: &Config, options: &RecordOptions) -> anyhow::Result<BlockingGatewayClient> {
    let remote = config.remote.as_ref();
    let url = options
        .gateway_url
        .clone()
        .or_else(|| remote.map(|r| r.url.clone()))
        .ok_or_else(|| anyhow::anyhow!("no remote aggregate configured (use --gateway-url)"))?;
    let mut gateway = GatewayConfig::new(url);
    if let Some(token) = options
        .gateway_token
        .clone()
        .or_else(|| remote.and_then(|r| r.token.clone()))
    {
        gateway = gateway.with_token(token);
    }
    Ok(BlockingGatewayClient::new(gateway)?)
}
