use anyhow::{bail, Context, Result};
use bridgelink_core::protocol::{
    ChatCreationResult, ConnectionResult, ConversationInfo, ConversationItem, Decoder, DownloadFailure,
    DownloadProgress, DownloadedFile, Encoder, Header, MassRetrievalFile, MassRetrievalProgress,
    MassRetrievalResult, Modifier, RequestId, SendResult, ServerInfo, PROTOCOL_MAJOR, PROTOCOL_MINOR,
};
use bridgelink_core::transport::OnSent;
use bridgelink_core::{
    select_protocol, CallbackExecutor, Config, Connection, Dispatch, InlineExecutor, PasswordEncryption,
    ProtocolContext, ProtocolListener, ProtocolVersion, TokioExecutor,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "bridgelink")]
#[command(about = "Inspect and build Bridgelink protocol packets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode hex packet dumps as if received from the server
    Decode {
        /// One hex string per packet, header included
        packets: Vec<String>,
        /// Treat packets as received over an unencrypted channel
        #[arg(long)]
        insecure: bool,
        /// Do not assume a completed handshake
        #[arg(long)]
        fresh: bool,
    },
    /// Build a ping packet
    Ping,
    /// Build the authentication reply to a server greeting
    Auth {
        /// Transmission check sent by the server, in hex
        #[arg(long)]
        challenge: Option<String>,
        /// Password shared with the server
        #[arg(long)]
        password: Option<String>,
    },
    /// Show protocol and client information
    Info,
}

// ============================================================================
// PRINTING ENDPOINTS
// ============================================================================

/// Connection that prints what the protocol would put on the wire
struct PrintingConnection;

impl Connection for PrintingConnection {
    fn is_open(&self) -> bool {
        true
    }

    fn enqueue(&self, packet: Vec<u8>, requires_encryption: bool, on_sent: Option<OnSent>) -> bool {
        let header = packet
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .map(i32::from_be_bytes)
            .and_then(Header::from_code);
        println!(
            "📤 {} ({} bytes, {}): {}",
            header.map(|h| h.to_string()).unwrap_or_else(|| "unknown".to_string()),
            packet.len(),
            if requires_encryption { "encrypted" } else { "plain" },
            hex::encode(&packet)
        );
        if let Some(on_sent) = on_sent {
            on_sent();
        }
        true
    }

    fn disconnect(&self, reason: ConnectionResult) {
        println!("❌ Disconnect: {:?}", reason);
    }

    fn on_handshake_completed(&self, server: ServerInfo) {
        println!(
            "🤝 Handshake complete: {} ({}, server {})",
            server.device_name, server.system_version, server.software_version
        );
    }
}

struct PrintingListener;

impl ProtocolListener for PrintingListener {
    fn on_message_update(&self, items: Vec<ConversationItem>) {
        println!("💬 {} conversation item(s)", items.len());
        for item in items {
            println!("{:#?}", item);
        }
    }

    fn on_conversation_update(&self, conversations: Vec<ConversationInfo>) {
        println!("📂 {} conversation(s)", conversations.len());
        for conversation in conversations {
            println!("{:#?}", conversation);
        }
    }

    fn on_modifier_update(&self, modifiers: Vec<Modifier>) {
        println!("✏️ {} modifier(s)", modifiers.len());
        for modifier in modifiers {
            println!("{:#?}", modifier);
        }
    }

    fn on_mass_retrieval_started(&self, progress: MassRetrievalProgress) {
        println!(
            "📥 Mass retrieval {} started, {} items expected",
            progress.request_id, progress.expected_items
        );
    }

    fn on_mass_retrieval_progress(&self, progress: MassRetrievalProgress) {
        println!(
            "📥 Mass retrieval {}: {}/{} items",
            progress.request_id, progress.received_items, progress.expected_items
        );
    }

    fn on_mass_retrieval_complete(&self, result: MassRetrievalResult) {
        println!(
            "✅ Mass retrieval {} complete: {} conversations, {} items",
            result.request_id,
            result.conversations.len(),
            result.items.len()
        );
    }

    fn on_mass_retrieval_file(&self, file: MassRetrievalFile) {
        println!("📁 File {} ({}): {} bytes", file.file_name, file.file_guid, file.data.len());
    }

    fn on_mass_retrieval_failed(&self, request_id: RequestId) {
        println!("❌ Mass retrieval {} failed", request_id);
    }

    fn on_download_progress(&self, progress: DownloadProgress) {
        match progress.total_bytes {
            Some(total) => println!("📎 Download {}: {}/{} bytes", progress.request_id, progress.received_bytes, total),
            None => println!("📎 Download {}: {} bytes", progress.request_id, progress.received_bytes),
        }
    }

    fn on_download_complete(&self, file: DownloadedFile) {
        println!("✅ Download {} ({}) complete: {} bytes", file.request_id, file.guid, file.data.len());
    }

    fn on_download_confirmed(&self, request_id: RequestId) {
        println!("📎 Download {} confirmed", request_id);
    }

    fn on_download_failed(&self, request_id: RequestId, failure: DownloadFailure) {
        println!("❌ Download {} failed: {:?}", request_id, failure);
    }

    fn on_send_result(&self, request_id: RequestId, result: SendResult, details: Option<String>) {
        println!("📤 Send {}: {:?} {}", request_id, result, details.unwrap_or_default());
    }

    fn on_chat_creation_result(&self, request_id: RequestId, result: ChatCreationResult, details: Option<String>) {
        println!("💬 Chat creation {}: {:?} {}", request_id, result, details.unwrap_or_default());
    }
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_create(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;

    info!("Using installation {} ({})", config.installation_id, path.display());

    match cli.command {
        Commands::Decode { packets, insecure, fresh } => decode_packets(config, packets, insecure, fresh),
        Commands::Ping => build_ping(config),
        Commands::Auth { challenge, password } => build_auth(config, challenge, password),
        Commands::Info => show_protocol_info(config, &path),
    }
}

fn open_protocol(config: Config, password: Option<String>) -> Result<Box<dyn ProtocolVersion>> {
    let executor: Arc<dyn CallbackExecutor> = match TokioExecutor::current() {
        Some(executor) => Arc::new(executor),
        None => Arc::new(InlineExecutor),
    };

    let mut context = ProtocolContext::new(config, Arc::new(PrintingConnection), Arc::new(PrintingListener))
        .with_executor(executor);
    if let Some(password) = password {
        context = context.with_encryption(Arc::new(PasswordEncryption::new(password)));
    }

    match select_protocol(PROTOCOL_MAJOR, PROTOCOL_MINOR, context) {
        Some(protocol) => Ok(protocol),
        None => bail!("no protocol implementation available"),
    }
}

fn decode_packets(config: Config, packets: Vec<String>, insecure: bool, fresh: bool) -> Result<()> {
    if packets.is_empty() {
        bail!("nothing to decode");
    }

    let mut protocol = open_protocol(config, None)?;

    if !fresh {
        let mut accept = Encoder::with_header(Header::Authentication, 1024)?;
        accept.write_int(0)?;
        for field in ["cli", "local", "-", "-"] {
            accept.write_string(field)?;
        }
        protocol.process_data(&accept.finish(), false)?;
    }

    for (index, packet) in packets.iter().enumerate() {
        let data = hex::decode(packet.trim()).with_context(|| format!("packet {} is not valid hex", index))?;
        println!("🔍 Packet {} ({} bytes)", index, data.len());

        match protocol.process_data(&data, !insecure) {
            Ok(Dispatch::Consumed) => {}
            Ok(Dispatch::NotConsumed) => println!("⏭️ Not consumed"),
            Err(e) => println!("❌ Failed to decode: {}", e),
        }
    }

    Ok(())
}

fn build_ping(config: Config) -> Result<()> {
    let mut protocol = open_protocol(config, None)?;
    protocol.send_ping()?;
    Ok(())
}

fn build_auth(config: Config, challenge: Option<String>, password: Option<String>) -> Result<()> {
    let mut greeting = Encoder::new(1024);
    match &challenge {
        Some(check) => {
            if password.is_none() {
                bail!("--challenge needs --password");
            }
            greeting.write_bool(true)?;
            greeting.write_payload(&hex::decode(check).context("challenge is not valid hex")?)?;
        }
        None => greeting.write_bool(false)?,
    }

    let greeting = greeting.finish();
    let mut protocol = open_protocol(config, password)?;
    protocol.send_authentication_request(&mut Decoder::new(&greeting))?;
    Ok(())
}

fn show_protocol_info(config: Config, path: &Path) -> Result<()> {
    let protocol = open_protocol(config.clone(), None)?;
    let (major, minor) = protocol.version();

    println!("Bridgelink Protocol Information:");
    println!("  Config File: {}", path.display());
    println!("  Installation ID: {}", config.installation_id);
    println!("  Client Name: {}", config.client_name);
    println!("  Platform: {}", config.platform_id);
    println!("  Protocol: comm{} v{}", major, minor);
    println!("  File Hash: {}", protocol.hash_algorithm().name());
    println!("  Max Packet Size: {} bytes", config.max_packet_size);
    println!("  Attachment Chunk Size: {} bytes", config.attachment_chunk_size);
    match config.handshake_timeout() {
        Some(timeout) => println!("  Handshake Timeout: {:?}", timeout),
        None => println!("  Handshake Timeout: disabled"),
    }

    Ok(())
}
