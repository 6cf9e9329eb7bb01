//! Parley - terminal client for agreement collaboration sessions

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use parley::api::{DocumentFormat, RestClient, SignatureUpload};
use parley::channel::ConnectorConfig;
use parley::config::Args;
use parley::model::{ClauseDef, Preference};
use parley::session::CollaborationSession;
use parley::SessionContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("parley={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        anyhow::bail!("Configuration error: {e}");
    }

    let mut ctx = SessionContext::load(&args.context)
        .with_context(|| format!("Cannot load session context from {}", args.context.display()))?;

    info!("======================================");
    info!("  Parley - Agreement Collaboration");
    info!("======================================");
    info!("Agreement: {}", args.agreement_id);
    info!("Backend:   {}", args.api_url);
    info!("Channel:   {}", args.channel_url);
    info!("User:      {} ({})", ctx.display_name, ctx.user_id);
    info!("======================================");

    let backend = Arc::new(RestClient::with_timeout(
        &args.api_url,
        &ctx.token,
        args.request_timeout(),
    ));

    let mut channel = ConnectorConfig::new(
        args.channel_url.as_str(),
        ctx.token.as_str(),
        args.agreement_id.as_str(),
        ctx.user_id.as_str(),
        ctx.display_name.as_str(),
    );
    channel.connect_timeout = args.connect_timeout();
    channel.reconnect = args.reconnect_policy();

    let session = CollaborationSession::open_with(&ctx, backend, channel)
        .await
        .context("Cannot open collaboration session")?;

    // The terminal shows the chat, so the panel counts as open
    session.open_panel().await;
    print_status(&session.snapshot().await);

    // Print remote activity as snapshots move
    let mut watcher = session.snapshots();
    let printer = tokio::spawn(async move {
        let mut seen_messages = watcher.borrow().messages.len();
        let mut connected = watcher.borrow().connected;
        let mut typing: Vec<String> = Vec::new();

        while watcher.changed().await.is_ok() {
            let snap = watcher.borrow().clone();

            for msg in snap.messages.iter().skip(seen_messages) {
                println!("[{}] {}: {}", msg.sent_at.format("%H:%M:%S"), msg.sender_name, msg.body);
            }
            seen_messages = snap.messages.len();

            if snap.connected != connected {
                connected = snap.connected;
                println!("-- {} --", if connected { "connected" } else { "disconnected" });
            }

            if snap.typing != typing {
                typing = snap.typing.clone();
                if !typing.is_empty() {
                    println!("-- {} typing... --", typing.join(", "));
                }
            }
        }
    });

    println!("Type a message, or /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&session, &mut ctx, &args, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                session.poll_typing().await;
            }
        }
    }

    // Save any cached signature reference for the next session
    if let Err(e) = ctx.save(&args.context) {
        warn!(error = %e, "Session context not saved");
    }

    session.close().await;
    let _ = printer.await;
    info!("Session closed");
    Ok(())
}

/// Handle one input line. Returns false when the session should end.
async fn handle_line(
    session: &CollaborationSession,
    ctx: &mut SessionContext,
    args: &Args,
    line: &str,
) -> bool {
    if line.is_empty() {
        return true;
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    let result = match command {
        "/quit" => return false,
        "/help" => {
            print_help();
            Ok(())
        }
        "/status" => {
            print_status(&session.snapshot().await);
            Ok(())
        }
        "/accept" => session.set_preference(rest, Preference::Acceptable).await,
        "/reject" => session.set_preference(rest, Preference::Unacceptable).await,
        "/clause" => match rest.split_once("::") {
            Some((name, description)) => {
                session
                    .add_custom_clause(ClauseDef {
                        id: format!("custom-{}", Uuid::new_v4()),
                        name: name.trim().to_string(),
                        description: description.trim().to_string(),
                        category: "custom".to_string(),
                        required: false,
                    })
                    .await
            }
            None => {
                println!("usage: /clause <name> :: <description>");
                Ok(())
            }
        },
        "/signature" => match SignatureUpload::typed(rest) {
            Ok(upload) => match session.upload_signature(&upload).await {
                Ok(reference) => {
                    ctx.cache_signature(&reference);
                    println!("signature stored as {reference}");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        },
        "/sign" => session.sign().await,
        "/doc" => {
            let format = match rest {
                "docx" => DocumentFormat::Docx,
                _ => DocumentFormat::Pdf,
            };
            download_document(session, args, format).await
        }
        _ if command.starts_with('/') => {
            println!("unknown command {command}; /help lists commands");
            Ok(())
        }
        _ => {
            session.keystroke().await;
            session.send_chat(line).await
        }
    };

    if let Err(e) = result {
        println!("error: {e}");
    }
    true
}

async fn download_document(
    session: &CollaborationSession,
    args: &Args,
    format: DocumentFormat,
) -> parley::Result<()> {
    let bytes = session.download_document(format).await?;
    let extension = match format {
        DocumentFormat::Pdf => "pdf",
        DocumentFormat::Docx => "docx",
    };
    let path = format!("{}.{extension}", args.agreement_id);
    std::fs::write(&path, &bytes)?;
    println!("wrote {} bytes to {path}", bytes.len());
    Ok(())
}

fn print_status(snap: &parley::SessionSnapshot) {
    println!("{} [{}] — {}", snap.title, snap.agreement_id, snap.status);
    println!(
        "link: {} | online: {} | you are {}",
        if snap.connected { "online" } else { "offline" },
        snap.online_count,
        snap.local_role,
    );
    for clause in &snap.clauses {
        println!(
            "  {:<14} {:?} (A: {:?}, B: {:?})",
            clause.id, clause.resolution, clause.party_a_preference, clause.party_b_preference
        );
    }
    println!(
        "clauses accepted: {} | can sign: {} | fully signed: {}",
        snap.all_clauses_accepted, snap.can_sign, snap.fully_signed
    );
}

fn print_help() {
    println!("/status                     show session state");
    println!("/accept <clause-id>         mark a clause acceptable");
    println!("/reject <clause-id>         mark a clause unacceptable");
    println!("/clause <name> :: <desc>    add a custom clause");
    println!("/signature <text>           upload a typed signature");
    println!("/sign                       sign the agreement");
    println!("/doc [pdf|docx]             download the generated document");
    println!("/quit                       leave the session");
    println!("anything else is sent as a chat message");
}
