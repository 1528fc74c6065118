//! Headless Huddle client.
//!
//! ```bash
//! huddle-client 192.168.1.10 alice
//! ```
//!
//! Lines typed on stdin are broadcast as chat. Commands:
//! `/msg <user> <text>`, `/users`, `/files`, `/get <filename>`,
//! `/put <path>`, `/quit`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::bail;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use huddle_client::config::DEFAULT_LOG_FILTER;
use huddle_client::{ClientConfig, ClientEvent, Devices, Session};
use huddle_shared::FileRecord;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = ClientConfig::from_env().with_args(std::env::args().skip(1));
    if config.username.is_empty() {
        bail!("usage: huddle-client <host> <username>");
    }

    let (session, mut events) = Session::connect(&config, Devices::default()).await?;
    info!(user = %session.username(), "Connected");

    let mut known_files: HashMap<String, FileRecord> = HashMap::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if let ClientEvent::Disconnected { reason } = &event {
                    println!("*** disconnected: {reason}");
                    break;
                }
                remember_files(&event, &mut known_files);
                print_event(&event);
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&session, line.trim(), &known_files).await? {
                    break;
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Returns false when the user asked to quit.
async fn run_command(
    session: &Session,
    line: &str,
    files: &HashMap<String, FileRecord>,
) -> anyhow::Result<bool> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    match cmd {
        "" => {}
        "/quit" => return Ok(false),
        "/users" => session.request_user_list().await?,
        "/files" => session.request_file_list().await?,
        "/msg" => match rest.split_once(' ') {
            Some((to, text)) => session.send_chat(Some(to), text).await?,
            None => println!("usage: /msg <user> <text>"),
        },
        "/put" => {
            if let Err(e) = session.upload_file(Path::new(rest)).await {
                println!("*** upload failed: {e}");
            }
        }
        "/get" => match files.get(rest) {
            Some(record) => match session.download_file(record).await {
                Ok(path) => println!("*** downloading {} to {}", record.filename, path.display()),
                Err(e) => println!("*** download failed: {e}"),
            },
            None => println!("*** unknown file {rest:?}; try /files"),
        },
        _ if cmd.starts_with('/') => println!("*** unknown command {cmd}"),
        _ => session.send_chat(None, line).await?,
    }
    Ok(true)
}

fn remember_files(event: &ClientEvent, files: &mut HashMap<String, FileRecord>) {
    match event {
        ClientEvent::FileOffer(record) => {
            files.insert(record.filename.clone(), record.clone());
        }
        ClientEvent::FileList(records) => {
            files.clear();
            files.extend(records.iter().map(|r| (r.filename.clone(), r.clone())));
        }
        _ => {}
    }
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => println!("*** connected"),
        ClientEvent::Error(msg) => println!("*** error: {msg}"),
        ClientEvent::UserList(users) => println!("*** online: {}", users.join(", ")),
        ClientEvent::Chat { from, msg, private } => {
            let tag = if *private { " (private)" } else { "" };
            println!("[{from}]{tag} {msg}");
        }
        ClientEvent::FileOffer(r) => println!("*** {} shared {} ({} bytes)", r.from, r.filename, r.size),
        ClientEvent::FileList(records) => {
            println!("*** {} file(s) on server", records.len());
            for r in records {
                println!("    {} ({} bytes, from {})", r.filename, r.size, r.from);
            }
        }
        ClientEvent::UploadProgress { filename, sent, total } if sent == total => {
            println!("*** uploaded {filename}");
        }
        ClientEvent::DownloadComplete { filename, path } => {
            println!("*** saved {filename} to {}", path.display());
        }
        ClientEvent::PresenterChanged(Some(name)) => println!("*** {name} is presenting"),
        ClientEvent::PresenterChanged(None) => println!("*** nobody is presenting"),
        _ => {}
    }
}
