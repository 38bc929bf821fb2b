mod config;
mod render;

use anyhow::Context;
use domain::{Mutation, SyncEvent};
use dotenvy::dotenv;
use engine::{SyncError, ThreadSync};
use std::sync::Arc;
use storage::{Caches, Db};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::new().context("Failed to load configuration")?;

    let db = Db::new(&settings.store.url).await?;
    let caches = Arc::new(Caches::open(Arc::new(db.clone())).await?);

    let viewer = settings.viewer.to_viewer();
    let backend = adapter::connect(settings.backend.to_config(), &viewer)?;
    let sync = ThreadSync::new(
        settings.thread.id.clone(),
        viewer,
        backend,
        caches,
        settings.sync.to_settings(),
    );
    info!("Thread view {} ready for {}", sync.thread_id(), sync.viewer().name);

    if let Err(e) = sync.refresh().await {
        warn!("Initial fetch failed: {}", e);
    }
    print_thread(&sync);
    println!("{}", render::HELP);

    let renderer = tokio::spawn(render_events(sync.clone()));

    tokio::select! {
        result = read_commands(sync.clone()) => {
            if let Err(e) = result {
                error!("Command loop stopped: {:#}", e);
            }
        },
        _ = shutdown_signal() => {},
    }

    sync.close();
    renderer.abort();
    db.close().await;
    info!("Bye");
    Ok(())
}

fn print_thread(sync: &ThreadSync) {
    print!("{}", render::format_threads(sync.thread_id(), &sync.threads()));
}

async fn render_events(sync: ThreadSync) {
    let mut events = BroadcastStream::new(sync.subscribe());
    while let Some(event) = events.next().await {
        match event {
            Ok(SyncEvent::ThreadChanged { .. }) => print_thread(&sync),
            Ok(SyncEvent::Warning { message }) => println!("! {}", message),
            Ok(SyncEvent::MutationFailed { kind, id, reason }) => {
                println!("! {} of {} failed: {}", kind, id, reason)
            }
            Ok(SyncEvent::PendingExpired { temp_id }) => {
                debug!("{} gave up waiting for the server", temp_id)
            }
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!("Renderer skipped {} events", n);
                print_thread(&sync);
            }
        }
    }
}

async fn read_commands(sync: ThreadSync) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "help" => println!("{}", render::HELP),
            "show" => print_thread(&sync),
            "refresh" => {
                let sync = sync.clone();
                tokio::spawn(async move {
                    if let Err(e) = sync.refresh().await {
                        println!("! refresh failed: {}", e);
                    }
                });
            }
            _ => match line.parse::<Mutation>() {
                Ok(mutation) => {
                    // 每个操作独立运行，不阻塞后续输入
                    let sync = sync.clone();
                    tokio::spawn(async move {
                        let kind = mutation.kind();
                        match sync.apply(mutation).await {
                            Ok(()) => {}
                            // 本地校验失败不会产生事件，直接提示
                            Err(
                                e @ (SyncError::EmptyContent
                                | SyncError::AlreadySubmitting
                                | SyncError::NotConfirmed(_)
                                | SyncError::NotFound(_)),
                            ) => println!("! {}", e),
                            Err(e) => debug!("{} ended with {}", kind, e),
                        }
                    });
                }
                Err(e) => println!("? {} (type `help`)", e),
            },
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
