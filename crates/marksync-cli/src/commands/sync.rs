use std::future::Future;
use std::time::Duration;

use marksync_core::util::unix_millis_now;
use marksync_core::{SyncState, TickOutcome};

use crate::commands::common::{
    format_tick_report, open_service, save_service, Service, Workspace,
};
use crate::error::CliError;

pub async fn run_sync(workspace: &Workspace, watch: bool) -> Result<(), CliError> {
    let mut service = open_service(workspace)?;
    if service.state() == SyncState::NotConfigured {
        return Err(CliError::SyncNotConfigured);
    }

    let result = if watch {
        println!("Syncing until interrupted (Ctrl-C to stop)");
        watch_until(workspace, &mut service, interrupted()).await
    } else {
        tick_and_report(&mut service).await.map(|_| ())
    };
    // Persist whatever was applied, even if the relay failed half way.
    save_service(workspace, &service)?;
    result
}

/// One tick; returns how long to wait before the next one
async fn tick_and_report(service: &mut Service) -> Result<Duration, CliError> {
    match service.tick(unix_millis_now()).await? {
        TickOutcome::Idle => {
            println!("Sync is turned off. Run `marksync toggle sync on`.");
            Ok(service.config().poll_interval)
        }
        TickOutcome::Synced(report) => {
            println!("{}", format_tick_report(&report));
            Ok(service.config().poll_interval)
        }
        TickOutcome::Retry(delay) => {
            println!(
                "Relay unavailable ({} failures in a row), retry in {}s",
                service.consecutive_failures(),
                delay.as_secs()
            );
            Ok(delay)
        }
    }
}

/// Tick until `shutdown` completes. The tree is saved after every tick: the
/// database has already moved its record cursors past what the tick applied.
pub async fn watch_until(
    workspace: &Workspace,
    service: &mut Service,
    shutdown: impl Future<Output = ()>,
) -> Result<(), CliError> {
    tokio::pin!(shutdown);
    loop {
        let wait = tick_and_report(service).await?;
        save_service(workspace, service)?;

        tokio::select! {
            biased;
            () = &mut shutdown => {
                tracing::info!("Sync loop stopped");
                return Ok(());
            }
            () = tokio::time::sleep(wait) => {}
        }
    }
}

async fn interrupted() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
}
