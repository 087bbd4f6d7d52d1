use marksync_core::{SetupOutcome, SyncState};

use crate::cli::{Switch, SyncSetting};
use crate::commands::common::{
    format_state, format_sync_timestamp, open_service, save_service, Service, Workspace,
};
use crate::error::CliError;

pub async fn run_setup_new(workspace: &Workspace, name: Option<String>) -> Result<(), CliError> {
    let mut service = open_service(workspace)?;
    let outcome = service.setup_new_chain(name).await?;
    report_setup(&service, outcome)?;
    save_service(workspace, &service)
}

pub async fn run_setup_join(
    workspace: &Workspace,
    words: &[String],
    name: Option<String>,
) -> Result<(), CliError> {
    let words = join_sync_words(words).ok_or(CliError::EmptySyncWords)?;
    let mut service = open_service(workspace)?;
    let outcome = service.setup_with_sync_words(&words, name).await?;
    report_setup(&service, outcome)?;
    save_service(workspace, &service)
}

fn report_setup(service: &Service, outcome: SetupOutcome) -> Result<(), CliError> {
    match outcome {
        SetupOutcome::Started => {
            let words = service.sync_words()?.ok_or(CliError::SyncNotConfigured)?;
            println!("Sync chain ready. Sync words for your other devices:");
            println!("{words}");
            println!("Run `marksync sync` to upload this device's bookmarks.");
        }
        SetupOutcome::AlreadyConfigured => {
            println!("Sync is already configured. Run `marksync reset` to leave the chain first.");
        }
        SetupOutcome::InProgress => println!("Sync setup is already in progress"),
    }
    Ok(())
}

/// Accept words as separate arguments or as one quoted string
pub fn join_sync_words(words: &[String]) -> Option<String> {
    let joined = words
        .iter()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

pub fn run_words(workspace: &Workspace) -> Result<(), CliError> {
    let service = open_service(workspace)?;
    let words = service.sync_words()?.ok_or(CliError::SyncNotConfigured)?;
    println!("{words}");
    Ok(())
}

pub fn run_status(workspace: &Workspace) -> Result<(), CliError> {
    let service = open_service(workspace)?;
    for line in format_status_lines(&service) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(service: &Service) -> Vec<String> {
    let prefs = service.prefs();
    let on_off = |flag: bool| if flag { "on" } else { "off" };
    let mut lines = vec![format!("State: {}", format_state(service.state()))];
    if let Some(device_id) = &prefs.this_device_id {
        lines.push(format!("Device: {} ({device_id})", prefs.this_device_name));
    }
    lines.push(format!(
        "Bookmarks: {}, history: {}, preferences: {}",
        on_off(prefs.sync_bookmarks),
        on_off(prefs.sync_history),
        on_off(prefs.sync_preferences)
    ));
    lines.push(format!("Devices in chain: {}", prefs.devices.len()));
    if let Some(last_fetch) = prefs.last_fetch_time {
        lines.push(format!("Last sync: {}", format_sync_timestamp(last_fetch)));
    }
    lines
}

pub fn run_toggle(workspace: &Workspace, setting: SyncSetting, value: Switch) -> Result<(), CliError> {
    let mut service = open_service(workspace)?;
    if service.state() == SyncState::NotConfigured {
        return Err(CliError::SyncNotConfigured);
    }
    let enabled = value.is_on();
    match setting {
        SyncSetting::Sync => service.set_sync_enabled(enabled)?,
        SyncSetting::Bookmarks => service.set_sync_bookmarks(enabled)?,
        SyncSetting::History => service.set_sync_history(enabled)?,
        SyncSetting::Preferences => service.set_sync_preferences(enabled)?,
    }
    println!("State: {}", format_state(service.state()));
    Ok(())
}

pub async fn run_reset(workspace: &Workspace) -> Result<(), CliError> {
    let mut service = open_service(workspace)?;
    if service.state() == SyncState::NotConfigured {
        return Err(CliError::SyncNotConfigured);
    }
    service.reset_sync().await?;
    save_service(workspace, &service)?;
    println!("Left the sync chain. Bookmarks stay on this device.");
    Ok(())
}
