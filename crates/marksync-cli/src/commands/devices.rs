use marksync_core::SyncDevice;

use crate::commands::common::{format_sync_timestamp, open_service, save_service, Workspace};
use crate::error::CliError;

pub fn run_devices(workspace: &Workspace, as_json: bool) -> Result<(), CliError> {
    let service = open_service(workspace)?;
    let devices = service.devices();

    if as_json {
        println!("{}", serde_json::to_string_pretty(devices)?);
    } else if devices.is_empty() {
        println!("No devices known yet. Run `marksync sync` first.");
    } else {
        let own = service.prefs().this_device_id.as_deref();
        for line in format_device_lines(devices, own) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_device_lines(devices: &[SyncDevice], this_device_id: Option<&str>) -> Vec<String> {
    devices
        .iter()
        .map(|device| {
            let marker = if Some(device.device_id.as_str()) == this_device_id {
                " (this device)"
            } else {
                ""
            };
            format!(
                "{}{marker}\n  object id: {}\n  last active: {}",
                device.name,
                device.object_id,
                format_sync_timestamp(device.last_active)
            )
        })
        .collect()
}

pub async fn run_forget(workspace: &Workspace, object_id: &str) -> Result<(), CliError> {
    let mut service = open_service(workspace)?;
    service.delete_device(object_id.trim()).await?;
    save_service(workspace, &service)?;
    println!("Removed device {}", object_id.trim());
    Ok(())
}
