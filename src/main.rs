use anyhow::{Context, Result};
use gatt_alert_server::bridge::{BridgeClient, BridgeCommand, BridgeServer};
use gatt_alert_server::domain::settings::SettingsService;
use gatt_alert_server::infrastructure::alert::SystemPresenter;
use gatt_alert_server::infrastructure::logging::init_logger;
use gatt_alert_server::plugin::GattServerPlugin;
use tokio::sync::mpsc;
use tracing::{error, info};

const USAGE: &str = "usage: gatt_alert_server [--call <action> [json-arg]]";

#[tokio::main]
async fn main() -> Result<()> {
    let settings_service = SettingsService::new()?;

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    let socket_name = settings_service.get().server.bridge_socket_name.clone();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => {}
        Some("--call") => {
            let action = args.next().context(USAGE)?;
            let arg = args
                .next()
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("Argument must be valid JSON")?;
            return run_client(&socket_name, &action, arg).await;
        }
        Some(other) => anyhow::bail!("Unknown argument '{}'\n{}", other, USAGE),
    }

    info!("Starting GATT alert server");

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (result_tx, result_rx) = mpsc::unbounded_channel();

    let bridge = BridgeServer::new(&socket_name, command_tx, result_rx);
    let bridge_task = tokio::spawn(async move {
        if let Err(e) = bridge.run().await {
            error!("Bridge failed: {}", e);
        }
    });

    #[cfg(windows)]
    let backend = gatt_alert_server::infrastructure::bluetooth::WinRtPeripheral::new(event_tx);
    #[cfg(not(windows))]
    let backend = {
        tracing::warn!("No native peripheral role on this platform, using loopback peripheral");
        gatt_alert_server::infrastructure::bluetooth::LoopbackPeripheral::new(event_tx)
    };

    let plugin = GattServerPlugin::new(
        backend,
        SystemPresenter::new(),
        settings_service,
        result_tx,
    );

    plugin.run(command_rx, event_rx, shutdown_signal()).await;

    bridge_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Send one command and print results until the callback is released
async fn run_client(
    socket_name: &str,
    action: &str,
    arg: Option<serde_json::Value>,
) -> Result<()> {
    let mut client = BridgeClient::connect(socket_name).await?;
    let command = BridgeCommand::new("cli", action, arg.into_iter().collect());
    client.send(&command).await?;

    while let Some(result) = client.next_result().await? {
        println!("{}", serde_json::to_string(&result)?);
        if !result.keep_callback && result.callback_id == command.callback_id {
            break;
        }
    }
    Ok(())
}
