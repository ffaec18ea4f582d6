use crate::bridge::command::{encode_result, parse_command, BridgeCommand, PluginResult};
use anyhow::Result;
use interprocess::local_socket::tokio::{prelude::*, Stream as LocalStream};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, ToNsName};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Serves the command bridge on a local socket, one client at a time.
///
/// Commands are forwarded to the plugin loop; every result the plugin
/// produces is written to the connected client.
pub struct BridgeServer {
    socket_name: String,
    command_sender: mpsc::UnboundedSender<BridgeCommand>,
    result_receiver: mpsc::UnboundedReceiver<PluginResult>,
}

impl BridgeServer {
    pub fn new(
        socket_name: &str,
        command_sender: mpsc::UnboundedSender<BridgeCommand>,
        result_receiver: mpsc::UnboundedReceiver<PluginResult>,
    ) -> Self {
        Self {
            socket_name: socket_name.to_string(),
            command_sender,
            result_receiver,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let name = self.socket_name.as_str().to_ns_name::<GenericNamespaced>()?;
        let listener = ListenerOptions::new().name(name).create_tokio()?;
        info!("Bridge listening on {}", self.socket_name);

        loop {
            tokio::select! {
                conn = listener.accept() => {
                    let conn = match conn {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Bridge accept failed: {}", e);
                            continue;
                        }
                    };
                    info!("Bridge client connected");
                    match self.handle_connection(conn).await {
                        Ok(true) => info!("Bridge client disconnected"),
                        Ok(false) => break,
                        Err(e) => error!("Bridge connection error: {}", e),
                    }
                }
                result = self.result_receiver.recv() => match result {
                    Some(result) => warn!(
                        "No bridge client connected, dropping result for '{}'",
                        result.callback_id
                    ),
                    None => break,
                },
            }
        }

        info!("Bridge stopped");
        Ok(())
    }

    /// Returns `Ok(false)` once the plugin side has gone away
    async fn handle_connection(&mut self, conn: LocalStream) -> Result<bool> {
        let mut lines = BufReader::new(&conn).lines();
        let mut writer = &conn;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok(true);
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(command) => {
                            debug!("Bridge command: {} ({})", command.action, command.callback_id);
                            if self.command_sender.send(command).is_err() {
                                return Ok(false);
                            }
                        }
                        Err(result) => {
                            warn!("Rejected bridge line: {:?}", result.message);
                            writer.write_all(encode_result(&result)?.as_bytes()).await?;
                            writer.flush().await?;
                        }
                    }
                }
                result = self.result_receiver.recv() => {
                    let Some(result) = result else {
                        return Ok(false);
                    };
                    writer.write_all(encode_result(&result)?.as_bytes()).await?;
                    writer.flush().await?;
                }
            }
        }
    }
}
