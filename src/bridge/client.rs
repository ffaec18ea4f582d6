use crate::bridge::command::{BridgeCommand, PluginResult};
use anyhow::{Context, Result};
use interprocess::local_socket::tokio::{prelude::*, Stream as LocalStream};
use interprocess::local_socket::{GenericNamespaced, ToNsName};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

/// Minimal bridge client, used by the `--call` command line mode
pub struct BridgeClient {
    stream: BufReader<LocalStream>,
}

impl BridgeClient {
    pub async fn connect(socket_name: &str) -> Result<Self> {
        let name = socket_name.to_ns_name::<GenericNamespaced>()?;
        let stream = LocalStream::connect(name)
            .await
            .with_context(|| format!("Could not connect to bridge '{}'", socket_name))?;
        info!("Connected to bridge {}", socket_name);
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    pub async fn send(&mut self, command: &BridgeCommand) -> Result<()> {
        self.send_line(&serde_json::to_string(command)?).await
    }

    /// Write one raw line. The newline is appended here.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Next result from the server, `None` once it closed the connection
    pub async fn next_result(&mut self) -> Result<Option<PluginResult>> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&line)?))
    }
}
