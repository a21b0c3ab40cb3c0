use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use common::protocol::{SubCommand, TopCommand, ERROR_PREFIX};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

/// What the server answered to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Name of the result file
    File(String),
    /// Text after the `error_` prefix
    Error(String),
}

impl Reply {
    pub fn parse(line: &str) -> Self {
        match line.strip_prefix(ERROR_PREFIX) {
            Some(message) => Reply::Error(message.to_string()),
            None => Reply::File(line.to_string()),
        }
    }
}

/// Line-oriented protocol client, used by the CLI and the integration tests.
pub struct NewsClient {
    framed: Framed<TcpStream, LinesCodec>,
    timeout: Duration,
}

impl NewsClient {
    /// Connect and identify as `name`.
    pub async fn connect(addr: &str, name: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {}", addr))?;
        let mut client = Self {
            framed: Framed::new(stream, LinesCodec::new()),
            timeout: Duration::from_secs(10),
        };
        client.send(name).await?;
        Ok(client)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one raw protocol message.
    pub async fn send(&mut self, message: &str) -> Result<()> {
        self.framed.send(message).await.context("failed to send message")
    }

    /// Wait for the next line from the server.
    pub async fn receive(&mut self) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.framed.next()).await {
            Err(_) => Err(anyhow!("timed out waiting for the server")),
            Ok(None) => Err(anyhow!("server closed the connection")),
            Ok(Some(line)) => line.context("failed to read reply"),
        }
    }

    /// Run one full command sequence and wait for the answer.
    pub async fn request(&mut self, sub: SubCommand, param: Option<&str>) -> Result<Reply> {
        self.send(TopCommand::Search(sub.domain()).as_wire()).await?;
        self.send(sub.as_wire()).await?;
        if sub.requires_param() {
            let value = param.with_context(|| format!("'{}' needs a value", sub.as_wire()))?;
            self.send(value).await?;
        }
        Ok(Reply::parse(&self.receive().await?))
    }

    pub async fn quit(mut self) -> Result<()> {
        self.send(TopCommand::Quit.as_wire()).await
    }
}

/// Read a result file named by the server, resolved against `dir`.
pub async fn load_result(dir: &Path, name: &str) -> Result<Value> {
    let path = dir.join(name);
    let data = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read result file {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("result file {} is not JSON", path.display()))
}
