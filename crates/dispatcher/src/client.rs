use crontab_core::{
    models::{Command, CommandMethod, NewTask, TaskPatch},
    SchedulerError, SchedulerResult,
};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::server::ACK;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// 命令客户端，复用同一条TCP连接，断开后自动重连一次
pub struct CommandClient {
    addr: String,
    timeout: Duration,
    connection: Option<Connection>,
}

impl CommandClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(5),
            connection: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn create(&mut self, task: &NewTask) -> SchedulerResult<()> {
        self.send(&Command::create(task)?).await
    }

    pub async fn update(&mut self, patch: &TaskPatch) -> SchedulerResult<()> {
        self.send(&Command::update(patch)?).await
    }

    pub async fn delete(&mut self, id: i64) -> SchedulerResult<()> {
        self.send(&Command::delete(id)).await
    }

    pub async fn reload(&mut self, id: i64) -> SchedulerResult<()> {
        self.send(&Command::reload(id)).await
    }

    pub async fn request(&mut self, method: CommandMethod, args: Value) -> SchedulerResult<()> {
        self.send(&Command::new(method, args)).await
    }

    /// 发送命令并等待 `ok` 应答
    ///
    /// 复用的连接失效时重连重发一次；命令可能已被服务端接收时（等待应答超时等）不重发。
    pub async fn send(&mut self, command: &Command) -> SchedulerResult<()> {
        let line = format!("{}\n", command.encode()?);

        let reused = self.connection.is_some();
        match self.round_trip(&line).await {
            Ok(()) => Ok(()),
            Err(Failure::NotDelivered(e)) if reused => {
                warn!("命令连接失效，重新连接: {}", e);
                self.connection = None;
                self.round_trip(&line).await.map_err(|failure| {
                    self.connection = None;
                    failure.into_error()
                })
            }
            Err(failure) => {
                self.connection = None;
                Err(failure.into_error())
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            let _ = conn.writer.shutdown().await;
        }
    }

    async fn connect(&self) -> SchedulerResult<Connection> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SchedulerError::Network(format!("连接 {} 超时", self.addr)))?
            .map_err(|e| SchedulerError::Network(format!("连接 {} 失败: {e}", self.addr)))?;
        debug!("已连接命令服务 {}", self.addr);

        let (reader, writer) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn round_trip(&mut self, line: &str) -> Result<(), Failure> {
        if self.connection.is_none() {
            self.connection = Some(self.connect().await.map_err(Failure::NotDelivered)?);
        }
        let timeout = self.timeout;
        let conn = self.connection.as_mut().ok_or_else(|| {
            Failure::NotDelivered(SchedulerError::Internal("命令连接不存在".to_string()))
        })?;

        conn.writer.write_all(line.as_bytes()).await.map_err(|e| {
            Failure::NotDelivered(SchedulerError::Network(format!("发送命令失败: {e}")))
        })?;

        let mut reply = String::new();
        let read = tokio::time::timeout(timeout, conn.reader.read_line(&mut reply))
            .await
            .map_err(|_| Failure::Unconfirmed(SchedulerError::Network("等待应答超时".to_string())))?
            .map_err(|e| {
                Failure::Unconfirmed(SchedulerError::Network(format!("读取应答失败: {e}")))
            })?;

        // 对端在应答前已关闭：连接在发送前就失效了，服务端不会处理这一行
        if read == 0 {
            return Err(Failure::NotDelivered(SchedulerError::Network(
                "命令服务关闭了连接".to_string(),
            )));
        }

        match reply.trim() {
            ACK => Ok(()),
            other => Err(Failure::Unconfirmed(SchedulerError::Network(format!(
                "命令未被接收: {other}"
            )))),
        }
    }
}

/// 一次收发失败的原因
enum Failure {
    /// 命令确定没有到达服务端，可以重发
    NotDelivered(SchedulerError),
    /// 命令可能已写入命令槽，重发会导致重复执行
    Unconfirmed(SchedulerError),
}

impl Failure {
    fn into_error(self) -> SchedulerError {
        match self {
            Failure::NotDelivered(e) | Failure::Unconfirmed(e) => e,
        }
    }
}
