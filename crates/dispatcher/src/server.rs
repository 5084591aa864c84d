use crontab_core::{SchedulerError, SchedulerResult};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::command_slot::CommandSlot;

/// 命令写入命令槽后的应答
pub const ACK: &str = "ok";
const NACK: &str = "error";

/// 命令服务
///
/// 每个连接上按行读取命令，原样写入命令槽后立即应答 `ok`。
/// 应答只表示命令已被接收，不代表已被执行。
pub struct CommandServer {
    listener: TcpListener,
    slot: CommandSlot,
}

impl CommandServer {
    pub async fn bind(addr: &str, slot: CommandSlot) -> SchedulerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SchedulerError::Network(format!("监听 {addr} 失败: {e}")))?;
        Ok(Self { listener, slot })
    }

    pub fn local_addr(&self) -> SchedulerResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| SchedulerError::Network(e.to_string()))
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> SchedulerResult<()> {
        info!("命令服务已启动: {}", self.local_addr()?);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("命令连接建立: {}", peer);
                        let slot = self.slot.clone();
                        tokio::spawn(handle_connection(stream, peer, slot));
                    }
                    Err(e) => warn!("接受连接失败: {}", e),
                },
                _ = shutdown.recv() => {
                    info!("命令服务收到关闭信号");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, slot: CommandSlot) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("读取命令失败 {}: {}", peer, e);
                break;
            }
        };

        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let reply = match slot.write(raw).await {
            Ok(()) => {
                metrics::counter!("crontab_commands_received_total").increment(1);
                ACK
            }
            Err(e) => {
                error!("写入命令槽失败: {}", e);
                NACK
            }
        };

        if let Err(e) = writer.write_all(format!("{reply}\n").as_bytes()).await {
            warn!("应答 {} 失败: {}", peer, e);
            break;
        }
    }

    debug!("命令连接关闭: {}", peer);
}
