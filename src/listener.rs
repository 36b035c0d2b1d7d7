//! 일회용 전송 리스너
//!
//! 세션마다 태스크 하나가 이 상태 기계를 돌린다.
//!
//! ```text
//! PENDING -> LISTENING -> TRANSFERRING -> DONE
//!                 |                        ^
//!                 +--- 유휴 만료 / 취소 ----+
//! ```
//!
//! - accept는 최대 한 번. 연결을 받으면 리스너 소켓을 즉시 닫아
//!   두 번째 접속은 거부된다.
//! - 어떤 경로로 끝나든 [`RetireGuard`]가 세션을 레지스트리에서 제거한다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::registry::RegistryShared;
use crate::session::{SessionId, SessionState, TransferSession};
use crate::source::OpenSource;
use crate::{Config, Error, Result};

/// 전송 완료 후 피어의 연결 종료를 기다리는 최대 시간
const LINGER_DRAIN: Duration = Duration::from_secs(2);

/// 세션 종료 사유
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferResult {
    /// 전체 바이트 전송 완료
    Completed,
    /// 피어 접속 없이 유휴 시간 초과
    IdleTimeout,
    /// 외부 취소 (cancel / shutdown)
    Cancelled,
    /// IO 에러, 쓰기 정지 등
    Failed(String),
}

/// 세션 종료 보고
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub id: SessionId,
    pub name: String,
    pub port: u16,
    pub peer: Option<SocketAddr>,
    /// 전송된 파일 바이트 (이름 헤더 제외)
    pub bytes_sent: u64,
    /// 전송된 바이트의 CRC32
    pub checksum: u32,
    pub result: TransferResult,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        self.result == TransferResult::Completed
    }
}

/// 전송 진행 기록
#[derive(Default)]
pub(crate) struct Progress {
    bytes_sent: u64,
    hasher: crc32fast::Hasher,
}

impl Progress {
    fn record(&mut self, data: &[u8]) {
        self.bytes_sent += data.len() as u64;
        self.hasher.update(data);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// 세션 폐기 보장
///
/// drop 시 상태를 DONE으로 바꾸고 레지스트리에서 제거한 뒤 결과를 알린다.
/// 리스너 태스크가 패닉으로 끝나도 실행된다.
pub(crate) struct RetireGuard {
    registry: Arc<RegistryShared>,
    session: Arc<TransferSession>,
    outcome: Option<(TransferResult, u64, u32)>,
}

impl RetireGuard {
    pub fn new(registry: Arc<RegistryShared>, session: Arc<TransferSession>) -> Self {
        Self {
            registry,
            session,
            outcome: None,
        }
    }

    fn finish(&mut self, result: TransferResult, progress: &Progress) {
        self.outcome = Some((result, progress.bytes_sent(), progress.checksum()));
    }
}

impl Drop for RetireGuard {
    fn drop(&mut self) {
        let (result, bytes_sent, checksum) = self
            .outcome
            .take()
            .unwrap_or_else(|| (TransferResult::Failed("리스너 비정상 종료".into()), 0, 0));

        self.session.transition(SessionState::Done);

        let outcome = TransferOutcome {
            id: self.session.id().clone(),
            name: self.session.name().to_string(),
            port: self.session.port(),
            peer: self.session.peer(),
            bytes_sent,
            checksum,
            result,
        };
        self.registry.retire(&outcome);
    }
}

/// accept 단계 결과
enum AcceptEvent {
    Peer(tokio::net::TcpStream, SocketAddr),
    AcceptFailed(std::io::Error),
    IdleTimeout,
    Cancelled,
}

/// 세션 하나에 묶인 리스너
pub(crate) struct TransferListener {
    session: Arc<TransferSession>,
    listener: TcpListener,
    source: OpenSource,
    idle_timeout: Duration,
    chunk_size: usize,
    stall_timeout: Option<Duration>,
    name_header: bool,
    guard: RetireGuard,
}

impl TransferListener {
    pub fn new(
        session: Arc<TransferSession>,
        listener: TcpListener,
        source: OpenSource,
        config: &Config,
        guard: RetireGuard,
    ) -> Self {
        Self {
            session,
            listener,
            source,
            idle_timeout: config.idle_timeout(),
            chunk_size: config.chunk_size_bytes,
            stall_timeout: config.write_stall_timeout(),
            name_header: config.send_name_header,
            guard,
        }
    }

    /// 상태 기계 실행 (태스크 본체)
    pub async fn run(self) {
        let TransferListener {
            session,
            listener,
            mut source,
            idle_timeout,
            chunk_size,
            stall_timeout,
            name_header,
            mut guard,
        } = self;

        let mut progress = Progress::default();

        let event = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => AcceptEvent::Peer(stream, addr),
                Err(e) => AcceptEvent::AcceptFailed(e),
            },
            _ = tokio::time::sleep(idle_timeout) => AcceptEvent::IdleTimeout,
            _ = session.cancelled() => AcceptEvent::Cancelled,
        };

        // 재무장 없음: 어떤 결과든 리스너 소켓을 먼저 닫는다.
        // TRANSFERRING 관측 시 포트는 반드시 거부 상태. 반대로 닫힌 직후
        // 전이 전까지 짧게 LISTENING이 보일 수 있다 (fetch 결과는 힌트일 뿐).
        drop(listener);

        let (mut stream, peer) = match event {
            AcceptEvent::Peer(stream, addr) => (stream, addr),
            AcceptEvent::AcceptFailed(e) => {
                warn!("세션 {} accept 실패: {}", session.id(), e);
                guard.finish(TransferResult::Failed(e.to_string()), &progress);
                return;
            }
            AcceptEvent::IdleTimeout => {
                info!(
                    "세션 {} 유휴 만료 ({}초), 포트 {} 반환",
                    session.id(),
                    idle_timeout.as_secs(),
                    session.port()
                );
                guard.finish(TransferResult::IdleTimeout, &progress);
                return;
            }
            AcceptEvent::Cancelled => {
                info!("세션 {} 취소 (대기 중)", session.id());
                guard.finish(TransferResult::Cancelled, &progress);
                return;
            }
        };

        session.set_peer(peer);
        session.transition(SessionState::Transferring);
        info!("세션 {} 피어 연결: {} (포트 {})", session.id(), peer, session.port());

        let header = name_header.then(|| name_header_line(session.name()));
        let copied = tokio::select! {
            res = stream_source(
                &mut stream,
                &mut source.reader,
                header.as_deref(),
                chunk_size,
                stall_timeout,
                &mut progress,
            ) => Some(res),
            _ = session.cancelled() => None,
        };

        let result = match copied {
            Some(Ok(())) => {
                drain_until_closed(&mut stream).await;
                info!(
                    "세션 {} 전송 완료: {} bytes -> {}",
                    session.id(),
                    progress.bytes_sent(),
                    peer
                );
                TransferResult::Completed
            }
            Some(Err(e)) => {
                warn!(
                    "세션 {} 전송 실패 ({} bytes 후): {}",
                    session.id(),
                    progress.bytes_sent(),
                    e
                );
                TransferResult::Failed(e.to_string())
            }
            None => {
                info!("세션 {} 취소 (전송 중)", session.id());
                TransferResult::Cancelled
            }
        };

        guard.finish(result, &progress);
    }
}

/// 이름 헤더 한 줄 (개행 문자 제거)
fn name_header_line(name: &str) -> Vec<u8> {
    let clean: String = name.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    format!("Filename: {}\n", clean).into_bytes()
}

/// 소스 바이트를 청크 단위로 복사
///
/// 메모리 사용은 `chunk_size`로 고정된다. 에러 시 재시도하지 않는다.
pub(crate) async fn stream_source<W, R>(
    writer: &mut W,
    reader: &mut R,
    header: Option<&[u8]>,
    chunk_size: usize,
    stall_timeout: Option<Duration>,
    progress: &mut Progress,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    if let Some(header) = header {
        write_chunk(writer, header, stall_timeout).await?;
    }

    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = reader.read(&mut buf).await.map_err(Error::TransferIo)?;
        if n == 0 {
            break;
        }
        write_chunk(writer, &buf[..n], stall_timeout).await?;
        progress.record(&buf[..n]);
    }

    writer.shutdown().await.map_err(Error::TransferIo)?;
    debug!("소스 복사 종료: {} bytes", progress.bytes_sent());
    Ok(())
}

/// 청크 하나 쓰기 + flush (정지 타임아웃 적용)
async fn write_chunk<W>(writer: &mut W, data: &[u8], stall_timeout: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let write = async {
        writer.write_all(data).await?;
        writer.flush().await
    };

    match stall_timeout {
        Some(limit) => tokio::time::timeout(limit, write)
            .await
            .map_err(|_| Error::TransferStalled {
                secs: limit.as_secs(),
            })?
            .map_err(Error::TransferIo),
        None => write.await.map_err(Error::TransferIo),
    }
}

/// 전송 후 피어가 연결을 닫을 때까지 남은 입력을 버린다
///
/// 읽지 않은 수신 데이터가 남은 채 닫으면 RST가 나가 피어 쪽 마지막
/// 바이트가 잘릴 수 있다.
async fn drain_until_closed<S>(stream: &mut S)
where
    S: AsyncRead + Unpin,
{
    let mut sink = [0u8; 1024];
    let drain = async {
        loop {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    };
    let _ = tokio::time::timeout(LINGER_DRAIN, drain).await;
}
