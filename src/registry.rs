//! 세션 레지스트리
//!
//! 식별자 -> 세션 테이블. 테이블은 단일 뮤텍스로 보호되며, 락은 맵을
//! 읽고 쓰는 동안에만 잡는다. accept 대기나 바이트 복사 중에는 절대
//! 잡지 않으므로 느린 전송 하나가 다른 세션 생성/조회를 막지 않는다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::listener::{RetireGuard, TransferListener, TransferOutcome};
use crate::port::PortAllocator;
use crate::session::{SessionId, SessionInfo, SessionState, TransferSession};
use crate::source::FileSource;
use crate::stats::{RegistryStats, StatsCounters};
use crate::{Config, Error, Result};

/// 결과 브로드캐스트 채널 용량
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// 뮤텍스 하나로 보호되는 테이블
#[derive(Default)]
struct Table {
    sessions: HashMap<SessionId, Arc<TransferSession>>,
    tasks: Vec<JoinHandle<()>>,
}

/// 레지스트리와 리스너 태스크가 공유하는 상태
pub(crate) struct RegistryShared {
    config: Config,
    allocator: PortAllocator,
    table: Mutex<Table>,
    outcomes: broadcast::Sender<TransferOutcome>,
    stats: StatsCounters,
}

impl RegistryShared {
    /// 세션 제거 (리스너의 RetireGuard만 호출)
    pub(crate) fn retire(&self, outcome: &TransferOutcome) {
        let removed = self.table.lock().sessions.remove(&outcome.id);
        if removed.is_none() {
            warn!("세션 {} 이미 제거됨", outcome.id);
            return;
        }

        self.stats.record_outcome(outcome);
        // 구독자가 없으면 버려도 됨
        let _ = self.outcomes.send(outcome.clone());
        debug!("세션 {} 폐기: {:?}", outcome.id, outcome.result);
    }

    /// 포트 할당 + 세션 등록 (PENDING)
    ///
    /// 살아있는 포트 수집, 바인딩, 삽입을 한 번의 락 안에서 수행한다.
    /// TRANSFERRING 세션은 리스너를 이미 닫았으므로 OS가 중복을 막아주지
    /// 않는다. 락 밖에서 수집하면 그 사이 accept한 세션의 포트를 놓친다.
    pub(crate) fn reserve(
        &self,
        name: &str,
        size: Option<u64>,
    ) -> Result<(Arc<TransferSession>, TcpListener)> {
        let mut table = self.table.lock();

        let reserved: HashSet<u16> = table
            .sessions
            .values()
            .map(|session| session.port())
            .collect();
        let bound = self.allocator.allocate_excluding(&reserved)?;
        let listener = TcpListener::from_std(bound.listener)?;

        let id = loop {
            let candidate = SessionId::generate();
            if !table.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let session = Arc::new(TransferSession::new(
            id.clone(),
            name.to_string(),
            bound.port,
            size,
        ));
        table.sessions.insert(id, session.clone());

        Ok((session, listener))
    }
}

/// 프로세스 단위 세션 레지스트리
///
/// 전역 상태가 아니라 명시적으로 소유되어 필요한 곳에 전달된다.
/// `Clone`은 같은 테이블을 가리키는 핸들을 복제한다.
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

impl SessionRegistry {
    /// 새 레지스트리 생성 (설정 검증 포함)
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let shared = RegistryShared {
            allocator: PortAllocator::new(&config),
            config,
            table: Mutex::new(Table::default()),
            outcomes,
            stats: StatsCounters::default(),
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<RegistryShared> {
        &self.shared
    }

    /// 파일 제공: 포트 할당 -> 세션 등록 -> 리스너 시작 -> id 반환
    ///
    /// 피어 접속을 기다리지 않고 즉시 반환한다. 반환 시점에 포트는 이미
    /// 바인딩되어 있고 세션은 LISTENING 상태다.
    pub async fn create(&self, source: FileSource, name: &str) -> Result<SessionId> {
        let source = source.open().await?;

        let (session, listener) = self.shared.reserve(name, source.size)?;
        let port = session.port();
        self.shared.stats.record_offer();

        let guard = RetireGuard::new(self.shared.clone(), session.clone());
        let transfer = TransferListener::new(
            session.clone(),
            listener,
            source,
            &self.shared.config,
            guard,
        );

        session.transition(SessionState::Listening);
        let handle = tokio::spawn(transfer.run());

        {
            let mut table = self.shared.table.lock();
            table.tasks.retain(|task| !task.is_finished());
            table.tasks.push(handle);
        }

        info!(
            "세션 생성: id={}, name={}, port={}, size={:?}",
            session.id(),
            session.name(),
            port,
            session.size()
        );

        Ok(session.id().clone())
    }

    /// 세션 조회 (읽기 전용)
    pub fn lookup(&self, id: &str) -> Result<SessionInfo> {
        self.shared
            .table
            .lock()
            .sessions
            .get(id)
            .map(|session| session.info())
            .ok_or_else(|| Error::SessionNotFound { id: id.to_string() })
    }

    /// 세션 취소 요청
    ///
    /// 대기 중인 accept나 진행 중인 복사를 중단시킨다. 실제 제거는
    /// 리스너가 스스로 수행한다.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let session = self
            .shared
            .table
            .lock()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound { id: id.to_string() })?;

        info!("세션 {} 취소 요청", id);
        session.cancel();
        Ok(())
    }

    /// 모든 세션 취소 후 리스너 태스크 종료 대기
    pub async fn shutdown(&self) {
        let (sessions, tasks) = {
            let mut table = self.shared.table.lock();
            let sessions: Vec<Arc<TransferSession>> = table.sessions.values().cloned().collect();
            (sessions, std::mem::take(&mut table.tasks))
        };

        info!("레지스트리 종료: 세션 {}개 취소", sessions.len());
        for session in &sessions {
            session.cancel();
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!("리스너 태스크 비정상 종료: {}", e);
            }
        }
    }

    /// 종료 결과 구독
    pub fn subscribe(&self) -> broadcast::Receiver<TransferOutcome> {
        self.shared.outcomes.subscribe()
    }

    /// 살아있는 세션 수
    pub fn len(&self) -> usize {
        self.shared.table.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 살아있는 세션 식별자 목록
    pub fn ids(&self) -> Vec<SessionId> {
        self.shared.table.lock().sessions.keys().cloned().collect()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> RegistryStats {
        let live = self.len();
        self.shared.stats.snapshot(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    use crate::listener::TransferResult;

    fn test_config() -> Config {
        Config {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            idle_timeout_secs: 30,
            chunk_size_bytes: 4096,
            ..Config::default()
        }
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<TransferOutcome>) -> TransferOutcome {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("결과 대기 타임아웃")
            .expect("채널 닫힘")
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            chunk_size_bytes: 0,
            ..test_config()
        };
        assert!(matches!(
            SessionRegistry::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_reserve_skips_port_of_unbound_live_session() {
        let free = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = free.local_addr().unwrap().port();
        drop(free);

        let config = Config {
            port_range_min: port,
            port_range_max: port,
            ..test_config()
        };
        let registry = SessionRegistry::new(config).unwrap();
        let shared = registry.shared();

        let (first, listener) = match shared.reserve("a.bin", None) {
            Ok(reserved) => reserved,
            // 외부 프로세스가 포트를 가져간 환경
            Err(Error::PortExhaustion { .. }) => return,
            Err(e) => panic!("{}", e),
        };
        assert_eq!(first.port(), port);

        // accept 직후처럼 리스너만 닫고 세션은 살아있음
        drop(listener);

        assert!(matches!(
            shared.reserve("b.bin", None),
            Err(Error::PortExhaustion { attempts: 1, .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_offer_then_lookup_is_listening() {
        let registry = SessionRegistry::new(test_config()).unwrap();
        let id = registry
            .create(FileSource::from(b"hello".to_vec()), "hello.txt")
            .await
            .unwrap();

        let info = registry.lookup(id.as_str()).unwrap();
        assert_eq!(info.state, SessionState::Listening);
        assert_eq!(info.name, "hello.txt");
        assert_eq!(info.size, Some(5));
        assert!((49152..=65535).contains(&info.port));
        assert_eq!(registry.len(), 1);

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_lookup_unknown_id() {
        let registry = SessionRegistry::new(test_config()).unwrap();
        assert!(matches!(
            registry.lookup("nope"),
            Err(Error::SessionNotFound { .. })
        ));
        assert!(matches!(
            registry.cancel("nope"),
            Err(Error::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_fails_offer() {
        let registry = SessionRegistry::new(test_config()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = registry
            .create(FileSource::Path(dir.path().join("missing.bin")), "missing.bin")
            .await;
        assert!(matches!(result, Err(Error::SourceOpen { .. })));
        assert!(registry.is_empty());
        assert_eq!(registry.stats().offered, 0);
    }

    #[tokio::test]
    async fn test_distinct_ids_and_ports() {
        let registry = SessionRegistry::new(test_config()).unwrap();

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for i in 0..20 {
            let id = registry
                .create(FileSource::from(vec![i as u8; 16]), "f.bin")
                .await
                .unwrap();
            ports.insert(registry.lookup(id.as_str()).unwrap().port);
            ids.insert(id);
        }

        assert_eq!(ids.len(), 20);
        assert_eq!(ports.len(), 20);
        assert_eq!(registry.ids().len(), 20);

        registry.shutdown().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_transfer_retires_session() {
        let registry = SessionRegistry::new(test_config()).unwrap();
        let mut outcomes = registry.subscribe();

        let data = Bytes::from((0..50_000u32).map(|i| i as u8).collect::<Vec<u8>>());
        let id = registry
            .create(FileSource::from(data.clone()), "data.bin")
            .await
            .unwrap();
        let port = registry.lookup(id.as_str()).unwrap().port;

        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        drop(stream);

        assert_eq!(received, data.as_ref());

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.id, id);
        assert_eq!(outcome.result, TransferResult::Completed);
        assert_eq!(outcome.bytes_sent, data.len() as u64);
        assert_eq!(outcome.checksum, crc32fast::hash(&data));

        assert!(matches!(
            registry.lookup(id.as_str()),
            Err(Error::SessionNotFound { .. })
        ));
        let stats = registry.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.live_sessions, 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_releases_port() {
        let config = Config {
            idle_timeout_secs: 1,
            ..test_config()
        };
        let registry = SessionRegistry::new(config).unwrap();
        let mut outcomes = registry.subscribe();

        let id = registry
            .create(FileSource::from(b"never fetched".to_vec()), "idle.txt")
            .await
            .unwrap();
        let port = registry.lookup(id.as_str()).unwrap().port;

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.result, TransferResult::IdleTimeout);
        assert!(registry.lookup(id.as_str()).is_err());
        assert_eq!(registry.stats().idle_expired, 1);

        // 포트가 다시 바인딩 가능해야 함
        std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_interrupts_accept() {
        let registry = SessionRegistry::new(test_config()).unwrap();
        let mut outcomes = registry.subscribe();

        let id = registry
            .create(FileSource::from(b"bye".to_vec()), "bye.txt")
            .await
            .unwrap();
        let port = registry.lookup(id.as_str()).unwrap().port;

        registry.cancel(id.as_str()).unwrap();

        let outcome = next_outcome(&mut outcomes).await;
        assert_eq!(outcome.result, TransferResult::Cancelled);
        assert!(registry.is_empty());
        assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_retires_everything() {
        let registry = SessionRegistry::new(test_config()).unwrap();
        for _ in 0..5 {
            registry
                .create(FileSource::from(b"x".to_vec()), "x")
                .await
                .unwrap();
        }
        assert_eq!(registry.len(), 5);

        registry.shutdown().await;

        assert!(registry.is_empty());
        let stats = registry.stats();
        assert_eq!(stats.offered, 5);
        assert_eq!(stats.cancelled, 5);
    }
}
