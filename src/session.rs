//! 전송 세션
//!
//! 제공된 파일 하나 = 세션 하나 = 포트 하나.

use std::borrow::Borrow;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::SESSION_ID_LEN;

/// 세션 식별자 (불투명 문자열)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// 무작위 식별자 생성 (소문자 + 숫자)
    ///
    /// 보안 경계가 아니라 우연한 충돌 방지용. 살아있는 세션과의 중복은
    /// 레지스트리가 재생성으로 처리한다.
    pub fn generate() -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// 세션 수명 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// 포트 할당됨, 리스너 미가동
    Pending,
    /// 리스너 가동, 피어 대기
    Listening,
    /// 피어 연결됨, 바이트 전송 중
    Transferring,
    /// 완료 또는 실패 (종단)
    Done,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Pending => "PENDING",
            SessionState::Listening => "LISTENING",
            SessionState::Transferring => "TRANSFERRING",
            SessionState::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// 레지스트리와 리스너 태스크가 공유하는 세션 핸들
#[derive(Debug)]
pub struct TransferSession {
    id: SessionId,
    name: String,
    port: u16,
    size: Option<u64>,
    created_at: Instant,
    state: RwLock<SessionState>,
    peer: RwLock<Option<SocketAddr>>,
    cancel: Notify,
}

impl TransferSession {
    pub(crate) fn new(id: SessionId, name: String, port: u16, size: Option<u64>) -> Self {
        Self {
            id,
            name,
            port,
            size,
            created_at: Instant::now(),
            state: RwLock::new(SessionState::Pending),
            peer: RwLock::new(None),
            cancel: Notify::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.read()
    }

    /// 상태 전이. Done 이후에는 바뀌지 않음
    pub(crate) fn transition(&self, next: SessionState) -> SessionState {
        let mut state = self.state.write();
        let prev = *state;
        if !prev.is_terminal() {
            *state = next;
        }
        prev
    }

    pub(crate) fn set_peer(&self, addr: SocketAddr) {
        *self.peer.write() = Some(addr);
    }

    /// 리스너에 취소 신호 전달
    ///
    /// 리스너가 아직 대기에 들어가지 않았어도 permit이 남아 유실되지 않는다.
    pub(crate) fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.notified().await;
    }

    /// 읽기 전용 스냅샷
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            port: self.port,
            state: self.state(),
            size: self.size,
            peer: self.peer(),
            age: self.created_at.elapsed(),
        }
    }
}

/// 세션 조회 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub port: u16,
    pub state: SessionState,
    pub size: Option<u64>,
    pub peer: Option<SocketAddr>,
    pub age: Duration,
}

/// 게이트웨이용 조회 결과 (포트 + 상태)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchInfo {
    pub port: u16,
    pub state: SessionState,
}

impl From<&SessionInfo> for FetchInfo {
    fn from(info: &SessionInfo) -> Self {
        Self {
            port: info.port,
            state: info.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_id_format() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), SESSION_ID_LEN);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_session_ids_rarely_collide() {
        let ids: HashSet<SessionId> = (0..1000).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_done_is_terminal() {
        let session = TransferSession::new("abc123".into(), "a.bin".into(), 51000, Some(10));
        assert_eq!(session.state(), SessionState::Pending);

        session.transition(SessionState::Listening);
        session.transition(SessionState::Done);
        let prev = session.transition(SessionState::Transferring);

        assert_eq!(prev, SessionState::Done);
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn test_info_snapshot() {
        let session = TransferSession::new("abc123".into(), "a.bin".into(), 51000, Some(10));
        session.transition(SessionState::Listening);

        let info = session.info();
        assert_eq!(info.id.as_str(), "abc123");
        assert_eq!(info.port, 51000);
        assert_eq!(info.state, SessionState::Listening);
        assert_eq!(
            FetchInfo::from(&info),
            FetchInfo {
                port: 51000,
                state: SessionState::Listening
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_before_wait_is_not_lost() {
        let session = TransferSession::new("abc123".into(), "a.bin".into(), 51000, None);
        session.cancel();
        tokio::time::timeout(Duration::from_secs(1), session.cancelled())
            .await
            .unwrap();
    }
}
