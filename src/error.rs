//! 에러 타입 정의

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Portdrop 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] io::Error),

    #[error("사용 가능한 포트 없음: {min}-{max} 범위에서 {attempts}회 시도")]
    PortExhaustion { min: u16, max: u16, attempts: u32 },

    #[error("세션 없음: id={id}")]
    SessionNotFound { id: String },

    #[error("전송 IO 에러: {0}")]
    TransferIo(io::Error),

    #[error("포트 바인딩 실패: port={port}: {source}")]
    ListenerBind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("전송 정지: {secs}초 동안 쓰기 진행 없음")]
    TransferStalled { secs: u64 },

    #[error("파일 열기 실패: {}: {source}", path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 다른 포트 후보로 재시도할 만한 바인딩 실패인지 여부
    ///
    /// 주소 사용 중/권한 없음은 포트별 문제라 재시도하고,
    /// 그 외(잘못된 bind 주소 등)는 어느 포트에서도 실패하므로 즉시 중단
    pub fn is_retryable_bind(&self) -> bool {
        match self {
            Error::ListenerBind { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
