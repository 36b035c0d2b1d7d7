//! # Portdrop
//!
//! 일회용 TCP 파일 제공 코어
//!
//! ## 핵심 특징
//! - **포트당 파일 하나**: 제공할 때마다 동적 범위에서 충돌 없는 포트 할당
//! - **일회용 리스너**: 피어 하나만 accept, 이후 포트 즉시 닫힘
//! - **자동 회수**: 완료/실패/유휴 만료 어느 경로든 세션과 포트 반환
//! - **고정 메모리**: 청크 단위 복사로 파일 크기와 무관한 메모리 사용
//!
//! ```no_run
//! use portdrop::{Config, FileSource, SessionRegistry, TransferCore};
//!
//! # async fn demo() -> portdrop::Result<()> {
//! let registry = SessionRegistry::new(Config::default())?;
//! let id = registry.offer(FileSource::Path("report.pdf".into()), "report.pdf").await?;
//! let info = registry.fetch(id.as_str())?;
//! println!("{} -> port {}", id, info.port);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod port;
pub mod registry;
pub mod session;
pub mod source;
pub mod stats;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::TransferCore;
pub use listener::{TransferOutcome, TransferResult};
pub use port::{BoundPort, PortAllocator};
pub use registry::SessionRegistry;
pub use session::{FetchInfo, SessionId, SessionInfo, SessionState, TransferSession};
pub use source::FileSource;
pub use stats::RegistryStats;

/// 동적 포트 범위 하한 (IANA)
pub const DEFAULT_PORT_RANGE_MIN: u16 = 49152;

/// 동적 포트 범위 상한
pub const DEFAULT_PORT_RANGE_MAX: u16 = 65535;

/// 기본 유휴 만료 시간 (초)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// 청크 크기 상한
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// 세션 식별자 길이
pub const SESSION_ID_LEN: usize = 8;
