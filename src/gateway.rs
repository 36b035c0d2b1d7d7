//! 게이트웨이 어댑터가 사용하는 코어 계약
//!
//! HTTP 라우팅 등 외부 계층은 이 트레이트만 보고 코어를 호출한다.

use std::future::Future;

use crate::registry::SessionRegistry;
use crate::session::{FetchInfo, SessionId};
use crate::source::FileSource;
use crate::Result;

/// 제공(offer) / 조회(fetch) 계약
pub trait TransferCore {
    /// 파일 제공. 포트가 없으면 `PortExhaustion`
    fn offer(&self, source: FileSource, name: &str) -> impl Future<Output = Result<SessionId>> + Send;

    /// 식별자로 포트와 상태 조회. 없거나 이미 폐기됐으면 `SessionNotFound`
    fn fetch(&self, id: &str) -> Result<FetchInfo>;
}

impl TransferCore for SessionRegistry {
    fn offer(&self, source: FileSource, name: &str) -> impl Future<Output = Result<SessionId>> + Send {
        self.create(source, name)
    }

    fn fetch(&self, id: &str) -> Result<FetchInfo> {
        self.lookup(id).map(|info| FetchInfo::from(&info))
    }
}
