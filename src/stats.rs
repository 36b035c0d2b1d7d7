//! 전송 통계

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::listener::{TransferOutcome, TransferResult};

/// 레지스트리 누적 카운터
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    offered: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    idle_expired: AtomicU64,
    cancelled: AtomicU64,
    bytes_sent: AtomicU64,
}

impl StatsCounters {
    pub fn record_offer(&self) {
        self.offered.fetch_add(1, Ordering::Relaxed);
    }

    /// 세션 종료 결과 반영
    pub fn record_outcome(&self, outcome: &TransferOutcome) {
        let counter = match outcome.result {
            TransferResult::Completed => &self.completed,
            TransferResult::IdleTimeout => &self.idle_expired,
            TransferResult::Cancelled => &self.cancelled,
            TransferResult::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add(outcome.bytes_sent, Ordering::Relaxed);
    }

    pub fn snapshot(&self, live_sessions: usize) -> RegistryStats {
        RegistryStats {
            offered: self.offered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            idle_expired: self.idle_expired.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            live_sessions,
        }
    }
}

/// 레지스트리 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// 총 제공(offer) 수
    pub offered: u64,

    /// 전송 완료 세션 수
    pub completed: u64,

    /// IO 에러/정지로 실패한 세션 수
    pub failed: u64,

    /// 피어 없이 만료된 세션 수
    pub idle_expired: u64,

    /// 취소된 세션 수
    pub cancelled: u64,

    /// 총 전송 바이트
    pub bytes_sent: u64,

    /// 현재 살아있는 세션 수
    pub live_sessions: usize,
}

impl RegistryStats {
    /// 종료된 세션 수
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.idle_expired + self.cancelled
    }

    /// 종료 세션 중 성공 비율
    pub fn success_rate(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            return 0.0;
        }
        self.completed as f64 / finished as f64
    }
}
