//! 세션/전송 설정

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT_RANGE_MAX,
    DEFAULT_PORT_RANGE_MIN, MAX_CHUNK_SIZE,
};

/// 환경 변수 접두사
pub const ENV_PREFIX: &str = "PORTDROP_";

/// Portdrop 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 동적 포트 범위 하한 (포함)
    pub port_range_min: u16,

    /// 동적 포트 범위 상한 (포함)
    pub port_range_max: u16,

    /// 피어 접속 대기 시간 (초), 초과 시 세션 자동 폐기
    pub idle_timeout_secs: u64,

    /// 전송 복사 단위 (바이트)
    pub chunk_size_bytes: usize,

    /// 리스너 바인드 IP
    pub bind_ip: IpAddr,

    /// 포트 할당 최대 시도 횟수
    pub max_bind_attempts: u32,

    /// 청크 하나를 쓰는 데 허용하는 최대 시간 (초)
    /// None이면 무제한 (피어가 읽지 않으면 영원히 대기)
    pub write_stall_timeout_secs: Option<u64>,

    /// 파일 바이트 앞에 `Filename: <name>\n` 헤더 전송
    pub send_name_header: bool,

    /// listen backlog
    pub listen_backlog: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port_range_min: DEFAULT_PORT_RANGE_MIN,
            port_range_max: DEFAULT_PORT_RANGE_MAX,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_bind_attempts: 64,
            write_stall_timeout_secs: Some(60),
            send_name_header: false,
            listen_backlog: 1,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 루프백 전용 설정 (로컬 테스트, 같은 호스트 내 공유)
    pub fn local_only() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            idle_timeout_secs: 60,
            ..Self::default()
        }
    }

    /// 저메모리 기기용 설정
    pub fn low_memory() -> Self {
        Self {
            chunk_size_bytes: 8 * 1024, // 8KB
            max_bind_attempts: 32,
            ..Self::default()
        }
    }

    /// 기본값 위에 `PORTDROP_*` 환경 변수를 덮어쓴 설정
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키 조회 함수로 설정 구성
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = parse_var(&get, "PORT_RANGE_MIN")? {
            config.port_range_min = v;
        }
        if let Some(v) = parse_var(&get, "PORT_RANGE_MAX")? {
            config.port_range_max = v;
        }
        if let Some(v) = parse_var(&get, "IDLE_TIMEOUT_SECS")? {
            config.idle_timeout_secs = v;
        }
        if let Some(v) = parse_var(&get, "CHUNK_SIZE_BYTES")? {
            config.chunk_size_bytes = v;
        }
        if let Some(v) = parse_var(&get, "BIND_IP")? {
            config.bind_ip = v;
        }
        if let Some(v) = parse_var(&get, "MAX_BIND_ATTEMPTS")? {
            config.max_bind_attempts = v;
        }
        // 0 = 비활성화
        if let Some(v) = parse_var::<u64, _>(&get, "WRITE_STALL_TIMEOUT_SECS")? {
            config.write_stall_timeout_secs = (v > 0).then_some(v);
        }

        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.port_range_min == 0 {
            return Err(Error::InvalidConfig("port_range_min은 0일 수 없음".into()));
        }
        if self.port_range_min > self.port_range_max {
            return Err(Error::InvalidConfig(format!(
                "포트 범위 역전: {} > {}",
                self.port_range_min, self.port_range_max
            )));
        }
        if self.chunk_size_bytes == 0 || self.chunk_size_bytes > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunk_size_bytes는 1..={} 이어야 함: {}",
                MAX_CHUNK_SIZE, self.chunk_size_bytes
            )));
        }
        if self.idle_timeout_secs == 0 {
            return Err(Error::InvalidConfig("idle_timeout_secs는 0일 수 없음".into()));
        }
        if self.max_bind_attempts == 0 {
            return Err(Error::InvalidConfig("max_bind_attempts는 0일 수 없음".into()));
        }
        if self.listen_backlog <= 0 {
            return Err(Error::InvalidConfig("listen_backlog는 양수여야 함".into()));
        }
        Ok(())
    }

    /// 포트 범위 크기
    pub fn port_range_len(&self) -> u32 {
        u32::from(self.port_range_max) - u32::from(self.port_range_min) + 1
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn write_stall_timeout(&self) -> Option<Duration> {
        self.write_stall_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_var<T, G>(get: &G, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::InvalidConfig(format!("{}{} 값 파싱 실패: {:?}", ENV_PREFIX, name, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port_range_min, 49152);
        assert_eq!(config.port_range_max, 65535);
        assert_eq!(config.port_range_len(), 16384);
        assert!(Config::local_only().validate().is_ok());
        assert!(Config::low_memory().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let inverted = Config {
            port_range_min: 60000,
            port_range_max: 50000,
            ..Config::default()
        };
        assert!(matches!(inverted.validate(), Err(Error::InvalidConfig(_))));

        let zero_chunk = Config {
            chunk_size_bytes: 0,
            ..Config::default()
        };
        assert!(zero_chunk.validate().is_err());

        let zero_idle = Config {
            idle_timeout_secs: 0,
            ..Config::default()
        };
        assert!(zero_idle.validate().is_err());

        let single_port = Config {
            port_range_min: 50000,
            port_range_max: 50000,
            ..Config::default()
        };
        assert!(single_port.validate().is_ok());
        assert_eq!(single_port.port_range_len(), 1);
    }

    #[test]
    fn test_env_overlay() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORTDROP_PORT_RANGE_MIN", "50000"),
            ("PORTDROP_PORT_RANGE_MAX", "50100"),
            ("PORTDROP_IDLE_TIMEOUT_SECS", " 5 "),
            ("PORTDROP_BIND_IP", "127.0.0.1"),
            ("PORTDROP_WRITE_STALL_TIMEOUT_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.port_range_min, 50000);
        assert_eq!(config.port_range_max, 50100);
        assert_eq!(config.idle_timeout_secs, 5);
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.write_stall_timeout_secs, None);
        // 지정하지 않은 값은 기본값 유지
        assert_eq!(config.chunk_size_bytes, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_env_parse_error() {
        let result = Config::from_lookup(lookup_from(&[("PORTDROP_CHUNK_SIZE_BYTES", "lots")]));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
