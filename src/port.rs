//! 동적 포트 할당
//!
//! 후보 선택과 바인딩을 한 번에 수행한다. 할당이 끝난 포트는 이미
//! listen 상태이므로 다른 프로세스가 끼어들 틈이 없다.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr, TcpListener};

use rand::Rng;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info};

use crate::{Config, Error, Result};

/// 바인딩이 끝난 포트
#[derive(Debug)]
pub struct BoundPort {
    /// 할당된 포트 번호
    pub port: u16,

    /// listen 중인 non-blocking 소켓
    pub listener: TcpListener,
}

/// 동적 포트 할당기 (범위 외 상태 없음)
#[derive(Debug, Clone)]
pub struct PortAllocator {
    min: u16,
    max: u16,
    max_attempts: u32,
    bind_ip: IpAddr,
    backlog: i32,
}

impl PortAllocator {
    pub fn new(config: &Config) -> Self {
        Self {
            min: config.port_range_min,
            max: config.port_range_max,
            max_attempts: config.max_bind_attempts,
            bind_ip: config.bind_ip,
            backlog: config.listen_backlog,
        }
    }

    /// 범위 내 바인딩 가능한 포트를 찾아 바인딩까지 수행
    ///
    /// 무작위 시작점에서 순차 탐색(범위 끝에서 wrap-around)하며
    /// 서로 다른 후보를 최대 `min(max_attempts, 범위 크기)`개 시도한다.
    pub fn allocate(&self) -> Result<BoundPort> {
        self.allocate_excluding(&HashSet::new())
    }

    /// `reserved`에 든 포트는 바인딩을 시도하지 않고 건너뛴다 (시도 횟수에는 포함)
    pub fn allocate_excluding(&self, reserved: &HashSet<u16>) -> Result<BoundPort> {
        let span = u32::from(self.max) - u32::from(self.min) + 1;
        let attempts = self.max_attempts.min(span);
        let start = rand::thread_rng().gen_range(0..span);

        for i in 0..attempts {
            let port = (u32::from(self.min) + (start + i) % span) as u16;
            if reserved.contains(&port) {
                continue;
            }

            match self.try_bind(port) {
                Ok(listener) => {
                    info!("포트 {} 바인딩 ({}번째 시도)", port, i + 1);
                    return Ok(BoundPort { port, listener });
                }
                Err(e) if e.is_retryable_bind() => {
                    debug!("포트 {} 사용 불가, 다음 후보: {}", port, e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::PortExhaustion {
            min: self.min,
            max: self.max,
            attempts,
        })
    }

    /// 단일 후보 포트에 바인딩 + listen
    fn try_bind(&self, port: u16) -> Result<TcpListener> {
        let addr = SocketAddr::new(self.bind_ip, port);
        let bind_err = |source: std::io::Error| Error::ListenerBind { port, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;

        // TIME_WAIT 잔여 연결이 있어도 재바인딩 허용 (리스너 중복은 여전히 불가)
        #[cfg(unix)]
        socket.set_reuse_address(true).map_err(bind_err)?;

        socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
        socket.listen(self.backlog).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        Ok(TcpListener::from(socket))
    }
}
