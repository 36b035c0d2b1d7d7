//! Portdrop 서버 (제공자)
//!
//! 파일마다 일회용 포트를 열고 식별자와 포트를 출력한다.
//! 모든 세션이 끝나거나 Ctrl-C를 받으면 종료.
//!
//! 사용법:
//!   cargo run --release --bin portdrop-server -- [OPTIONS] -f <PATH>...
//!
//! 예시:
//!   # 파일 두 개 제공
//!   cargo run --release --bin portdrop-server -- -f a.bin -f b.bin
//!
//!   # 루프백 전용, 30초 유휴 만료
//!   cargo run --release --bin portdrop-server -- -f a.bin --bind-ip 127.0.0.1 --idle-timeout 30

use std::net::IpAddr;
use std::path::PathBuf;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use portdrop::{Config, FileSource, SessionRegistry, TransferCore};

/// 서버 설정
struct ServerConfig {
    files: Vec<PathBuf>,
    config: Config,
}

fn usage() -> &'static str {
    r#"Portdrop Server - 일회용 TCP 파일 제공

사용법:
  portdrop-server [OPTIONS] -f <PATH>...

옵션:
  -f, --file <PATH>          제공할 파일 (반복 가능)
  --bind-ip <IP>             바인드 IP (기본: 0.0.0.0)
  --port-min <PORT>          포트 범위 하한 (기본: 49152)
  --port-max <PORT>          포트 범위 상한 (기본: 65535)
  --idle-timeout <SECS>      피어 대기 시간 (기본: 300)
  --chunk-size <BYTES>       복사 청크 크기 (기본: 65536)
  --name-header              파일 앞에 `Filename: <name>` 줄 전송
  -h, --help                 이 도움말 출력

환경 변수 PORTDROP_* 로도 설정 가능 (명령행이 우선)
"#
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let raw = args
        .get(i + 1)
        .ok_or_else(|| format!("{} 값 필요", flag))?;
    raw.parse()
        .map_err(|_| format!("{} 값이 올바르지 않음: {}", flag, raw))
}

fn parse_args(base: Config) -> Result<ServerConfig, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig {
        files: Vec::new(),
        config: base,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                config.files.push(parse_value::<PathBuf>(&args, i, "--file")?);
                i += 1;
            }
            "--bind-ip" => {
                config.config.bind_ip = parse_value::<IpAddr>(&args, i, "--bind-ip")?;
                i += 1;
            }
            "--port-min" => {
                config.config.port_range_min = parse_value(&args, i, "--port-min")?;
                i += 1;
            }
            "--port-max" => {
                config.config.port_range_max = parse_value(&args, i, "--port-max")?;
                i += 1;
            }
            "--idle-timeout" => {
                config.config.idle_timeout_secs = parse_value(&args, i, "--idle-timeout")?;
                i += 1;
            }
            "--chunk-size" => {
                config.config.chunk_size_bytes = parse_value(&args, i, "--chunk-size")?;
                i += 1;
            }
            "--name-header" => {
                config.config.send_name_header = true;
            }
            "--help" | "-h" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    if config.files.is_empty() {
        return Err("제공할 파일이 없음 (-f <PATH>)".into());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server_config = match parse_args(Config::from_env()?) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, usage());
            std::process::exit(2);
        }
    };

    let config = server_config.config;
    info!("Portdrop Server starting...");
    info!("Bind IP: {}", config.bind_ip);
    info!("Port range: {}-{}", config.port_range_min, config.port_range_max);
    info!("Idle timeout: {}s", config.idle_timeout_secs);
    info!("Chunk size: {} bytes", config.chunk_size_bytes);

    let registry = SessionRegistry::new(config)?;
    let mut outcomes = registry.subscribe();

    for path in &server_config.files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let id = registry.offer(FileSource::Path(path.clone()), &name).await?;
        let info = registry.fetch(id.as_str())?;
        println!("{} {} {}", id, info.port, path.display());
    }

    while !registry.is_empty() {
        tokio::select! {
            received = outcomes.recv() => match received {
                Ok(outcome) => {
                    info!(
                        "세션 {} 종료: {:?}, {} bytes, crc32={:08x}",
                        outcome.id, outcome.result, outcome.bytes_sent, outcome.checksum
                    );
                }
                Err(RecvError::Lagged(n)) => warn!("결과 {}건 누락", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C 수신, 종료 중...");
                registry.shutdown().await;
                break;
            }
        }
    }

    let stats = registry.stats();
    info!(
        "종료: offered={}, completed={}, failed={}, idle_expired={}, cancelled={}, bytes={}",
        stats.offered,
        stats.completed,
        stats.failed,
        stats.idle_expired,
        stats.cancelled,
        stats.bytes_sent
    );

    Ok(())
}
