//! Portdrop 클라이언트 (수신자)
//!
//! 제공된 포트에 접속해 파일 바이트를 끝까지 받아 저장한다.
//!
//! 사용법:
//!   cargo run --release --bin portdrop-client -- --addr <HOST:PORT> --out <PATH>
//!
//! 예시:
//!   cargo run --release --bin portdrop-client -- -a 192.168.0.10:51000 -o received.bin

use std::path::PathBuf;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use portdrop::DEFAULT_CHUNK_SIZE;

/// 클라이언트 설정
struct ClientConfig {
    addr: String,
    output_path: Option<PathBuf>,
    name_header: bool,
}

fn usage() -> &'static str {
    r#"Portdrop Client - 일회용 포트에서 파일 수신

사용법:
  portdrop-client --addr <HOST:PORT> [--out <PATH>]

옵션:
  -a, --addr <HOST:PORT>     제공자 주소
  -o, --out <PATH>           저장 경로 (기본: 헤더의 파일명 또는 received.bin)
  --name-header              첫 줄의 `Filename: <name>` 헤더 해석
  -h, --help                 이 도움말 출력
"#
}

fn parse_args() -> Result<ClientConfig, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut addr = None;
    let mut output_path = None;
    let mut name_header = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" | "-a" => {
                addr = Some(args.get(i + 1).ok_or("--addr 값 필요")?.clone());
                i += 1;
            }
            "--out" | "-o" => {
                output_path = Some(PathBuf::from(args.get(i + 1).ok_or("--out 값 필요")?));
                i += 1;
            }
            "--name-header" => {
                name_header = true;
            }
            "--help" | "-h" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    Ok(ClientConfig {
        addr: addr.ok_or("--addr 필요")?,
        output_path,
        name_header,
    })
}

/// 헤더에서 파일명만 추출 (경로 구성요소 제거)
fn header_file_name(line: &str) -> Option<String> {
    let name = line.strip_prefix("Filename: ")?.trim_end();
    let base = std::path::Path::new(name).file_name()?;
    Some(base.to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = match parse_args() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, usage());
            std::process::exit(2);
        }
    };

    info!("Connecting to {}...", client_config.addr);
    let stream = TcpStream::connect(&client_config.addr).await?;
    let mut reader = BufReader::with_capacity(DEFAULT_CHUNK_SIZE, stream);

    let mut header_name = None;
    if client_config.name_header {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        header_name = header_file_name(&line);
        info!("Header file name: {:?}", header_name);
    }

    let output_path = client_config
        .output_path
        .or_else(|| header_name.map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("received.bin"));
    let mut file = File::create(&output_path).await?;

    let start = Instant::now();
    let mut hasher = crc32fast::Hasher::new();
    let mut total = 0u64;
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    file.flush().await?;

    let elapsed = start.elapsed();
    let throughput = total as f64 / elapsed.as_secs_f64().max(0.000_001) / 1_000_000.0;

    info!("Transfer complete!");
    info!("  Saved: {}", output_path.display());
    info!("  Size: {} bytes", total);
    info!("  CRC32: {:08x}", hasher.finalize());
    info!("  Time: {:.2}s ({:.2} MB/s)", elapsed.as_secs_f64(), throughput);

    Ok(())
}
