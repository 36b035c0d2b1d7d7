//! 파일 소스
//!
//! 세션은 파일 수명을 소유하지 않는다. 전송 한 번 동안 읽기 핸들만 보유한다.

use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::{Error, Result};

/// 제공할 파일의 바이트 출처
pub enum FileSource {
    /// 디스크 상의 파일 (제공 시점에 열림)
    Path(PathBuf),

    /// 메모리 버퍼
    Memory(Bytes),

    /// 임의의 읽기 스트림 (크기 미상)
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            FileSource::Memory(data) => write!(f, "Memory({} bytes)", data.len()),
            FileSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        FileSource::Path(path)
    }
}

impl From<Bytes> for FileSource {
    fn from(data: Bytes) -> Self {
        FileSource::Memory(data)
    }
}

impl From<Vec<u8>> for FileSource {
    fn from(data: Vec<u8>) -> Self {
        FileSource::Memory(Bytes::from(data))
    }
}

/// 열린 읽기 핸들
pub(crate) struct OpenSource {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: Option<u64>,
}

impl FileSource {
    /// 읽기 핸들 열기
    ///
    /// 같은 경로를 두 번 제공하면 핸들도 두 개가 되어 독립적으로 읽힌다.
    pub(crate) async fn open(self) -> Result<OpenSource> {
        match self {
            FileSource::Path(path) => {
                let file = File::open(&path).await.map_err(|source| Error::SourceOpen {
                    path: path.clone(),
                    source,
                })?;
                let meta = file
                    .metadata()
                    .await
                    .map_err(|source| Error::SourceOpen { path, source })?;

                Ok(OpenSource {
                    reader: Box::new(file),
                    size: Some(meta.len()),
                })
            }
            FileSource::Memory(data) => Ok(OpenSource {
                size: Some(data.len() as u64),
                reader: Box::new(Cursor::new(data)),
            }),
            FileSource::Reader(reader) => Ok(OpenSource { reader, size: None }),
        }
    }
}
