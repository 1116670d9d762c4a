//! JSON Lines 文件读写
//!
//! 同一路径上的写入通过按路径分配的异步互斥锁串行化，
//! 并发调用方不会交错写出半行 JSON。整文件重写先写临时文件再原子改名。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use mission_core::{MissionError, MissionResult};

/// 按路径串行化的写入队列
#[derive(Debug, Default)]
pub struct JsonlWriter {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl JsonlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取某个路径的独占锁，用于需要“读-改-写”的组合操作
    pub async fn lock(&self, path: &Path) -> MissionResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| MissionError::Internal(format!("写入队列锁已损坏: {e}")))?;
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    /// 追加一行，调用方未持有该路径的锁
    pub async fn append<T: Serialize>(&self, path: &Path, value: &T) -> MissionResult<()> {
        let _guard = self.lock(path).await?;
        append_unlocked(path, value).await
    }
}

/// 追加一行，调用方必须已持有该路径的锁
///
/// 上次写入中途崩溃留下的半行没有换行符，先补一个换行，新记录不会被拼进坏行。
pub async fn append_unlocked<T: Serialize>(path: &Path, value: &T) -> MissionResult<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await?;
    let len = file.metadata().await?.len();
    if len > 0 {
        file.seek(std::io::SeekFrom::Start(len - 1)).await?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last).await?;
        if last[0] != b'\n' {
            warn!("日志末尾存在未完成的行，追加前补齐换行: {}", path.display());
            line.insert(0, '\n');
        }
    }
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// 读取全部非空行，文件不存在时返回空
///
/// 按字节切行，不是合法 UTF-8 的行（例如崩溃时写了一半的多字节字符）直接跳过。
pub async fn read_lines(path: &Path) -> MissionResult<Vec<String>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut lines = Vec::new();
    for raw in bytes.split(|b| *b == b'\n') {
        match std::str::from_utf8(raw) {
            Ok(line) => {
                let line = line.trim_end_matches('\r');
                if !line.trim().is_empty() {
                    lines.push(line.to_string());
                }
            }
            Err(e) => debug!("跳过非 UTF-8 的日志行 {}: {}", path.display(), e),
        }
    }
    Ok(lines)
}

/// 读取最后 `max_lines` 行
pub async fn tail_lines(path: &Path, max_lines: usize) -> MissionResult<Vec<String>> {
    let mut lines = read_lines(path).await?;
    let skip = lines.len().saturating_sub(max_lines);
    lines.drain(..skip);
    Ok(lines)
}

/// 把若干行解析为记录，损坏的行跳过
pub fn parse_lines<T: DeserializeOwned>(path: &Path, lines: &[String]) -> Vec<T> {
    lines
        .iter()
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("跳过无法解析的日志行 {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

/// 以临时文件 + 改名的方式整体重写
pub async fn rewrite_lines(path: &Path, lines: &[String]) -> MissionResult<()> {
    let mut content = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    write_atomic(path, content.as_bytes()).await
}

pub async fn write_atomic(path: &Path, bytes: &[u8]) -> MissionResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn file_len(path: &Path) -> MissionResult<u64> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// 把租户、调度等 id 编码成文件名片段
///
/// 字母数字、`-`、`_` 原样保留，其余字节写成 `%XX`，不同的 id 一定得到不同的片段。
/// 空 id 编码为单个 `%`，任何非空 id 都不会产生这个结果。
pub fn encode_component(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_string();
    }
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
