use rand::Rng;
use std::collections::HashMap as StdHashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock as StdOnceLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const MAX_MEMORY_LOCKS: usize = 10000;

#[derive(Debug, Clone)]
pub struct FileLockEntry {
    pub lock: Arc<Mutex<()>>,
    pub last_used: Instant,
}

impl FileLockEntry {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            last_used: Instant::now(),
        }
    }

    pub fn update_usage(&mut self) {
        self.last_used = Instant::now();
    }

    fn in_use(&self) -> bool {
        Arc::strong_count(&self.lock) > 1
    }
}

static FILE_LOCKS: StdOnceLock<Mutex<StdHashMap<String, FileLockEntry>>> = StdOnceLock::new();

// 获取或创建目录级锁
pub async fn get_file_lock(key: &str) -> Arc<Mutex<()>> {
    let map = FILE_LOCKS.get_or_init(|| Mutex::new(StdHashMap::new()));
    let mut guard = map.lock().await;

    // 锁数量过多时，淘汰最久未使用且没人持有的
    if guard.len() >= MAX_MEMORY_LOCKS {
        let mut idle: Vec<(String, Instant)> = guard
            .iter()
            .filter(|(_, entry)| !entry.in_use())
            .map(|(k, entry)| (k.clone(), entry.last_used))
            .collect();
        idle.sort_by(|a, b| a.1.cmp(&b.1));

        let evict = guard.len() - (MAX_MEMORY_LOCKS * 8) / 10;
        for (k, _) in idle.into_iter().take(evict) {
            guard.remove(&k);
        }
        log::info!("清理目录锁，当前数量: {}", guard.len());
    }

    let entry = guard.entry(key.to_string())
        .or_insert_with(FileLockEntry::new);
    entry.update_usage();
    entry.lock.clone()
}

// 定期清理长时间未使用的锁
pub async fn cleanup_file_locks(max_age: Duration) -> usize {
    let now = Instant::now();

    if let Some(map) = FILE_LOCKS.get() {
        let mut guard = map.lock().await;
        let initial_len = guard.len();
        guard.retain(|_, entry| entry.in_use() || now.duration_since(entry.last_used) < max_age);
        let cleaned = initial_len - guard.len();
        if cleaned > 0 {
            log::info!("清理了 {} 个过期的目录锁", cleaned);
        }
        cleaned
    } else {
        0
    }
}

// 获取锁数量（用于监控）
pub async fn get_file_lock_count() -> usize {
    if let Some(map) = FILE_LOCKS.get() {
        let guard = map.lock().await;
        guard.len()
    } else {
        0
    }
}

fn split_name(filename: &str) -> (String, String) {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("file")
        .to_string();
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    (stem, ext)
}

/// 在共享目录里占用一个不存在的文件名，并创建空文件占位。
///
/// 名字被占用时追加随机递增的数字后缀（`name-537.ext`）再试。占位用
/// `create_new`，即使其他进程同时写这个目录也不会拿到同一个名字；
/// 同一进程内的检查-占用过程由该目录的锁串行化。
pub async fn allocate_unique_path(dir: &Path, filename: &str) -> std::io::Result<PathBuf> {
    let lock = get_file_lock(&dir.to_string_lossy()).await;
    let _held = lock.lock().await;

    let (stem, ext) = split_name(filename);
    let mut candidate = format!("{}{}", stem, ext);
    let mut suffix: u64 = 0;

    loop {
        let path = dir.join(&candidate);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                suffix += rand::rng().random_range(1..=999u64);
                candidate = format!("{}-{}{}", stem, suffix, ext);
            }
            Err(e) => {
                log::error!("无法在 {} 创建占位文件 {}: {}", dir.display(), candidate, e);
                return Err(e);
            }
        }
    }
}
