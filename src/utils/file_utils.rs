use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs as tokio_fs;
use uuid::Uuid;

/// 目录不存在、只读，或在 unix 上缺少所有者的写/执行位时视为不可访问。
pub fn is_inaccessible(dir: &Path) -> bool {
    let metadata = match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => metadata,
        _ => return true,
    };

    if metadata.permissions().readonly() {
        return true;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o300 != 0o300 {
            return true;
        }
    }

    false
}

// 优先原子重命名；跨设备时退化为复制后删除
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio_fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            log::debug!("重命名失败 {} -> {}: {}，改为复制", from.display(), to.display(), rename_err);
            copy_into_place(from, to).await.map_err(|e| {
                log::warn!("复制失败 {} -> {}: {}", from.display(), to.display(), e);
                rename_err
            })?;
            if let Err(e) = tokio_fs::remove_file(from).await {
                log::warn!("删除已复制的源文件失败 {}: {}", from.display(), e);
            }
            Ok(())
        }
    }
}

// 先复制到目标旁边的临时文件再改名，目标路径上只会出现完整的文件
async fn copy_into_place(from: &Path, to: &Path) -> std::io::Result<()> {
    let parent = to.parent().unwrap_or_else(|| Path::new("."));
    let staging = parent.join(format!(".moving-{}", Uuid::new_v4()));
    let staging_guard = scopeguard::guard(staging, |path| {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("删除复制临时文件失败 {}: {}", path.display(), e);
            }
        }
    });

    tokio_fs::copy(from, &*staging_guard).await?;
    tokio_fs::rename(&*staging_guard, to).await?;
    scopeguard::ScopeGuard::into_inner(staging_guard);
    Ok(())
}

/// 递归删除目录，失败只记录日志（清理属于尽力而为）
pub fn remove_dir_logged(dir: &Path) -> bool {
    match fs::remove_dir_all(dir) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            log::warn!("删除目录失败 {}: {}", dir.display(), e);
            false
        }
    }
}

pub fn list_regular_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// 距离最后修改时间过了多久；时钟回拨时按 0 计算
pub fn modified_age(path: &Path) -> std::io::Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(SystemTime::now().duration_since(modified).unwrap_or_default())
}

// 递归统计文件数量和大小
pub fn count_files_recursive(
    path: &Path,
    file_count: &mut usize,
    total_size: &mut u64,
) -> std::io::Result<()> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;

        if file_type.is_file() {
            *file_count += 1;
            if let Ok(metadata) = entry.metadata() {
                *total_size += metadata.len();
            }
        } else if file_type.is_dir() {
            count_files_recursive(&entry.path(), file_count, total_size)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_plain_files_are_inaccessible() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_inaccessible(dir.path()));
        assert!(is_inaccessible(&dir.path().join("nope")));

        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(is_inaccessible(&file));
    }

    #[tokio::test]
    async fn move_file_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();

        move_file(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"new");
    }

    #[tokio::test]
    async fn copy_fallback_only_exposes_complete_files() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("spooled");
        let target_dir = dir.path().join("chunks");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(&from, vec![7u8; 64 * 1024]).unwrap();
        fs::write(target_dir.join("0"), b"stale").unwrap();

        copy_into_place(&from, &target_dir.join("0")).await.unwrap();

        assert_eq!(fs::read(target_dir.join("0")).unwrap(), vec![7u8; 64 * 1024]);
        let names: Vec<_> = fs::read_dir(&target_dir).unwrap().flatten().map(|e| e.file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("0")]);
    }

    #[tokio::test]
    async fn failed_copy_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("0");

        assert!(copy_into_place(&dir.path().join("missing"), &target).await.is_err());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x/y")).unwrap();
        fs::write(dir.path().join("x/a"), b"12").unwrap();
        fs::write(dir.path().join("x/y/b"), b"345").unwrap();

        let (mut count, mut size) = (0, 0);
        count_files_recursive(dir.path(), &mut count, &mut size).unwrap();
        assert_eq!((count, size), (2, 5));
        assert_eq!(list_regular_files(&dir.path().join("x")).unwrap().len(), 1);
    }
}
