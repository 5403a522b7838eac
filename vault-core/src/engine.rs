use crate::error::{Result, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 一次引擎调用的输入描述
#[derive(Debug, Clone)]
pub struct EngineSpec {
    /// 要备份的目录列表
    pub source_dirs: Vec<PathBuf>,
    /// 备份产物写入路径
    pub destination: PathBuf,
    /// 是否压缩
    pub compress: bool,
    /// 压缩级别 (0-9)
    pub compression_level: u32,
    /// 增量备份的起点：只收集此时刻之后修改的文件
    pub since: Option<DateTime<Utc>>,
}

/// 引擎调用的结果指标
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub raw_size: u64,
    pub compressed_size: Option<u64>,
    pub checksum: String,
    /// 增量备份捕获的变更文件数
    pub changes_captured: Option<u64>,
    /// 引擎上报的部分完成（部分文件被跳过）
    pub partial: bool,
    pub location: String,
}

/// 恢复调用的结果指标
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub records_recovered: u64,
    pub bytes_recovered: u64,
}

/// 抽象备份引擎
///
/// 编排器只负责状态机和簿记，真正搬运字节的机制在这条trait后面。
/// 生产实现走本地归档或对象存储，单元测试注入测试替身。
#[async_trait]
pub trait BackupEngine: Send + Sync {
    /// 执行备份，返回大小、校验和等指标
    async fn run(&self, spec: &EngineSpec) -> Result<EngineReport>;

    /// 从备份产物恢复到目标目录
    async fn restore(&self, artifact: &Path, target: &Path) -> Result<RestoreReport>;

    /// 重新计算备份产物的校验和
    async fn checksum(&self, artifact: &Path) -> Result<String>;

    /// 结构检查：产物是否可以完整遍历
    async fn validate_structure(&self, artifact: &Path) -> Result<bool>;
}

/// 本地tar.gz归档引擎
#[derive(Debug, Clone, Default)]
pub struct LocalArchiveEngine;

impl LocalArchiveEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BackupEngine for LocalArchiveEngine {
    async fn run(&self, spec: &EngineSpec) -> Result<EngineReport> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::fs::File;
        use tar::Builder;

        // 源目录缺失属于致命错误，重试也不会出现
        for source_dir in &spec.source_dirs {
            if !source_dir.exists() {
                return Err(VaultError::fatal(format!(
                    "源目录不存在: {}",
                    source_dir.display()
                )));
            }
        }

        if let Some(parent) = spec.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let spec = spec.clone();

        // 在后台线程中执行压缩操作，避免阻塞异步运行时
        let report = tokio::task::spawn_blocking(move || {
            let file = File::create(&spec.destination)
                .map_err(|e| VaultError::transient(format!("创建归档文件失败: {e}")))?;
            let compression = if spec.compress {
                Compression::new(spec.compression_level)
            } else {
                Compression::none()
            };
            let encoder = GzEncoder::new(file, compression);
            let mut archive = Builder::new(encoder);

            let since = spec.since.map(std::time::SystemTime::from);
            let mut raw_size = 0u64;
            let mut captured = 0u64;

            for source_dir in &spec.source_dirs {
                let dir_name = source_dir
                    .file_name()
                    .ok_or_else(|| VaultError::fatal("无法获取目录名".to_string()))?
                    .to_string_lossy()
                    .to_string();

                for entry in WalkDir::new(source_dir) {
                    let entry =
                        entry.map_err(|e| VaultError::transient(format!("遍历目录失败: {e}")))?;
                    let path = entry.path();

                    if !path.is_file() {
                        continue;
                    }

                    let metadata = entry
                        .metadata()
                        .map_err(|e| VaultError::transient(format!("读取文件元数据失败: {e}")))?;

                    // 增量模式：跳过起点之前就已存在且未修改的文件
                    if let Some(since) = since {
                        match metadata.modified() {
                            Ok(modified) if modified <= since => continue,
                            _ => {}
                        }
                    }

                    let relative_path = path.strip_prefix(source_dir)?;

                    // tar归档内部使用Unix风格路径（/），跨平台兼容
                    let archive_path = if cfg!(windows) {
                        format!(
                            "{}/{}",
                            dir_name,
                            relative_path.display().to_string().replace('\\', "/")
                        )
                    } else {
                        format!("{}/{}", dir_name, relative_path.display())
                    };

                    archive
                        .append_path_with_name(path, archive_path)
                        .map_err(|e| {
                            VaultError::transient(format!("添加文件到归档失败: {e}"))
                        })?;

                    raw_size += metadata.len();
                    captured += 1;
                }
            }

            archive
                .finish()
                .map_err(|e| VaultError::transient(format!("完成归档失败: {e}")))?;

            // 产物写完后计算校验和与压缩后大小
            let compressed_size = std::fs::metadata(&spec.destination)?.len();
            let checksum = sha256_file(&spec.destination)?;

            Ok::<EngineReport, VaultError>(EngineReport {
                raw_size,
                compressed_size: if spec.compress {
                    Some(compressed_size)
                } else {
                    None
                },
                checksum,
                changes_captured: spec.since.map(|_| captured),
                partial: false,
                location: spec.destination.to_string_lossy().to_string(),
            })
        })
        .await??;

        Ok(report)
    }

    async fn restore(&self, artifact: &Path, target: &Path) -> Result<RestoreReport> {
        use flate2::read::GzDecoder;
        use std::fs::File;
        use tar::Archive;

        if !artifact.exists() {
            return Err(VaultError::not_found(format!(
                "备份产物不存在: {}",
                artifact.display()
            )));
        }

        tokio::fs::create_dir_all(target).await?;

        let artifact = artifact.to_path_buf();
        let target = target.to_path_buf();

        // 在后台线程中执行解压操作
        let report = tokio::task::spawn_blocking(move || {
            let file = File::open(&artifact)?;
            let decoder = GzDecoder::new(file);
            let mut archive = Archive::new(decoder);

            let mut records = 0u64;
            let mut bytes = 0u64;

            for entry in archive
                .entries()
                .map_err(|e| VaultError::fatal(format!("读取归档失败: {e}")))?
            {
                let mut entry =
                    entry.map_err(|e| VaultError::fatal(format!("读取归档条目失败: {e}")))?;
                bytes += entry.size();
                entry
                    .unpack_in(&target)
                    .map_err(|e| VaultError::transient(format!("解压归档条目失败: {e}")))?;
                records += 1;
            }

            Ok::<RestoreReport, VaultError>(RestoreReport {
                records_recovered: records,
                bytes_recovered: bytes,
            })
        })
        .await??;

        Ok(report)
    }

    async fn checksum(&self, artifact: &Path) -> Result<String> {
        if !artifact.exists() {
            return Err(VaultError::not_found(format!(
                "备份产物不存在: {}",
                artifact.display()
            )));
        }

        let artifact = artifact.to_path_buf();
        tokio::task::spawn_blocking(move || sha256_file(&artifact)).await?
    }

    async fn validate_structure(&self, artifact: &Path) -> Result<bool> {
        use flate2::read::GzDecoder;
        use std::fs::File;
        use tar::Archive;

        if !artifact.exists() {
            return Ok(false);
        }

        let artifact = artifact.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            let file = File::open(&artifact)?;
            let decoder = GzDecoder::new(file);
            let mut archive = Archive::new(decoder);

            // 能成功遍历所有条目，说明归档结构完整
            for entry in archive.entries()? {
                let _entry = entry?;
            }

            Ok::<bool, std::io::Error>(true)
        })
        .await?;

        match result {
            Ok(ok) => Ok(ok),
            Err(_) => Ok(false),
        }
    }
}

/// 流式计算文件的sha256（十六进制表示）
fn sha256_file(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

/// 测试替身：按脚本返回成功、临时失败或致命失败
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    pub struct MockEngine {
        pub raw_size: u64,
        pub compressed_size: Option<u64>,
        pub checksum: String,
        pub changes_captured: Option<u64>,
        pub partial: bool,
        /// 前N次调用返回临时性错误，之后成功
        pub fail_transient_times: AtomicU32,
        /// 所有调用都返回致命错误
        pub fail_fatal: bool,
        /// 每次调用前的人为延迟（测试超时用）
        pub delay: Option<Duration>,
        /// 结构检查的返回值
        pub structure_ok: bool,
    }

    impl Default for MockEngine {
        fn default() -> Self {
            Self {
                raw_size: 1024,
                compressed_size: Some(512),
                checksum: "deadbeef".to_string(),
                changes_captured: None,
                partial: false,
                fail_transient_times: AtomicU32::new(0),
                fail_fatal: false,
                delay: None,
                structure_ok: true,
            }
        }
    }

    impl MockEngine {
        pub fn failing_transient(times: u32) -> Self {
            Self {
                fail_transient_times: AtomicU32::new(times),
                ..Default::default()
            }
        }

        pub fn failing_fatal() -> Self {
            Self {
                fail_fatal: true,
                ..Default::default()
            }
        }

        async fn gate(&self) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_fatal {
                return Err(VaultError::fatal("模拟致命引擎错误"));
            }
            let remaining = self.fail_transient_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_transient_times.store(remaining - 1, Ordering::SeqCst);
                return Err(VaultError::transient("模拟临时引擎错误"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BackupEngine for MockEngine {
        async fn run(&self, spec: &EngineSpec) -> Result<EngineReport> {
            self.gate().await?;
            Ok(EngineReport {
                raw_size: self.raw_size,
                compressed_size: if spec.compress {
                    self.compressed_size
                } else {
                    None
                },
                checksum: self.checksum.clone(),
                changes_captured: spec.since.and(self.changes_captured.or(Some(1))),
                partial: self.partial,
                location: spec.destination.to_string_lossy().to_string(),
            })
        }

        async fn restore(&self, _artifact: &Path, _target: &Path) -> Result<RestoreReport> {
            self.gate().await?;
            Ok(RestoreReport {
                records_recovered: 42,
                bytes_recovered: self.raw_size,
            })
        }

        async fn checksum(&self, _artifact: &Path) -> Result<String> {
            self.gate().await?;
            Ok(self.checksum.clone())
        }

        async fn validate_structure(&self, _artifact: &Path) -> Result<bool> {
            self.gate().await?;
            Ok(self.structure_ok)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_engine_round_trip() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("data");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"hello").unwrap();
        std::fs::write(src.join("b.txt"), b"world world").unwrap();

        let dest = temp.path().join("backups/out.tar.gz");
        let engine = LocalArchiveEngine::new();

        let spec = EngineSpec {
            source_dirs: vec![src.clone()],
            destination: dest.clone(),
            compress: true,
            compression_level: 6,
            since: None,
        };
        let report = engine.run(&spec).await.unwrap();
        assert_eq!(report.raw_size, 16);
        assert!(report.compressed_size.is_some());
        assert_eq!(report.checksum.len(), 64);

        // 校验和可复算且稳定
        let again = engine.checksum(&dest).await.unwrap();
        assert_eq!(report.checksum, again);
        assert!(engine.validate_structure(&dest).await.unwrap());

        // 恢复出同样的文件
        let target = temp.path().join("restore");
        let restored = engine.restore(&dest, &target).await.unwrap();
        assert_eq!(restored.records_recovered, 2);
        let content = std::fs::read_to_string(target.join("data/a.txt")).unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let temp = tempdir().unwrap();
        let engine = LocalArchiveEngine::new();
        let spec = EngineSpec {
            source_dirs: vec![temp.path().join("nope")],
            destination: temp.path().join("out.tar.gz"),
            compress: true,
            compression_level: 6,
            since: None,
        };
        let err = engine.run(&spec).await.unwrap_err();
        assert!(matches!(err, VaultError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_validate_structure_on_garbage() {
        let temp = tempdir().unwrap();
        let bogus = temp.path().join("bogus.tar.gz");
        std::fs::write(&bogus, b"not an archive at all").unwrap();

        let engine = LocalArchiveEngine::new();
        assert!(!engine.validate_structure(&bogus).await.unwrap());
        assert!(
            !engine
                .validate_structure(&temp.path().join("missing"))
                .await
                .unwrap()
        );
    }
}
