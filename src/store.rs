//! store — хранение SnapshotRecord на диске.
//!
//! Файл — JSON-конверт:
//!   {
//!     "format": 1,
//!     "created_unix_ms": ...,
//!     "label": "autosave" | null,
//!     "crc32": <crc32 компактного JSON записи>,
//!     "record": { ... SnapshotRecord ... }
//!   }
//!
//! Запись атомарная: <path>.tmp + rename. Pretty/compact — по SnapConfig.pretty_json.
//! При чтении CRC сверяется, если SnapConfig.verify_crc.

use anyhow::{anyhow, Context, Result};
use crc32fast::Hasher as Crc32;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::SnapshotRecord;
use crate::config::SnapConfig;

pub const RECORD_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEnvelope {
    pub format: u32,
    pub created_unix_ms: u64,
    #[serde(default)]
    pub label: Option<String>,
    pub crc32: u32,
    pub record: SnapshotRecord,
}

impl RecordEnvelope {
    pub fn new(record: SnapshotRecord, label: Option<String>) -> Result<Self> {
        let crc32 = record_crc(&record)?;
        Ok(Self {
            format: RECORD_FORMAT_VERSION,
            created_unix_ms: now_unix_ms(),
            label,
            crc32,
            record,
        })
    }

    /// Сверить CRC с текущим содержимым записи.
    pub fn verify(&self) -> Result<()> {
        let actual = record_crc(&self.record)?;
        if actual != self.crc32 {
            return Err(anyhow!(
                "record crc mismatch: stored={:08x}, actual={:08x}",
                self.crc32,
                actual
            ));
        }
        Ok(())
    }
}

/// CRC32 компактного JSON записи.
pub fn record_crc(record: &SnapshotRecord) -> Result<u32> {
    let bytes = serde_json::to_vec(record).context("serialize record for crc")?;
    let mut h = Crc32::new();
    h.update(&bytes);
    Ok(h.finalize())
}

/// Записать запись в файл (tmp + rename). Возвращает итоговый путь.
pub fn write_record(
    path: &Path,
    record: &SnapshotRecord,
    cfg: &SnapConfig,
    label: Option<String>,
) -> Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("create record dir {}", dir.display()))?;
        }
    }

    let env = RecordEnvelope::new(record.clone(), label)?;
    let json = if cfg.pretty_json {
        serde_json::to_string_pretty(&env)
    } else {
        serde_json::to_string(&env)
    }
    .context("serialize record envelope")?;

    let tmp = path.with_extension("tmp");
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("open tmp record {}", tmp.display()))?;
        f.write_all(json.as_bytes())?;
        f.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;

    debug!(
        "store: wrote {} ({} bytes, crc32={:08x})",
        path.display(),
        json.len(),
        env.crc32
    );
    Ok(path.to_path_buf())
}

/// Прочитать конверт целиком (формат и CRC проверяются по cfg).
pub fn read_envelope(path: &Path, cfg: &SnapConfig) -> Result<RecordEnvelope> {
    let mut f = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("open record {}", path.display()))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;

    let env: RecordEnvelope =
        serde_json::from_str(&buf).with_context(|| format!("parse record {}", path.display()))?;
    if env.format != RECORD_FORMAT_VERSION {
        return Err(anyhow!(
            "unsupported record format {} (expected {})",
            env.format,
            RECORD_FORMAT_VERSION
        ));
    }
    if cfg.verify_crc {
        env.verify()
            .with_context(|| format!("verify record {}", path.display()))?;
    }
    Ok(env)
}

/// Прочитать только запись.
pub fn read_record(path: &Path, cfg: &SnapConfig) -> Result<SnapshotRecord> {
    Ok(read_envelope(path, cfg)?.record)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
