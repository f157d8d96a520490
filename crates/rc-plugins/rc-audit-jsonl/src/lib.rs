//! # rc-audit-jsonl
//! `AuditSink` implementations.
//!
//! [`JsonLinesAudit`] appends one JSON object per line to a file.
//! [`TracingAudit`] only emits a structured `tracing` event, for deployments
//! that ship logs elsewhere.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use rc_core::models::AuditEvent;
use rc_core::traits::AuditSink;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

pub struct JsonLinesAudit {
    path: PathBuf,
    // Serializes appends so lines never interleave.
    file: Mutex<File>,
}

impl JsonLinesAudit {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening audit log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAudit {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record(&self, event: AuditEvent) -> anyhow::Result<()> {
        info!(
            target: "rusty_consent::audit",
            site = %event.site_id,
            user = %event.user_id,
            action = ?event.action,
            old_record = ?event.old_record.as_ref().map(|r| r.id),
            new_record = ?event.new_record.as_ref().map(|r| r.id),
            at = %event.at,
            "consent audit"
        );
        Ok(())
    }
}
