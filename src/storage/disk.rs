//! Disk-backed segment store
//!
//! Decodes relayed payloads and writes the binary containers under the
//! output root. Names collide across sessions (and whenever the same page
//! is captured twice), so existing files are never overwritten; collisions
//! get numbered suffixes the way a download manager hands them out.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::data::{SavedSegment, SegmentPayload};
use crate::naming::SavePlan;

#[derive(Debug, Clone)]
pub struct SegmentStore {
    root: PathBuf,
}

impl SegmentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decode and write one segment, creating parent directories as needed.
    pub async fn save(&self, plan: &SavePlan, payload: SegmentPayload) -> Result<SavedSegment> {
        let bytes = payload.decode().context("decoding segment payload")?;

        let target = self.root.join(plan.relative_path());
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let target = unique_target(target).await?;
        tokio::fs::write(&target, &bytes)
            .await
            .with_context(|| format!("writing {}", target.display()))?;
        debug!(path = %target.display(), "segment written");

        Ok(SavedSegment {
            path: target,
            bytes: bytes.len() as u64,
            saved_at: Utc::now(),
        })
    }
}

/// First free variant of `target`: the name itself, then `name (1).ext`,
/// `name (2).ext`, and so on.
async fn unique_target(target: PathBuf) -> Result<PathBuf> {
    if !tokio::fs::try_exists(&target).await? {
        return Ok(target);
    }

    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("segment");
    let extension = target.extension().and_then(|s| s.to_str());

    let mut n: u32 = 1;
    loop {
        let name = match extension {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = target.with_file_name(name);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}
