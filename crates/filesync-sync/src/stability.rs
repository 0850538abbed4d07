//! File stability check
//!
//! A file that is still being written must not be copied. The
//! [`StabilityGate`] observes `(size, mtime)` several times, separated by a
//! fixed delay, and only reports [`Stability::Stable`] when every
//! observation agrees. There is no retry within one call: an unstable file
//! is skipped for the current pass and looked at again on the next one.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Size and modification time of a file at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl FileFingerprint {
    /// Reads the fingerprint of `path`
    pub async fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }
}

/// Verdict of one stability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// All observations matched; carries the agreed fingerprint
    Stable(FileFingerprint),
    /// Size or modification time moved between observations
    Changed,
    /// The file disappeared or could not be read
    Vanished,
    /// The wait between observations was interrupted
    Cancelled,
}

impl Stability {
    /// True only for [`Stability::Stable`]
    pub fn is_stable(&self) -> bool {
        matches!(self, Stability::Stable(_))
    }
}

/// Decides whether a candidate is safe to copy
#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    samples: u32,
    delay: Duration,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

impl StabilityGate {
    /// Creates a gate taking `samples` observations `delay` apart
    ///
    /// A sample count of 0 is treated as 1 (a single observation, which
    /// always agrees with itself).
    pub fn new(samples: u32, delay: Duration) -> Self {
        Self {
            samples: samples.max(1),
            delay,
        }
    }

    /// Number of observations taken per check
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Delay between observations
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Observes `path` and reports whether it stayed unchanged
    ///
    /// The delay between observations is a suspension point: cancelling
    /// `cancel` ends the check with [`Stability::Cancelled`].
    pub async fn check(&self, path: &Path, cancel: &CancellationToken) -> Stability {
        let first = match observe(path).await {
            Some(fp) => fp,
            None => return Stability::Vanished,
        };

        for sample in 1..self.samples {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => {
                    debug!(path = %path.display(), "Stability check cancelled");
                    return Stability::Cancelled;
                }
            }

            let current = match observe(path).await {
                Some(fp) => fp,
                None => return Stability::Vanished,
            };

            if current != first {
                debug!(
                    path = %path.display(),
                    sample,
                    size_first = first.size,
                    size_now = current.size,
                    "File still changing"
                );
                return Stability::Changed;
            }
        }

        debug!(path = %path.display(), size = first.size, "File is stable");
        Stability::Stable(first)
    }
}

async fn observe(path: &Path) -> Option<FileFingerprint> {
    match FileFingerprint::of(path).await {
        Ok(fp) => Some(fp),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "File vanished before it settled");
            None
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Cannot read file metadata for stability check"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_untouched_file_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("still.txt");
        std::fs::write(&path, b"done").unwrap();

        let gate = StabilityGate::new(2, Duration::from_millis(20));
        let verdict = gate.check(&path, &CancellationToken::new()).await;
        match verdict {
            Stability::Stable(fp) => assert_eq!(fp.size, 4),
            other => panic!("expected stable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_growing_file_is_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.log");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            file.write_all(b" more bytes").unwrap();
        });

        let gate = StabilityGate::new(2, Duration::from_millis(300));
        let verdict = gate.check(&path, &CancellationToken::new()).await;
        writer.await.unwrap();

        assert_eq!(verdict, Stability::Changed);
    }

    #[tokio::test]
    async fn test_missing_file_is_vanished() {
        let dir = TempDir::new().unwrap();
        let gate = StabilityGate::new(2, Duration::from_millis(10));
        let verdict = gate
            .check(&dir.path().join("nope"), &CancellationToken::new())
            .await;
        assert_eq!(verdict, Stability::Vanished);
    }

    #[tokio::test]
    async fn test_deleted_mid_check_is_vanished() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp.bin");
        std::fs::write(&path, b"x").unwrap();

        let doomed = path.clone();
        let remover = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            std::fs::remove_file(doomed).unwrap();
        });

        let gate = StabilityGate::new(2, Duration::from_millis(200));
        let verdict = gate.check(&path, &CancellationToken::new()).await;
        remover.await.unwrap();
        assert_eq!(verdict, Stability::Vanished);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_delay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slow.txt");
        std::fs::write(&path, b"x").unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let gate = StabilityGate::new(2, Duration::from_secs(30));
        let verdict = tokio::time::timeout(Duration::from_secs(2), gate.check(&path, &cancel))
            .await
            .expect("cancellation must end the check promptly");
        assert_eq!(verdict, Stability::Cancelled);
    }

    #[tokio::test]
    async fn test_single_sample_needs_no_delay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("once.txt");
        std::fs::write(&path, b"x").unwrap();

        let gate = StabilityGate::new(0, Duration::from_secs(30));
        assert_eq!(gate.samples(), 1);
        let verdict = tokio::time::timeout(
            Duration::from_secs(1),
            gate.check(&path, &CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(verdict.is_stable());
    }
}
