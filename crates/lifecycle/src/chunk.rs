//! Chunked artifact transfer
//!
//! Deployment targets cap the size of a single message. Artifacts above
//! [`ChunkPolicy::threshold`] are split into fixed-size chunks, each
//! identified by its SHA-256. Every chunk is uploaded before one final
//! install call carries the ordered hash list and the hash of the whole
//! artifact. Smaller artifacts go up in one call.
//!
//! Each upload step is retried with a doubling delay up to
//! [`ChunkPolicy::max_attempts`] times before the transfer fails.

use crate::error::{Error, Result};
use crate::target::{DeployTarget, InstallMode, ResourceId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Default largest artifact sent in a single call
pub const DEFAULT_THRESHOLD: usize = 1_850_000;

/// Default number of attempts per upload step
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// SHA-256 of a chunk or artifact
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkHash([u8; 32]);

impl ChunkHash {
    /// Hash `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0_u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.to_hex()[..12])
    }
}

impl Serialize for ChunkHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut out = [0_u8; 32];
        hex::decode_to_slice(&text, &mut out).map_err(serde::de::Error::custom)?;
        Ok(Self(out))
    }
}

/// Transfer tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Largest artifact sent in a single call
    pub threshold: usize,
    /// Size of each chunk (the last one may be shorter)
    pub chunk_size: usize,
    /// Attempts per upload step
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry
    pub retry_delay: Duration,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// How an artifact will be transferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPlan<'a> {
    /// One call carrying the whole artifact
    Whole(&'a [u8]),
    /// Hashed chunks in artifact order, plus the whole-artifact hash
    Chunked {
        /// Chunks in order
        chunks: Vec<(ChunkHash, &'a [u8])>,
        /// Hash of the whole artifact
        whole: ChunkHash,
    },
}

/// Decide how to transfer `artifact`.
#[must_use]
pub fn plan_transfer<'a>(artifact: &'a [u8], policy: &ChunkPolicy) -> TransferPlan<'a> {
    if artifact.len() <= policy.threshold {
        return TransferPlan::Whole(artifact);
    }
    let chunks = artifact
        .chunks(policy.chunk_size.max(1))
        .map(|chunk| (ChunkHash::of(chunk), chunk))
        .collect();
    TransferPlan::Chunked {
        chunks,
        whole: ChunkHash::of(artifact),
    }
}

/// What a completed transfer sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    /// Artifact size in bytes
    pub size: usize,
    /// Hash of the whole artifact
    pub whole: ChunkHash,
    /// Ordered chunk hashes; empty for single-call transfers
    pub chunks: Vec<ChunkHash>,
}

impl TransferSummary {
    /// Whether the artifact went up in chunks.
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        !self.chunks.is_empty()
    }
}

/// Install `artifact` into `id`, choosing the single-call or chunked path.
///
/// # Errors
///
/// Returns [`Error::Transfer`] when an upload step keeps failing.
#[tracing::instrument(skip_all, fields(resource = %id, size = artifact.len()))]
pub async fn transfer(
    target: &dyn DeployTarget,
    id: &ResourceId,
    artifact: &[u8],
    init_args: &[u8],
    mode: InstallMode,
    policy: &ChunkPolicy,
) -> Result<TransferSummary> {
    match plan_transfer(artifact, policy) {
        TransferPlan::Whole(bytes) => {
            retry_with_backoff(policy, "artifact", || {
                target.upload_whole(id, bytes, init_args, mode)
            })
            .await?;
            Ok(TransferSummary {
                size: bytes.len(),
                whole: ChunkHash::of(bytes),
                chunks: Vec::new(),
            })
        }
        TransferPlan::Chunked { chunks, whole } => {
            let hashes =
                upload_chunked(target, id, &chunks, &whole, init_args, mode, policy).await?;
            Ok(TransferSummary {
                size: artifact.len(),
                whole,
                chunks: hashes,
            })
        }
    }
}

/// Upload every chunk, then install from the ordered hash list.
///
/// Chunks with identical content are uploaded once; the hash list still
/// names every position. Returns the hash list sent to the target.
///
/// # Errors
///
/// Returns [`Error::Transfer`] when a chunk upload or the final install
/// keeps failing.
pub async fn upload_chunked(
    target: &dyn DeployTarget,
    id: &ResourceId,
    chunks: &[(ChunkHash, &[u8])],
    whole: &ChunkHash,
    init_args: &[u8],
    mode: InstallMode,
    policy: &ChunkPolicy,
) -> Result<Vec<ChunkHash>> {
    let mut uploaded = HashSet::new();
    for (hash, bytes) in chunks {
        if !uploaded.insert(*hash) {
            continue;
        }
        retry_with_backoff(policy, &format!("chunk {hash}"), || {
            target.upload_chunk(id, hash, bytes)
        })
        .await?;
        debug!(chunk = %hash, size = bytes.len(), "Uploaded chunk");
    }

    let hashes: Vec<ChunkHash> = chunks.iter().map(|(hash, _)| *hash).collect();
    retry_with_backoff(policy, "install from chunks", || {
        target.install_from_chunks(id, &hashes, whole, init_args, mode)
    })
    .await?;
    Ok(hashes)
}

async fn retry_with_backoff<F, Fut>(policy: &ChunkPolicy, what: &str, operation: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.retry_delay;
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(what, attempt = attempt + 1, error = %e, "Transfer step failed");
                last_error = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, MAX_RETRY_DELAY);
                }
            }
        }
    }

    Err(Error::Transfer {
        what: what.to_string(),
        attempts,
        message: last_error.map_or_else(|| "retries exhausted".to_string(), |e| e.to_string()),
    })
}
