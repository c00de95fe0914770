use schema::StreamId;
use sha2::{Digest, Sha256};

/// Map a stream id onto a worker index in `[0, worker_count)`.
///
/// The first eight bytes of the SHA-256 digest, read big-endian, modulo the
/// worker count: the same id lands on the same worker in every process, so a
/// stream never migrates while its session is alive. Ids are not validated
/// here. A `worker_count` of zero or one always yields worker 0.
pub fn route(stream_id: &str, worker_count: usize) -> usize {
    if worker_count <= 1 {
        return 0;
    }
    let digest = Sha256::digest(stream_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % worker_count as u64) as usize
}

/// Routing table of a supervisor. The worker count is fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRouter {
    worker_count: usize,
}

impl CommandRouter {
    pub fn new(worker_count: usize) -> Self {
        Self { worker_count }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn route(&self, stream_id: &StreamId) -> usize {
        route(stream_id.as_str(), self.worker_count)
    }
}
