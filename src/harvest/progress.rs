/// Progress emitted after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Subjects (blocks or addresses) handled so far, including this chunk.
    pub processed: u64,
    pub total: u64,
    /// Distinct results accumulated so far.
    pub unique_results: usize,
    /// Members of this chunk that stayed missing after every fallback.
    pub missing: usize,
    /// Whether this chunk had to fall back to per-member requests.
    pub fell_back: bool,
    /// First and last subject of the chunk (block numbers or list positions).
    pub first: u64,
    pub last: u64,
}

pub trait HarvestObserver: Send + Sync {
    fn on_chunk(&self, progress: &ChunkProgress);
}

impl<F> HarvestObserver for F
where
    F: Fn(&ChunkProgress) + Send + Sync,
{
    fn on_chunk(&self, progress: &ChunkProgress) {
        self(progress)
    }
}

/// Default observer: one structured log line per chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl HarvestObserver for LogObserver {
    fn on_chunk(&self, progress: &ChunkProgress) {
        tracing::info!(
            processed = progress.processed,
            total = progress.total,
            unique = progress.unique_results,
            missing = progress.missing,
            fell_back = progress.fell_back,
            first = progress.first,
            last = progress.last,
            "chunk processed"
        );
    }
}
