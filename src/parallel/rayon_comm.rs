// rayon-based shared-memory communicator

use rayon::ThreadPoolBuilder;

/// Shared-memory "communicator": one process, many threads. Reductions are
/// already complete after the local rayon kernels, so the collective step is
/// the identity.
#[derive(Debug, Clone, Copy)]
pub struct RayonComm {
    threads: usize,
}

impl RayonComm {
    /// Uses one thread per logical CPU.
    pub fn new() -> Self {
        Self::with_threads(num_cpus::get())
    }

    /// Configures the global rayon pool. If the pool was already built the
    /// existing one is kept and its size is reported instead.
    pub fn with_threads(threads: usize) -> Self {
        let threads = threads.max(1);
        if ThreadPoolBuilder::new().num_threads(threads).build_global().is_err() {
            tracing::debug!("rayon global pool already initialised");
            return RayonComm { threads: rayon::current_num_threads() };
        }
        RayonComm { threads }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Default for RayonComm {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Comm for RayonComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {
        rayon::scope(|_| {});
    }
    fn all_reduce_sum(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_max(&self, x: f64) -> f64 {
        x
    }
}
