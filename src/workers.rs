use crate::api::{self, ApiResult};
use tokio::sync::oneshot;

/// The CPU pool: image decode/dither and large-document parsing run here so
/// the async I/O scheduler never blocks on them. Sized to the logical core
/// count; submissions beyond that queue inside rayon.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism().map(|count| count.get()).unwrap_or(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("image-worker-{index}"))
            .build()
            .expect("worker pool must be constructible");
        Self { pool }
    }

    /// Runs a CPU-bound task on the pool and awaits its result without
    /// blocking the async scheduler.
    pub async fn run<F, T>(&self, task: F) -> ApiResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = sender.send(task());
        });
        receiver.await.map_err(|_| api::Error::Canceled)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
