use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single consumer task through which every observer callback is delivered.
///
/// Producers post closures from any task; the consumer runs them one at a
/// time in arrival order, so events for the same handle never overlap and
/// never run on the network or signaling tasks.
#[derive(Clone)]
pub struct EventLoop {
    tx: mpsc::UnboundedSender<Job>,
}

impl EventLoop {
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        (Self { tx }, worker)
    }

    /// Queues `job` behind everything already posted. A post after the
    /// loop has shut down is silently dropped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(job));
    }
}
