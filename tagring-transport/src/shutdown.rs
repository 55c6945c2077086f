use tokio::sync::broadcast;

/// Listens for the process-wide shutdown signal. Every long-lived task
/// (accept loops, background timers) holds one of these and selects on
/// `recv()` alongside its normal work so a `Fatal` error or ctrl-c drains
/// in-flight work instead of aborting mid-operation (spec.md §7).
#[derive(Debug)]
pub struct Shutdown {
    shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown { shutdown: false, notify }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }
}
