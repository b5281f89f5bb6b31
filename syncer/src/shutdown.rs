use tokio::sync::watch;

/// Sending half of a job's stop signal. Cloneable so admin calls and the
/// worker can share it.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    pub fn wrap(tx: watch::Sender<()>) -> Self {
        Self(tx)
    }

    pub fn shutdown(&self) {
        // The worker may already be gone; a dropped receiver is fine.
        let _ = self.0.send(());
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub type ShutdownRx = watch::Receiver<()>;

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx::wrap(tx), rx)
}
