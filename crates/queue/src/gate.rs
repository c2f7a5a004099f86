//! Cooperative pause gate.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared suspension point awaited at the start of every gated task.
///
/// [`pause`](Self::pause) closes the gate; [`unpause`](Self::unpause) opens
/// it again and releases every waiter at once. Tasks already past the gate
/// are not affected.
#[derive(Clone)]
pub struct PauseGate {
    paused: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
        }
    }

    pub fn pause(&self) {
        self.paused.send_if_modified(|p| !std::mem::replace(p, true));
    }

    pub fn unpause(&self) {
        self.paused.send_if_modified(|p| std::mem::replace(p, false));
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Returns immediately when open, otherwise waits for [`unpause`](Self::unpause).
    pub async fn wait(&self) {
        let mut rx = self.paused.subscribe();
        let _ = rx.wait_for(|paused| !paused).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn open_gate_does_not_block() {
        let gate = PauseGate::new();
        tokio::time::timeout(Duration::from_millis(100), gate.wait())
            .await
            .expect("open gate blocked");
    }

    #[tokio::test]
    async fn unpause_releases_all_waiters() {
        let gate = PauseGate::new();
        gate.pause();
        assert!(gate.is_paused());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        gate.unpause();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter not released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn pause_is_idempotent() {
        let gate = PauseGate::new();
        gate.pause();
        gate.pause();
        gate.unpause();
        assert!(!gate.is_paused());
        gate.unpause();
        assert!(!gate.is_paused());
    }
}
