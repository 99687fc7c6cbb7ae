use std::future::Future;

use tokio::sync::Mutex;

/// Single chain of pending writes.
///
/// `tokio::sync::Mutex` hands out the lock in FIFO order, so writes run one at
/// a time in the order they were enqueued. A failed write only affects its
/// own result; the next write in line proceeds normally.
#[derive(Debug, Default)]
pub struct WriteSerializer {
    chain: Mutex<()>,
}

impl WriteSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue<F, Fut, T>(&self, write: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _turn = self.chain.lock().await;
        write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    #[tokio::test]
    async fn writes_never_overlap() {
        let serializer = Arc::new(WriteSerializer::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let serializer = Arc::clone(&serializer);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                serializer
                    .enqueue(|| async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_does_not_break_the_chain() {
        let serializer = WriteSerializer::new();

        let first: Result<(), &str> =
            serializer.enqueue(|| async { Err("disk full") }).await;
        let second: Result<(), &str> =
            serializer.enqueue(|| async { Ok(()) }).await;

        assert!(first.is_err());
        assert!(second.is_ok());
    }
}
