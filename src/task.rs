use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

/// Shared flag telling in-flight workers that nobody is waiting for them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Runs `work` on a worker thread and sends its message back unless the
/// token was cancelled in the meantime. A closed channel is not an error.
pub fn spawn<M, F>(token: &CancelToken, tx: &Sender<M>, work: F)
where
    M: Send + 'static,
    F: FnOnce() -> M + Send + 'static,
{
    let token = token.clone();
    let tx = tx.clone();
    thread::spawn(move || {
        if token.is_cancelled() {
            return;
        }
        let message = work();
        if token.is_cancelled() {
            tracing::debug!("task: dropping result of cancelled request");
            return;
        }
        let _ = tx.send(message);
    });
}

/// Polls `target` until `done` holds, failing the test after five seconds.
#[cfg(test)]
pub(crate) fn poll_until<T>(
    target: &mut T,
    poll: impl Fn(&mut T) -> bool,
    done: impl Fn(&T) -> bool,
) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        poll(target);
        if done(target) {
            return;
        }
        thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("condition not reached before timeout");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::time::Duration;

    #[test]
    fn delivers_result() {
        let token = CancelToken::new();
        let (tx, rx) = unbounded();
        spawn(&token, &tx, || 7);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 7);
    }

    #[test]
    fn cancelled_work_is_not_delivered() {
        let token = CancelToken::new();
        let (tx, rx) = unbounded::<u32>();
        let (gate_tx, gate_rx) = bounded::<()>(1);
        spawn(&token, &tx, move || {
            let _ = gate_rx.recv();
            1
        });
        token.cancel();
        gate_tx.send(()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
