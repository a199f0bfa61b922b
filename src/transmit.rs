//! Transmitter (`spec.md` §4.6): writes a `FrameSequence` to the bus with
//! retry and per-frame pre-delays. Frame writes are serialized behind a
//! single mutex so bytes from distinct sequences never interleave on the
//! shared SLCAN byte stream (`spec.md` §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::command::codec::FrameSequence;
use crate::error::TxError;
use crate::frame::render_slcan_line;
use crate::transport::SlcanTransport;

#[derive(Debug, Clone, Copy)]
pub struct TransmitConfig {
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_ms: 100,
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    frames_sent: u64,
    frames_failed: u64,
    retries: u64,
}

/// Transmission counters, updated atomically (`spec.md` §4.6).
#[derive(Debug, Default)]
pub struct TxStats {
    frames_sent: AtomicU64,
    frames_failed: AtomicU64,
    retries: AtomicU64,
    last_error: StdMutex<Option<String>>,
}

impl TxStats {
    pub fn snapshot(&self) -> (u64, u64, u64, Option<String>) {
        (
            self.frames_sent.load(Ordering::Relaxed),
            self.frames_failed.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
            self.last_error.lock().expect("stats mutex poisoned").clone(),
        )
    }

    fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, underlying: &str) {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().expect("stats mutex poisoned") = Some(underlying.to_string());
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializes writes to the underlying transport. Ordered after the rate
/// limiter's mutex per `spec.md` §5's lock-ordering rule: the rate
/// limiter's std `Mutex` is never held across an `.await`, and this
/// tokio `Mutex` is only acquired once the rate limiter has already
/// returned.
pub struct Transmitter<T: SlcanTransport> {
    transport: Mutex<T>,
    config: TransmitConfig,
    pub stats: TxStats,
}

impl<T: SlcanTransport> Transmitter<T> {
    pub fn new(transport: T, config: TransmitConfig) -> Self {
        Self {
            transport: Mutex::new(transport),
            config,
            stats: TxStats::default(),
        }
    }

    /// Send every frame of `sequence` in order. Aborts and returns
    /// `TxError` on the first frame that exhausts its retries; frames
    /// already on the bus are not retracted (`spec.md` §7).
    pub async fn transmit(&self, sequence: &FrameSequence) -> Result<(), TxError> {
        let mut transport = self.transport.lock().await;
        for (index, frame) in sequence.iter().enumerate() {
            if frame.pre_delay_ms > 0 {
                sleep(Duration::from_millis(frame.pre_delay_ms as u64)).await;
            }

            let line = render_slcan_line(frame.arb_id, &frame.payload);
            let mut attempt = 0;
            loop {
                match transport.write_line(&line).await {
                    Ok(()) => {
                        self.stats.record_sent();
                        debug!(frame_index = index, arb_id = frame.arb_id, "transmitted frame");
                        break;
                    }
                    Err(e) => {
                        if attempt >= self.config.retry_count {
                            self.stats.record_failure(&e.to_string());
                            warn!(frame_index = index, error = %e, "frame transmission aborted after retries");
                            return Err(TxError {
                                frame_index: index,
                                underlying: e.to_string(),
                            });
                        }
                        attempt += 1;
                        self.stats.record_retry();
                        sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FlakyTransport {
        fail_until: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SlcanTransport for FlakyTransport {
        async fn write_line(&mut self, _line: &str) -> std::io::Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_until {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "simulated failure"))
            } else {
                Ok(())
            }
        }
    }

    fn sequence() -> FrameSequence {
        vec![crate::command::codec::FrameSequenceEntry {
            arb_id: 0x19FEDB63,
            payload: [0x01, 0xFF, 0xC8, 0x00, 0xFF, 0x00, 0xFF, 0xFF],
            pre_delay_ms: 0,
        }]
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let transport = FlakyTransport { fail_until: 0, attempts: AtomicUsize::new(0) };
        let tx = Transmitter::new(transport, TransmitConfig { retry_count: 3, retry_delay_ms: 1 });
        assert!(tx.transmit(&sequence()).await.is_ok());
        let (sent, failed, retries, _) = tx.stats.snapshot();
        assert_eq!(sent, 1);
        assert_eq!(failed, 0);
        assert_eq!(retries, 0);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let transport = FlakyTransport { fail_until: 2, attempts: AtomicUsize::new(0) };
        let tx = Transmitter::new(transport, TransmitConfig { retry_count: 3, retry_delay_ms: 1 });
        assert!(tx.transmit(&sequence()).await.is_ok());
        let (sent, _, retries, _) = tx.stats.snapshot();
        assert_eq!(sent, 1);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn aborts_after_exhausting_retries() {
        let transport = FlakyTransport { fail_until: 100, attempts: AtomicUsize::new(0) };
        let tx = Transmitter::new(transport, TransmitConfig { retry_count: 2, retry_delay_ms: 1 });
        let err = tx.transmit(&sequence()).await.unwrap_err();
        assert_eq!(err.frame_index, 0);
        let (sent, failed, _, last_error) = tx.stats.snapshot();
        assert_eq!(sent, 0);
        assert_eq!(failed, 1);
        assert!(last_error.is_some());
    }
}
