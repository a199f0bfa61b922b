//! SLCAN transport (`spec.md` §6): out of scope for the core's internal
//! algorithms, but the trait boundary the Transmitter and RX activity
//! consume is defined here so the core can be exercised against a fake
//! in tests.

pub mod slcan;

use async_trait::async_trait;

pub use slcan::TcpSlcanTransport;

/// Bus-write side of the SLCAN link. `write_line` must not return until
/// the line (without trailing `\r`) has been handed to the OS, since the
/// Transmitter serializes calls through a single mutex precisely to keep
/// these writes from interleaving.
#[async_trait]
pub trait SlcanTransport: Send {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

/// Read side consumed by the RX activity (`spec.md` §5 activity 1).
#[async_trait]
pub trait SlcanReader: Send {
    /// Returns `None` on clean stream end.
    async fn read_line(&mut self) -> std::io::Result<Option<String>>;
}
