//! USB transport for the fan hub
//!
//! The hub enumerates as two devices sharing a vendor ID: the TX device
//! accepts per-fan command frames and the RX device answers device queries.

use std::future::Future;

use nusb::transfer::RequestBuffer;
use nusb::Interface;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use llc_error::{LlcError, Result};

use super::codec::{encode_page_query, CommandFrame};
use crate::constants::codec::PAGE_STRIDE;
use crate::constants::usb::{
    CHUNK_LEN, ENDPOINT_IN, ENDPOINT_OUT, INTERFACE, READ_TIMEOUT, RX_PRODUCT_ID, TX_PRODUCT_ID,
    VENDOR_ID, WRITE_TIMEOUT,
};

/// Raw page and frame I/O against the hub
pub trait HubTransport: Send {
    /// Query `page_count` pages of device records.
    ///
    /// A failed query write is an error. A failed or timed-out read yields an
    /// empty buffer, which callers treat as "no data this tick".
    fn fetch_page(&mut self, page_count: u8) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Write one command frame to the TX device
    fn send_frame(&mut self, frame: CommandFrame) -> impl Future<Output = Result<()>> + Send;
}

/// Both hub devices, opened and claimed
pub struct UsbHub {
    tx: Interface,
    rx: Interface,
}

impl UsbHub {
    /// Open the TX device, then the RX device
    pub fn open() -> Result<Self> {
        let tx = open_interface(TX_PRODUCT_ID)?;
        let rx = open_interface(RX_PRODUCT_ID)?;
        Ok(Self { tx, rx })
    }
}

/// Find a hub device by product ID and claim its interface
pub fn open_interface(product_id: u16) -> Result<Interface> {
    let info = nusb::list_devices()?
        .find(|d| d.vendor_id() == VENDOR_ID && d.product_id() == product_id)
        .ok_or(LlcError::DeviceNotFound { product_id })?;

    debug!(
        product_id = format_args!("{:04x}", product_id),
        bus = info.bus_number(),
        address = info.device_address(),
        "Found hub device"
    );

    let device = info.open().map_err(|e| LlcError::ClaimFailed {
        product_id,
        reason: e.to_string(),
    })?;

    #[cfg(target_os = "linux")]
    if let Err(e) = device.detach_kernel_driver(INTERFACE) {
        // Usually means no driver was bound
        debug!(product_id = format_args!("{:04x}", product_id), error = %e, "Kernel driver not detached");
    }

    let interface = device.claim_interface(INTERFACE).map_err(|e| LlcError::ClaimFailed {
        product_id,
        reason: e.to_string(),
    })?;

    info!(product_id = format_args!("{:04x}", product_id), "Claimed hub interface");
    Ok(interface)
}

async fn write_frame(interface: &Interface, frame: CommandFrame) -> Result<()> {
    match timeout(WRITE_TIMEOUT, interface.bulk_out(ENDPOINT_OUT, frame.to_vec())).await {
        Ok(completion) => completion
            .into_result()
            .map(|_| ())
            .map_err(LlcError::transport),
        Err(_) => Err(LlcError::TransportTimeout("bulk out")),
    }
}

/// Source of fixed-size bulk IN chunks
trait ChunkReader: Send {
    /// Read up to `len` bytes; a timeout is `TransportTimeout`
    fn read_chunk(&mut self, len: usize) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

impl ChunkReader for Interface {
    async fn read_chunk(&mut self, len: usize) -> Result<Vec<u8>> {
        match timeout(READ_TIMEOUT, self.bulk_in(ENDPOINT_IN, RequestBuffer::new(len))).await {
            Ok(completion) => completion.into_result().map_err(LlcError::transport),
            Err(_) => Err(LlcError::TransportTimeout("bulk in")),
        }
    }
}

/// Accumulate chunks until `expected` bytes arrive or a short chunk ends the
/// transfer. Any failed read discards what was received.
async fn read_page<R: ChunkReader>(reader: &mut R, expected: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(expected);

    while buf.len() < expected {
        let chunk = match reader.read_chunk(CHUNK_LEN).await {
            Ok(chunk) => chunk,
            Err(LlcError::TransportTimeout(_)) => {
                debug!(received = buf.len(), "Hub read timed out");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, received = buf.len(), "Hub read failed");
                return Vec::new();
            }
        };

        let short = chunk.len() < CHUNK_LEN;
        buf.extend_from_slice(&chunk);
        if short {
            break;
        }
    }

    buf
}

impl HubTransport for UsbHub {
    async fn fetch_page(&mut self, page_count: u8) -> Result<Vec<u8>> {
        write_frame(&self.rx, encode_page_query(page_count)).await?;
        Ok(read_page(&mut self.rx, PAGE_STRIDE * usize::from(page_count)).await)
    }

    async fn send_frame(&mut self, frame: CommandFrame) -> Result<()> {
        write_frame(&self.tx, frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out scripted chunks and counts the reads it served
    struct ScriptedReader {
        chunks: VecDeque<Result<Vec<u8>>>,
        reads: usize,
    }

    impl ScriptedReader {
        fn new(chunks: Vec<Result<Vec<u8>>>) -> Self {
            Self { chunks: chunks.into(), reads: 0 }
        }
    }

    impl ChunkReader for ScriptedReader {
        async fn read_chunk(&mut self, len: usize) -> Result<Vec<u8>> {
            assert_eq!(len, CHUNK_LEN);
            self.reads += 1;
            self.chunks
                .pop_front()
                .unwrap_or_else(|| Err(LlcError::TransportTimeout("bulk in")))
        }
    }

    fn filled(len: usize, byte: u8) -> Result<Vec<u8>> {
        Ok(vec![byte; len])
    }

    #[tokio::test]
    async fn test_reads_until_expected_length() {
        // Two pages need two full chunks; the third is never requested
        let mut reader = ScriptedReader::new(vec![
            filled(CHUNK_LEN, 1),
            filled(CHUNK_LEN, 2),
            filled(CHUNK_LEN, 3),
        ]);
        let page = read_page(&mut reader, PAGE_STRIDE * 2).await;

        assert_eq!(reader.reads, 2);
        assert_eq!(page.len(), CHUNK_LEN * 2);
        assert_eq!(page[0], 1);
        assert_eq!(page[CHUNK_LEN], 2);
    }

    #[tokio::test]
    async fn test_short_chunk_ends_transfer() {
        let mut reader = ScriptedReader::new(vec![
            filled(CHUNK_LEN, 1),
            filled(100, 2),
            filled(CHUNK_LEN, 3),
        ]);
        let page = read_page(&mut reader, PAGE_STRIDE * 4).await;

        assert_eq!(reader.reads, 2);
        assert_eq!(page.len(), CHUNK_LEN + 100);
    }

    #[tokio::test]
    async fn test_single_page_fits_one_chunk() {
        let mut reader = ScriptedReader::new(vec![filled(PAGE_STRIDE, 7)]);
        let page = read_page(&mut reader, PAGE_STRIDE).await;

        assert_eq!(reader.reads, 1);
        assert_eq!(page, vec![7; PAGE_STRIDE]);
    }

    #[tokio::test]
    async fn test_timeout_mid_transfer_yields_empty_page() {
        let mut reader = ScriptedReader::new(vec![
            filled(CHUNK_LEN, 1),
            Err(LlcError::TransportTimeout("bulk in")),
        ]);
        let page = read_page(&mut reader, PAGE_STRIDE * 2).await;

        assert_eq!(reader.reads, 2);
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_io_error_mid_transfer_yields_empty_page() {
        let mut reader = ScriptedReader::new(vec![
            filled(CHUNK_LEN, 1),
            Err(LlcError::transport("endpoint stalled")),
            filled(CHUNK_LEN, 2),
        ]);
        let page = read_page(&mut reader, PAGE_STRIDE * 3).await;

        assert_eq!(reader.reads, 2);
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_zero_pages_reads_nothing() {
        let mut reader = ScriptedReader::new(Vec::new());
        let page = read_page(&mut reader, 0).await;

        assert_eq!(reader.reads, 0);
        assert!(page.is_empty());
    }
}
