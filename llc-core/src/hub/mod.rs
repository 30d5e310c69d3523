//! Fan hub access
//!
//! Frame encoding and decoding plus the USB transport that carries them.

pub mod codec;
mod transport;

pub use codec::{decode_page, encode_command, encode_page_query, CommandFrame};
pub use transport::{open_interface, HubTransport, UsbHub};
