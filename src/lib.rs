//! # tuyadp
//!
//! Tuya EF00 datapoint core for Zigbee controllers: datapoint codec, cluster
//! frame builder, transport dispatcher that tries whichever primitive the
//! host binding exposes, cluster based profile detection and dp ↔ capability
//! mapping.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tuyadp::{Catalog, DeviceSession};
//!
//! let session = DeviceSession::resolve("th-sensor", &[0x0000, 0x0402, 0x0405], None, Catalog::builtin())?;
//! let events = session.handle_report(&[0x00, 0x01, 0x01, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0xD7])?;
//! println!("{:?}", events);
//! # Ok::<(), tuyadp::DpError>(())
//! ```
//!
#[macro_use]
pub mod macros;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod manifest;
pub mod mapping;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod transport;

pub use catalog::Catalog;
pub use codec::{Bitmap, ByteSource, DpType, DpValue, EncodeOptions, Endian};
pub use error::{DpError, Result};
pub use manifest::{DeviceManifest, ManifestLookup, StaticManifests};
pub use mapping::{DpMapping, MappingEntry};
pub use profile::{Detection, detect_profile};
pub use protocol::{DpFrame, Ef00Command};
pub use session::{DeviceSession, DpEvent};
pub use transport::{ClusterTransport, Dispatcher, DispatcherBuilder, Outbound, TransportError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
