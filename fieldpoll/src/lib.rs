//! A polling scheduler and read/write arbitration engine for register-addressed
//! field-bus devices using [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Batches the configured points into the fewest contiguous reads per unit and register class
//! * One transaction in flight per physical connection with a minimum gap between transactions
//! * Exponential backoff of failing reads, capped by a ceiling
//! * Writes take priority over polling, with retries and read-modify-write of bit fields
//! * Typed values decoded from registers with byte/word swapping, bit fields and scaling
//! * Communication symptoms reported per device to a liveness collaborator
//!
//! # Supported transports
//!
//! * TCP client
//! * Serial port (enabled by the `serial` feature)
//! * Any byte-level protocol through [`FrameCodec`], or a custom [`Transport`]
//!
//! # Example
//!
//! ```no_run
//! use fieldpoll::*;
//!
//! fn meter_transport() -> Box<dyn Transport> {
//!     // FramedTransport::new(PhysConfig::Tcp("10.0.0.5:502".to_string()), MyCodec)
//!     todo!()
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let points = vec![
//!         PointSpec::new(
//!             "meter",
//!             "voltage",
//!             UnitId::new(1),
//!             RegisterClass::HoldingRegister,
//!             0x0100,
//!             RawType::Float32,
//!         ),
//!         PointSpec::new(
//!             "meter",
//!             "setpoint",
//!             UnitId::new(1),
//!             RegisterClass::HoldingRegister,
//!             0x0200,
//!             RawType::Uint16,
//!         ),
//!     ];
//!
//!     let (samples, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let connection = spawn_connection_task(
//!         ConnectionConfig::new("line-1"),
//!         points,
//!         meter_transport(),
//!         ConnectionHandlers::new(Box::new(samples)),
//!     );
//!
//!     connection
//!         .write(
//!             &DeviceId::from("meter"),
//!             vec![PointWrite::new("setpoint", PointValue::Int(42))],
//!         )
//!         .await?;
//!
//!     while let Some(sample) = rx.recv().await {
//!         println!("{}/{} = {}", sample.device, sample.point, sample.value);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub use crate::backoff::*;
pub use crate::codec::*;
pub use crate::config::*;
pub use crate::connection::{
    create_connection_handle_and_task, spawn_connection_task, Connection, ConnectionHandlers,
    LinkState, Listener, LivenessSink, MaybeAsync, NullLiveness, PointWrite,
};
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::group::*;
pub use crate::link::{
    FrameCodec, FramedTransport, PhysConfig, ReadRequest, RegisterSlice, Request, Response,
    Transport, WriteRequest,
};
#[cfg(feature = "serial")]
pub use crate::link::{DataBits, FlowControl, Parity, SerialSettings, StopBits};
pub use crate::point::*;
pub use crate::types::*;

mod backoff;
mod channel;
mod codec;
mod config;
mod connection;
mod decode;
mod error;
mod group;
mod link;
mod point;
mod types;

#[cfg(test)]
mod mock;

// only exercised by the serialization tests
#[cfg(test)]
use serde_json as _;
