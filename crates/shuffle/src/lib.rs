//! Data movement between iteration roles and partitions.
//!
//! Architecture role:
//! - hash partitioner and edge ship strategies
//! - gated in-process exchange between head and intermediate roles
//! - per-partition workset back channel
//! - JSON-lines spill files for the solution set and the external sorter,
//!   with floats stored as bit patterns

pub mod backchannel;
pub mod codec;
pub mod exchange;
pub mod layout;
pub mod partitioner;
pub mod reader;
pub mod writer;

pub use backchannel::{WorksetConsumer, WorksetProducer, back_channel};
pub use exchange::{ExchangeMessage, ExchangeReceiver, ExchangeSender, RoundGate, exchange};
pub use layout::*;
pub use partitioner::{HashPartitioner, ShipStrategy};
pub use reader::{RunCursor, SpillReader};
pub use writer::SpillWriter;
