//! FBP Core
//!
//! Runtime-agnostic building blocks for a flow-based-programming execution
//! engine:
//! - Packet ownership and lifecycle (`packet`)
//! - Bounded FIFO connections and network-wide cancellation (`connection`)
//! - Input/output ports, IIPs, array ports (`port`)
//! - Component authoring and per-activation execution (`component`)
//! - Component-state ledger and quiescence detection (`ledger`)
//! - Network construction and the scheduler (`network`)
//! - Type descriptors and the `TypeHandler` registry (`types`)
//! - Error types (`error`)
//! - Network-wide configuration (`config`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::needless_pass_by_ref_mut)]
#![allow(clippy::match_same_arms)]

pub mod component;
pub mod config;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod network;
pub mod packet;
pub mod port;
pub mod types;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::component::{ComponentBuilder, ComponentContext, ComponentDefinition, ComponentLogic};
    pub use crate::config::NetworkOptions;
    pub use crate::error::{FbpError, Result};
    pub use crate::ledger::{ComponentState, Ledger};
    pub use crate::network::{Network, NetworkBuilder, RunOutcome, RunReport};
    pub use crate::packet::{Packet, PacketStats, PacketType};
    pub use crate::port::{InputPort, OutputPort, PortSpec};
    pub use crate::types::{register_handler, TypeDescriptor, TypeHandler, TypeSpec};
}
