//! # fbp
//!
//! A flow-based-programming (FBP) execution engine: schedule independent
//! components, move typed packets between them over bounded connections,
//! and detect termination of the whole network — including deadlock.
//!
//! ## Architecture
//!
//! This crate is structured the way the rest of this lineage's runtimes
//! are:
//!
//! - **`fbp-core`**: packets, ports, connections, the component runtime, the
//!   scheduler. Runtime-agnostic, synchronous, one OS thread per component.
//! - **`fbp`**: public API surface (this crate), re-exporting the pieces an
//!   application actually needs to build and run a graph.
//!
//! ## Quick Start
//!
//! ```rust
//! use fbp::{ComponentBuilder, Network, PortSpec, TypeDescriptor};
//! use serde_json::Value;
//!
//! let source = ComponentBuilder::new("Source")
//!     .with_output(PortSpec::new("OUT", TypeDescriptor::String))
//!     .build(|ctx| {
//!         for word in ["a", "b", "c"] {
//!             ctx.output("OUT")?.send(Value::from(word))?;
//!         }
//!         Ok(())
//!     });
//!
//! let sink = ComponentBuilder::new("Sink")
//!     .with_input(PortSpec::new("IN", TypeDescriptor::String))
//!     .build(|ctx| {
//!         for packet in ctx.input("IN")?.iter() {
//!             packet?.drop_packet();
//!         }
//!         Ok(())
//!     });
//!
//! let network = Network::builder()
//!     .add_component(source)
//!     .add_component(sink)
//!     .connect("Source", "OUT", "Sink", "IN")
//!     .build()
//!     .expect("valid graph");
//!
//! let report = network.run().expect("scheduler did not error");
//! assert!(report.is_clean());
//! ```
//!
//! ## Cancellation
//!
//! A network running a long stream can be stopped from another thread:
//! `network.stop()` wakes every blocked `send`/`receive`, and `run()`
//! returns a [`RunReport`] with [`RunOutcome::Cancelled`].
//!
//! ## Safety
//!
//! `fbp-core` forbids `unsafe` outright (`#![deny(unsafe_code)]`); this
//! crate carries no unsafe code either.

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow some pedantic patterns
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)] // Will add gradually
#![allow(clippy::doc_markdown)] // Too many false positives

// Re-export the authoring and graph-construction surface.
pub use fbp_core::component::{
    ComponentBuilder, ComponentContext, ComponentDefinition, ComponentLogic,
};
pub use fbp_core::config::NetworkOptions;
pub use fbp_core::error::{FbpError, Result};
pub use fbp_core::ledger::{ComponentState, Ledger};
pub use fbp_core::network::{Network, NetworkBuilder, RunOutcome, RunReport};
pub use fbp_core::packet::{stats, Packet, PacketStats, PacketType};
pub use fbp_core::port::{InputIter, InputPort, OutputPort, PortSpec};
pub use fbp_core::types::{
    deserialize, get_spec, register_handler, serialize, to_native, to_primitive, validate,
    TypeDescriptor, TypeHandler, TypeSpec,
};

// Re-exported so downstream crates don't need a separate `serde_json`
// dependency just to build packet content or read port specs.
pub use serde_json;
pub use tracing;
