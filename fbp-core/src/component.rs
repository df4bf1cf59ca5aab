//! Component definitions and the authoring surface
//!
//! A component is user logic plus a static port layout. `ComponentBuilder`
//! assembles a [`ComponentDefinition`] from named ports and a logic
//! closure; `ComponentContext` is what the logic closure actually runs
//! against once the network wires real connections and IIPs into those
//! ports.

use std::panic::{self, AssertUnwindSafe};

use crate::error::{FbpError, Result};
use crate::port::{InputPort, OutputPort, PortSpec};

/// The signature every component's logic must implement: given a live
/// context of wired ports, run to completion or return an error.
pub type ComponentLogic = Box<dyn Fn(&mut ComponentContext) -> Result<()> + Send + Sync>;

/// Runtime handle a component's logic runs against: its wired input and
/// output ports, addressed by the name they were declared with.
pub struct ComponentContext {
    name: String,
    inputs: Vec<(String, InputPort)>,
    outputs: Vec<(String, OutputPort)>,
}

impl ComponentContext {
    pub(crate) fn new(
        name: impl Into<String>,
        inputs: Vec<(String, InputPort)>,
        outputs: Vec<(String, OutputPort)>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a declared input port by name.
    pub fn input(&mut self, name: &str) -> Result<&mut InputPort> {
        self.inputs
            .iter_mut()
            .find(|(port_name, _)| port_name == name)
            .map(|(_, port)| port)
            .ok_or_else(|| FbpError::port_not_open(name))
    }

    /// Look up a declared output port by name.
    pub fn output(&self, name: &str) -> Result<&OutputPort> {
        self.outputs
            .iter()
            .find(|(port_name, _)| port_name == name)
            .map(|(_, port)| port)
            .ok_or_else(|| FbpError::port_not_open(name))
    }

    /// Close every output port. Called by the component runtime once user
    /// logic returns (successfully, with an error, or via a caught panic)
    /// so downstream components always observe end-of-stream.
    pub(crate) fn close_outputs(&self) {
        for (_, port) in &self.outputs {
            port.close();
        }
    }
}

/// The static shape and behavior of a component, independent of any
/// particular network wiring.
pub struct ComponentDefinition {
    pub(crate) name: String,
    pub(crate) input_specs: Vec<PortSpec>,
    pub(crate) output_specs: Vec<PortSpec>,
    pub(crate) logic: ComponentLogic,
    /// Computed at build time: true when every input is unconnected,
    /// meaning this component produces without waiting to be driven.
    pub(crate) self_starting: bool,
}

impl std::fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("inputs", &self.input_specs.len())
            .field("outputs", &self.output_specs.len())
            .field("self_starting", &self.self_starting)
            .finish()
    }
}

impl ComponentDefinition {
    /// Run this component's logic against an already-wired context,
    /// catching panics so the scheduler can report a clean `ComponentError`
    /// rather than letting the thread abort the process.
    ///
    /// Regardless of how logic finishes, every output port is closed
    /// afterward (so downstream components can observe end-of-stream) and
    /// the thread's packet-leak counter is checked: a component that
    /// finished cleanly but still left packets unaccounted for is reported
    /// as `PacketLeakError` instead of success.
    pub(crate) fn run(&self, mut context: ComponentContext) -> Result<()> {
        crate::packet::take_thread_leaks();
        let logic = &self.logic;
        let name = context.name().to_string();
        let result = panic::catch_unwind(AssertUnwindSafe(|| logic(&mut context)));
        let outcome = match result {
            Ok(inner) => inner,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "component panicked".to_string());
                Err(FbpError::Component {
                    component: name.clone(),
                    message,
                })
            }
        };

        context.close_outputs();
        let leaked = crate::packet::take_thread_leaks();

        match outcome {
            Ok(()) if leaked > 0 => Err(FbpError::PacketLeak { component: name }),
            other => other,
        }
    }
}

/// Fluent builder for a [`ComponentDefinition`].
pub struct ComponentBuilder {
    name: String,
    input_specs: Vec<PortSpec>,
    output_specs: Vec<PortSpec>,
}

impl ComponentBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_specs: Vec::new(),
            output_specs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_input(mut self, spec: PortSpec) -> Self {
        self.input_specs.push(spec);
        self
    }

    #[must_use]
    pub fn with_output(mut self, spec: PortSpec) -> Self {
        self.output_specs.push(spec);
        self
    }

    /// Finish the definition with the given logic. `self_starting` is
    /// computed later, once the network knows whether the declared
    /// input ports actually ended up wired.
    pub fn build(
        self,
        logic: impl Fn(&mut ComponentContext) -> Result<()> + Send + Sync + 'static,
    ) -> ComponentDefinition {
        ComponentDefinition {
            name: self.name,
            input_specs: self.input_specs,
            output_specs: self.output_specs,
            logic: Box::new(logic),
            self_starting: false,
        }
    }
}
