//! Network construction and the scheduler
//!
//! A [`Network`] owns every [`ComponentDefinition`] in a graph plus the
//! [`Connection`]s wiring their ports together. [`NetworkBuilder`] assembles
//! one from `add_component`/`connect`/`initialize` calls and validates the
//! wiring at `build()`; [`Network::run`] spawns one OS thread per component,
//! watches the shared [`Ledger`] for quiescence, and tells clean completion
//! apart from deadlock.
//!
//! Deadlock unwind does not use the shutdown signal at all: it force-closes
//! every connection's upstream count directly, which is indistinguishable
//! from ordinary upstream completion to a blocked `receive` — downstream
//! components observe end-of-stream and exit the same way they would on a
//! clean run. The shutdown signal (`ShutdownToken`/`ShutdownSignal`) exists
//! for the other cancellation path: an external `Network::stop()` call,
//! which needs to interrupt sends and receives promptly rather than wait for
//! a natural drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde_json::Value;

use crate::component::{ComponentContext, ComponentDefinition};
use crate::config::NetworkOptions;
use crate::connection::{Connection, ShutdownToken};
use crate::error::{FbpError, Result};
use crate::ledger::{ComponentState, Ledger};
use crate::port::{InputPort, OutputPort, PortSpec};

type PortKey = (String, String);

struct Edge {
    from_component: String,
    from_port: String,
    to_component: String,
    to_port: String,
    capacity: Option<usize>,
}

struct Iip {
    component: String,
    port: String,
    value: Value,
}

fn find_port<'a>(specs: &'a [PortSpec], name: &str) -> Option<&'a PortSpec> {
    specs.iter().find(|spec| spec.name == name)
}

/// Fluent builder that assembles a [`Network`] from components and wiring.
pub struct NetworkBuilder {
    options: NetworkOptions,
    components: Vec<ComponentDefinition>,
    edges: Vec<Edge>,
    iips: Vec<Iip>,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: NetworkOptions::default(),
            components: Vec::new(),
            edges: Vec::new(),
            iips: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: NetworkOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn add_component(mut self, component: ComponentDefinition) -> Self {
        self.components.push(component);
        self
    }

    /// Wire an output port to an input port using the network's default
    /// connection capacity.
    #[must_use]
    pub fn connect(
        self,
        from_component: impl Into<String>,
        from_port: impl Into<String>,
        to_component: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        self.connect_inner(from_component, from_port, to_component, to_port, None)
    }

    /// Like [`NetworkBuilder::connect`], but with an explicit connection
    /// capacity overriding the network default.
    #[must_use]
    pub fn connect_with_capacity(
        self,
        from_component: impl Into<String>,
        from_port: impl Into<String>,
        to_component: impl Into<String>,
        to_port: impl Into<String>,
        capacity: usize,
    ) -> Self {
        self.connect_inner(from_component, from_port, to_component, to_port, Some(capacity))
    }

    fn connect_inner(
        mut self,
        from_component: impl Into<String>,
        from_port: impl Into<String>,
        to_component: impl Into<String>,
        to_port: impl Into<String>,
        capacity: Option<usize>,
    ) -> Self {
        self.edges.push(Edge {
            from_component: from_component.into(),
            from_port: from_port.into(),
            to_component: to_component.into(),
            to_port: to_port.into(),
            capacity,
        });
        self
    }

    /// Attach a single-shot initial information packet to an input port.
    #[must_use]
    pub fn initialize(
        mut self,
        component: impl Into<String>,
        port: impl Into<String>,
        value: Value,
    ) -> Self {
        self.iips.push(Iip {
            component: component.into(),
            port: port.into(),
            value,
        });
        self
    }

    /// Validate the graph and produce a runnable [`Network`].
    ///
    /// # Errors
    ///
    /// Returns [`FbpError::GraphBuild`] for duplicate component names,
    /// references to components/ports that don't exist, a scalar port wired
    /// more than once, an input port carrying both a connection and an IIP,
    /// or a required port left neither connected nor initialized.
    pub fn build(self) -> Result<Network> {
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (idx, component) in self.components.iter().enumerate() {
            if by_name.insert(component.name.clone(), idx).is_some() {
                return Err(FbpError::GraphBuild(format!(
                    "duplicate component name '{}'",
                    component.name
                )));
            }
        }

        let (shutdown_token, shutdown_signal) = ShutdownToken::new();
        let ledger = Arc::new(Ledger::new(self.components.iter().map(|c| c.name.clone())));

        let mut output_conns: HashMap<PortKey, Vec<Connection>> = HashMap::new();
        let mut input_conns: HashMap<PortKey, Vec<Connection>> = HashMap::new();
        let mut all_connections: Vec<Connection> = Vec::new();

        for edge in &self.edges {
            let from_idx = *by_name.get(&edge.from_component).ok_or_else(|| {
                FbpError::GraphBuild(format!("unknown component '{}'", edge.from_component))
            })?;
            let to_idx = *by_name.get(&edge.to_component).ok_or_else(|| {
                FbpError::GraphBuild(format!("unknown component '{}'", edge.to_component))
            })?;

            let from_spec = find_port(&self.components[from_idx].output_specs, &edge.from_port)
                .ok_or_else(|| {
                    FbpError::GraphBuild(format!(
                        "component '{}' has no output port '{}'",
                        edge.from_component, edge.from_port
                    ))
                })?;
            let to_spec = find_port(&self.components[to_idx].input_specs, &edge.to_port)
                .ok_or_else(|| {
                    FbpError::GraphBuild(format!(
                        "component '{}' has no input port '{}'",
                        edge.to_component, edge.to_port
                    ))
                })?;

            let out_key = (edge.from_component.clone(), edge.from_port.clone());
            if !from_spec.is_array && output_conns.contains_key(&out_key) {
                return Err(FbpError::GraphBuild(format!(
                    "scalar output port '{}.{}' is already connected",
                    edge.from_component, edge.from_port
                )));
            }
            let in_key = (edge.to_component.clone(), edge.to_port.clone());
            if !to_spec.is_array && input_conns.contains_key(&in_key) {
                return Err(FbpError::GraphBuild(format!(
                    "scalar input port '{}.{}' is already connected",
                    edge.to_component, edge.to_port
                )));
            }
            if self
                .iips
                .iter()
                .any(|iip| iip.component == edge.to_component && iip.port == edge.to_port)
            {
                return Err(FbpError::GraphBuild(format!(
                    "input port '{}.{}' cannot have both a connection and an IIP",
                    edge.to_component, edge.to_port
                )));
            }

            let capacity = edge.capacity.unwrap_or_else(|| self.options.default_capacity());
            let name = format!(
                "{}.{} -> {}.{}",
                edge.from_component, edge.from_port, edge.to_component, edge.to_port
            );
            let connection = Connection::new(name, capacity, shutdown_signal.clone(), 1);
            all_connections.push(connection.clone());
            output_conns.entry(out_key).or_default().push(connection.clone());
            input_conns.entry(in_key).or_default().push(connection);
        }

        let mut iip_values: HashMap<PortKey, Value> = HashMap::new();
        for iip in self.iips {
            let idx = *by_name.get(&iip.component).ok_or_else(|| {
                FbpError::GraphBuild(format!("unknown component '{}'", iip.component))
            })?;
            find_port(&self.components[idx].input_specs, &iip.port).ok_or_else(|| {
                FbpError::GraphBuild(format!(
                    "component '{}' has no input port '{}'",
                    iip.component, iip.port
                ))
            })?;
            let key = (iip.component.clone(), iip.port.clone());
            if iip_values.insert(key, iip.value).is_some() {
                return Err(FbpError::GraphBuild(format!(
                    "input port '{}.{}' already has an IIP",
                    iip.component, iip.port
                )));
            }
        }

        let mut jobs = Vec::with_capacity(self.components.len());
        let mut component_names = Vec::with_capacity(self.components.len());

        for mut component in self.components {
            let name = component.name.clone();
            component_names.push(name.clone());

            let mut inputs = Vec::with_capacity(component.input_specs.len());
            let mut self_starting = true;
            for spec in &component.input_specs {
                let key = (name.clone(), spec.name.clone());
                let connections = input_conns.remove(&key).unwrap_or_default();
                let iip = iip_values.remove(&key);
                if !spec.optional && connections.is_empty() && iip.is_none() {
                    return Err(FbpError::GraphBuild(format!(
                        "required input port '{}.{}' is neither connected nor initialized",
                        name, spec.name
                    )));
                }
                if !connections.is_empty() || iip.is_some() {
                    self_starting = false;
                }
                let port =
                    InputPort::new(spec.clone(), name.clone(), connections, iip, Arc::clone(&ledger));
                inputs.push((spec.name.clone(), port));
            }

            let mut outputs = Vec::with_capacity(component.output_specs.len());
            for spec in &component.output_specs {
                let key = (name.clone(), spec.name.clone());
                let connections = output_conns.remove(&key).unwrap_or_default();
                if !spec.optional && connections.is_empty() {
                    return Err(FbpError::GraphBuild(format!(
                        "required output port '{}.{}' is not connected",
                        name, spec.name
                    )));
                }
                let port = OutputPort::new(spec.clone(), name.clone(), connections, Arc::clone(&ledger));
                outputs.push((spec.name.clone(), port));
            }

            component.self_starting = self_starting;
            let context = ComponentContext::new(name.clone(), inputs, outputs);
            jobs.push((name, component, context));
        }

        Ok(Network {
            options: self.options,
            ledger,
            shutdown_token: Mutex::new(Some(shutdown_token)),
            connections: all_connections,
            jobs: Mutex::new(Some(jobs)),
            component_names,
            cancelled: AtomicBool::new(false),
        })
    }
}

/// How a [`Network::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every component terminated normally.
    Clean,
    /// Quiescence was reached with components still alive.
    Deadlock,
    /// An external `Network::stop()` call interrupted the run.
    Cancelled,
    /// At least one component returned an error (and it wasn't a deadlock).
    Error,
}

/// Outcome of a completed (or aborted) network run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Per-component failures, in the order their threads reported them.
    pub component_errors: Vec<(String, FbpError)>,
    /// Names of components still alive when deadlock was declared.
    pub deadlock_participants: Vec<String>,
    /// Components that still hadn't exited when the shutdown window
    /// elapsed. Empty on an ordinary clean or errored run.
    pub stragglers: Vec<String>,
}

impl RunReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Clean
    }
}

/// A built, runnable graph of components and connections.
pub struct Network {
    options: NetworkOptions,
    ledger: Arc<Ledger>,
    shutdown_token: Mutex<Option<ShutdownToken>>,
    connections: Vec<Connection>,
    jobs: Mutex<Option<Vec<(String, ComponentDefinition, ComponentContext)>>>,
    component_names: Vec<String>,
    cancelled: AtomicBool,
}

impl Network {
    #[must_use]
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    #[must_use]
    pub fn component_names(&self) -> &[String] {
        &self.component_names
    }

    /// Request cancellation from outside the network. Wakes every blocked
    /// `send`/`receive` so components can unwind promptly rather than
    /// draining naturally. Idempotent; has no effect once the network has
    /// already stopped or been cancelled once.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(mut token) = self.shutdown_token.lock().take() {
            token.trigger();
            tracing::info!("network stop requested");
        }
    }

    /// Run every component to completion on its own thread and report how
    /// the network ended. Consumes the network's one-shot job list; calling
    /// this a second time returns `FbpError::GraphBuild`.
    ///
    /// # Errors
    ///
    /// Returns `FbpError::GraphBuild` if the network was already run.
    pub fn run(&self) -> Result<RunReport> {
        let jobs = self
            .jobs
            .lock()
            .take()
            .ok_or_else(|| FbpError::GraphBuild("network has already been run".to_string()))?;

        tracing::info!(components = jobs.len(), "network starting");

        let (completion_tx, completion_rx) = flume::unbounded::<(String, Result<()>)>();
        let mut handles = Vec::with_capacity(jobs.len());

        for (name, component, context) in jobs {
            let ledger = Arc::clone(&self.ledger);
            let tx = completion_tx.clone();
            let thread_name = format!("{}-{}", self.options.thread_name_prefix(), name);
            let self_starting = component.self_starting;

            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    let span = tracing::info_span!("component", name = %name);
                    let _enter = span.enter();
                    ledger.set_state(&name, ComponentState::Active);
                    tracing::info!(self_starting, "component activated");

                    let result = component.run(context);
                    match &result {
                        Ok(()) => {
                            ledger.set_state(&name, ComponentState::Terminated);
                            tracing::info!("component terminated");
                        }
                        Err(err) => {
                            ledger.set_state(&name, ComponentState::Failed);
                            tracing::error!(error = %err, "component failed");
                        }
                    }
                    let _ = tx.send((name, result));
                })
                .expect("failed to spawn component thread");
            handles.push(handle);
        }
        drop(completion_tx);

        let mut remaining: HashSet<String> = self.component_names.iter().cloned().collect();
        let mut component_errors = Vec::new();
        let watchdog_interval = Duration::from_millis(50);
        let mut already_warned: HashSet<String> = HashSet::new();

        loop {
            while let Ok((name, result)) = completion_rx.try_recv() {
                remaining.remove(&name);
                if let Err(err) = result {
                    component_errors.push((name, err));
                }
            }

            if remaining.is_empty() {
                break;
            }

            if let Some(threshold) = self.options.suspension_warn_after() {
                for (name, duration) in self.ledger.suspended_durations() {
                    if duration >= threshold && already_warned.insert(name.clone()) {
                        tracing::warn!(
                            component = %name,
                            suspended_for = ?duration,
                            "component has been suspended longer than the warning threshold"
                        );
                    }
                }
            }

            // `is_quiescent` alone only reflects component states; a component
            // can be ledger-SuspendedReceive while a packet is already sitting
            // in its inbound connection (or just arrived) during the 15ms
            // window before its next poll. Require every connection drained
            // too, so a packet that's merely in flight is never mistaken for
            // deadlock.
            let connections_drained = self.connections.iter().all(Connection::is_empty);
            if self.ledger.is_quiescent() && !self.ledger.all_terminal() && connections_drained {
                let participants = self.ledger.suspended_participants();
                tracing::error!(
                    ?participants,
                    "quiescence reached with live components, unwinding as deadlock"
                );
                for connection in &self.connections {
                    connection.close_upstream();
                }

                let deadline = Instant::now() + self.options.shutdown_timeout();
                Self::drain_completions_until(
                    &completion_rx,
                    &mut remaining,
                    &mut component_errors,
                    deadline,
                );
                // No safe way to force a stuck thread to exit; join waits for
                // whatever is left, which should be nothing once every
                // connection upstream is closed and user logic respects
                // end-of-stream.
                for handle in handles {
                    let _ = handle.join();
                }

                let stragglers: Vec<String> = remaining.into_iter().collect();
                if !stragglers.is_empty() {
                    tracing::error!(?stragglers, "components outlived the deadlock shutdown window");
                }
                tracing::info!("network stopped: deadlock");
                return Ok(RunReport {
                    outcome: RunOutcome::Deadlock,
                    component_errors,
                    deadlock_participants: participants,
                    stragglers,
                });
            }

            self.ledger.wait_for_change(watchdog_interval);
        }

        for handle in handles {
            let _ = handle.join();
        }

        let outcome = if self.cancelled.load(Ordering::Acquire) {
            RunOutcome::Cancelled
        } else if component_errors.is_empty() {
            RunOutcome::Clean
        } else {
            RunOutcome::Error
        };
        tracing::info!(?outcome, "network stopped");
        Ok(RunReport {
            outcome,
            component_errors,
            deadlock_participants: Vec::new(),
            stragglers: Vec::new(),
        })
    }

    fn drain_completions_until(
        rx: &flume::Receiver<(String, Result<()>)>,
        remaining: &mut HashSet<String>,
        errors: &mut Vec<(String, FbpError)>,
        deadline: Instant,
    ) {
        while !remaining.is_empty() {
            match rx.recv_deadline(deadline) {
                Ok((name, result)) => {
                    remaining.remove(&name);
                    if let Err(err) = result {
                        errors.push((name, err));
                    }
                }
                Err(_) => break,
            }
        }
    }
}
