//! Integration tests for the public `fbp` API
//!
//! Exercises the network end-to-end the way an application would: build a
//! graph with `ComponentBuilder`/`Network::builder`, run it, and check on
//! the outcome. No internals of `fbp-core` are reached into here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fbp::{ComponentBuilder, Network, PortSpec, RunOutcome, TypeDescriptor};
use serde_json::Value;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn fan_in_preserves_per_upstream_order() {
    init_tracing();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_sink = Arc::clone(&seen);

    let a = ComponentBuilder::new("A")
        .with_output(PortSpec::new("OUT", TypeDescriptor::String))
        .build(|ctx| {
            ctx.output("OUT")?.send(Value::from("A1"))?;
            ctx.output("OUT")?.send(Value::from("A2"))?;
            Ok(())
        });
    let b = ComponentBuilder::new("B")
        .with_output(PortSpec::new("OUT", TypeDescriptor::String))
        .build(|ctx| {
            ctx.output("OUT")?.send(Value::from("B1"))?;
            ctx.output("OUT")?.send(Value::from("B2"))?;
            Ok(())
        });
    let sink = ComponentBuilder::new("Sink")
        .with_input(PortSpec::new("IN", TypeDescriptor::String).array())
        .build(move |ctx| {
            for packet in ctx.input("IN")?.iter() {
                let packet = packet?;
                let value = packet
                    .content()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                packet.drop_packet();
                seen_in_sink.lock().unwrap().push(value);
            }
            Ok(())
        });

    let network = Network::builder()
        .add_component(a)
        .add_component(b)
        .add_component(sink)
        .connect("A", "OUT", "Sink", "IN")
        .connect("B", "OUT", "Sink", "IN")
        .build()
        .expect("valid graph");

    let report = network.run().expect("scheduler did not error");
    assert_eq!(report.outcome, RunOutcome::Clean);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    let a1 = seen.iter().position(|v| v == "A1").unwrap();
    let a2 = seen.iter().position(|v| v == "A2").unwrap();
    let b1 = seen.iter().position(|v| v == "B1").unwrap();
    let b2 = seen.iter().position(|v| v == "B2").unwrap();
    assert!(a1 < a2, "A1 must precede A2");
    assert!(b1 < b2, "B1 must precede B2");
}

#[test]
fn packet_conservation_holds_across_a_run() {
    init_tracing();
    let before = fbp::stats();

    let source = ComponentBuilder::new("Source")
        .with_output(PortSpec::new("OUT", TypeDescriptor::Int))
        .build(|ctx| {
            for i in 0..20 {
                ctx.output("OUT")?.send(Value::from(i))?;
            }
            Ok(())
        });
    let sink = ComponentBuilder::new("Sink")
        .with_input(PortSpec::new("IN", TypeDescriptor::Int))
        .build(|ctx| {
            for packet in ctx.input("IN")?.iter() {
                packet?.drop_packet();
            }
            Ok(())
        });

    let network = Network::builder()
        .add_component(source)
        .add_component(sink)
        .connect("Source", "OUT", "Sink", "IN")
        .build()
        .expect("valid graph");

    let report = network.run().expect("scheduler did not error");
    assert_eq!(report.outcome, RunOutcome::Clean);

    let after = fbp::stats();
    assert_eq!(after.leaked, before.leaked, "a clean run must leak nothing");
    let created = after.created - before.created;
    let delivered = after.delivered - before.delivered;
    let dropped = after.dropped - before.dropped;
    assert_eq!(created, delivered + dropped);
}

#[test]
fn iip_yields_exactly_one_packet_then_end_of_stream() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_component = Arc::clone(&calls);

    let reader = ComponentBuilder::new("Reader")
        .with_input(PortSpec::new("CONFIG", TypeDescriptor::String))
        .build(move |ctx| {
            let mut port = ctx.input("CONFIG")?;
            let mut values = Vec::new();
            while let Some(packet) = port.receive()? {
                values.push(packet.content().cloned().unwrap_or(Value::Null));
                packet.drop_packet();
            }
            calls_in_component.store(values.len(), Ordering::Release);
            Ok(())
        });

    let network = Network::builder()
        .add_component(reader)
        .initialize("Reader", "CONFIG", Value::from("hello"))
        .build()
        .expect("valid graph");

    let report = network.run().expect("scheduler did not error");
    assert_eq!(report.outcome, RunOutcome::Clean);
    assert_eq!(calls.load(Ordering::Acquire), 1);
}

#[test]
fn bracket_packets_frame_a_substream() {
    init_tracing();
    let depths: Arc<Mutex<Vec<isize>>> = Arc::new(Mutex::new(Vec::new()));
    let depths_in_sink = Arc::clone(&depths);

    let source = ComponentBuilder::new("Source")
        .with_output(PortSpec::new("OUT", TypeDescriptor::Int))
        .build(|ctx| {
            let out = ctx.output("OUT")?;
            out.open_bracket()?;
            out.send(Value::from(1))?;
            out.send(Value::from(2))?;
            out.close_bracket()?;
            Ok(())
        });
    let sink = ComponentBuilder::new("Sink")
        .with_input(PortSpec::new("IN", TypeDescriptor::Int))
        .build(move |ctx| {
            loop {
                match ctx.input("IN")?.receive()? {
                    Some(packet) => {
                        packet.drop_packet();
                        depths_in_sink.lock().unwrap().push(ctx.input("IN")?.bracket_depth());
                    }
                    None => break,
                }
            }
            Ok(())
        });

    let network = Network::builder()
        .add_component(source)
        .add_component(sink)
        .connect("Source", "OUT", "Sink", "IN")
        .build()
        .expect("valid graph");

    let report = network.run().expect("scheduler did not error");
    assert_eq!(report.outcome, RunOutcome::Clean);
    assert_eq!(*depths.lock().unwrap(), vec![1, 1, 1, 0]);
}
