//! Tests for the forwarder connection lifecycle and send path.

use std::{
    collections::VecDeque,
    io,
    sync::Arc,
    time::Duration,
};

use log::Level;
use logtest::Logger;
use parking_lot::Mutex;
use rstest::{fixture, rstest};
use serial_test::serial;

use crate::error::ForwarderError;

use super::{
    ForwarderBuilder, MetricForwarder,
    backoff::Sleeper,
    config::ConnectionTarget,
    transport::{Connection, Connector},
};

/// Scripted behaviour shared between a fake connector and its connections.
#[derive(Default)]
struct Plan {
    /// Outcomes of upcoming connects; `false` fails. Empty means succeed.
    connect_results: VecDeque<bool>,
    always_fail_connect: bool,
    write_failures: usize,
    always_fail_write: bool,
    fail_close: bool,
    connects: usize,
    closes: usize,
    writes: Vec<String>,
}

#[derive(Clone, Default)]
struct FakeNetwork {
    plan: Arc<Mutex<Plan>>,
}

impl FakeNetwork {
    fn script(&self, f: impl FnOnce(&mut Plan)) -> &Self {
        f(&mut self.plan.lock());
        self
    }

    fn connects(&self) -> usize {
        self.plan.lock().connects
    }

    fn closes(&self) -> usize {
        self.plan.lock().closes
    }

    fn writes(&self) -> Vec<String> {
        self.plan.lock().writes.clone()
    }

    fn connector(&self) -> FakeConnector {
        FakeConnector {
            plan: Arc::clone(&self.plan),
        }
    }
}

struct FakeConnector {
    plan: Arc<Mutex<Plan>>,
}

impl Connector for FakeConnector {
    fn connect(&mut self, _target: &ConnectionTarget) -> io::Result<Box<dyn Connection>> {
        let mut plan = self.plan.lock();
        plan.connects += 1;
        let ok = !plan.always_fail_connect && plan.connect_results.pop_front().unwrap_or(true);
        if ok {
            Ok(Box::new(FakeConnection {
                plan: Arc::clone(&self.plan),
            }))
        } else {
            Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
        }
    }
}

struct FakeConnection {
    plan: Arc<Mutex<Plan>>,
}

impl Connection for FakeConnection {
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut plan = self.plan.lock();
        if plan.always_fail_write {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        if plan.write_failures > 0 {
            plan.write_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        plan.writes.push(String::from_utf8_lossy(buf).into_owned());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut plan = self.plan.lock();
        plan.closes += 1;
        if plan.fail_close {
            Err(io::Error::other("close failed"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Default)]
struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    fn delays(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, delay: Duration) {
        self.slept.lock().push(delay);
    }
}

#[fixture]
fn network() -> FakeNetwork {
    FakeNetwork::default()
}

#[fixture]
fn sleeper() -> RecordingSleeper {
    RecordingSleeper::default()
}

fn builder(network: &FakeNetwork, sleeper: &RecordingSleeper) -> ForwarderBuilder {
    ForwarderBuilder::new()
        .with_target("tsdb.test", 4242)
        .with_connector(network.connector())
        .with_sleeper(sleeper.clone())
}

fn build(builder: ForwarderBuilder) -> MetricForwarder {
    builder.build().expect("forwarder connects")
}

fn drain(logger: &mut Logger) -> Vec<(Level, String)> {
    let mut records = Vec::new();
    while let Some(record) = logger.pop() {
        records.push((record.level(), record.args().to_owned()));
    }
    records
}

#[rstest]
fn healthy_connection_writes_exactly_one_message(network: FakeNetwork, sleeper: RecordingSleeper) {
    let mut forwarder = build(builder(&network, &sleeper).with_tags(["a", "b"]));
    forwarder.send("web01.example.com", "cpu.idle", 97, 1_700_000_000);

    assert_eq!(
        network.writes(),
        vec!["put web01_example_com.cpu.idle 1700000000 97 a b\n"]
    );
    assert_eq!(network.connects(), 1);
    assert!(sleeper.delays().is_empty());
}

#[rstest]
#[case::no_tags(Vec::new(), "put web.load 10 0.5\n")]
#[case::two_tags(vec!["a", "b"], "put web.load 10 0.5 a b\n")]
fn tag_suffix_is_stable_across_messages(
    network: FakeNetwork,
    sleeper: RecordingSleeper,
    #[case] tags: Vec<&str>,
    #[case] expected: &str,
) {
    let mut forwarder = build(builder(&network, &sleeper).with_tags(tags));
    forwarder.send("web", "load", 0.5, 10);
    forwarder.send("web", "load", 0.5, 10);

    assert_eq!(network.writes(), vec![expected, expected]);
}

#[rstest]
fn custom_namer_supplies_statname(network: FakeNetwork, sleeper: RecordingSleeper) {
    let mut forwarder = build(
        builder(&network, &sleeper)
            .with_namer(|host: &str, name: &str| format!("{name}.by_host.{host}")),
    );
    forwarder.send("h1", "m", 1, 5);

    assert_eq!(network.writes(), vec!["put m.by_host.h1 5 1\n"]);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
fn transient_write_failures_reconnect_then_deliver(
    network: FakeNetwork,
    sleeper: RecordingSleeper,
    #[case] failures: usize,
) {
    let mut forwarder = build(builder(&network, &sleeper).with_max_attempts(5));
    network.script(|plan| plan.write_failures = failures);

    forwarder.send("web", "cpu", 1, 100);

    assert_eq!(network.connects(), 1 + failures, "one reconnect per failed write");
    assert_eq!(network.closes(), failures);
    assert_eq!(network.writes(), vec!["put web.cpu 100 1\n"]);
    assert!(forwarder.is_connected());
}

#[rstest]
#[serial]
fn exhausted_send_drops_and_logs_message(network: FakeNetwork, sleeper: RecordingSleeper) {
    let mut logger = crate::test_logger();
    let mut forwarder = build(builder(&network, &sleeper).with_max_attempts(3));
    network.script(|plan| plan.always_fail_write = true);

    forwarder.send("dropper", "disk", 7, 42);

    assert!(network.writes().is_empty());
    assert_eq!(network.connects(), 1 + 3);
    let records = drain(&mut logger);
    let dropped: Vec<_> = records
        .iter()
        .filter(|(_, msg)| msg.contains("Dropping message put dropper.disk 42 7"))
        .collect();
    assert_eq!(dropped.len(), 1, "records: {records:?}");
    assert_eq!(dropped[0].0, Level::Error);
    let send_failures = records
        .iter()
        .filter(|(level, msg)| {
            *level == Level::Error && msg.contains("Failed to send data to OpenTSDB server")
        })
        .count();
    assert!(send_failures >= 3, "records: {records:?}");
}

#[rstest]
fn failed_reconnect_consumes_a_send_attempt(network: FakeNetwork, sleeper: RecordingSleeper) {
    let mut forwarder = build(
        builder(&network, &sleeper)
            .with_max_attempts(2)
            .with_reconnect_delay_secs(0.0),
    );
    network.script(|plan| {
        plan.write_failures = 1;
        plan.connect_results = VecDeque::from([false, false]);
    });

    forwarder.send("web", "cpu", 1, 100);

    // Initial connect, a reconnect exhausting both attempts, then one more
    // reconnect after the write on the missing connection fails.
    assert_eq!(network.connects(), 4);
    assert!(network.writes().is_empty());
    assert!(forwarder.is_connected());
}

#[rstest]
fn connect_follows_backoff_sequence_then_exhausts(
    network: FakeNetwork,
    sleeper: RecordingSleeper,
) {
    network.script(|plan| plan.always_fail_connect = true);
    let err = builder(&network, &sleeper)
        .with_max_attempts(4)
        .with_reconnect_delay_secs(1.0)
        .with_backoff_factor(2.0)
        .with_backoff_max_secs(3.0)
        .build()
        .expect_err("connect must exhaust");

    assert_eq!(network.connects(), 4);
    assert_eq!(
        sleeper.delays(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3),
        ]
    );
    match err {
        ForwarderError::ConnectionExhausted {
            host,
            port,
            attempts,
            ..
        } => {
            assert_eq!(host, "tsdb.test");
            assert_eq!(port, 4242);
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn zero_delay_skips_sleeping(network: FakeNetwork, sleeper: RecordingSleeper) {
    network.script(|plan| plan.always_fail_connect = true);
    let result = builder(&network, &sleeper)
        .with_max_attempts(3)
        .with_reconnect_delay_secs(0.0)
        .build();

    assert!(matches!(
        result,
        Err(ForwarderError::ConnectionExhausted { attempts: 3, .. })
    ));
    assert!(sleeper.delays().is_empty());
}

#[rstest]
#[case(0)]
#[case(-1)]
fn non_positive_attempts_are_unbounded(
    network: FakeNetwork,
    sleeper: RecordingSleeper,
    #[case] raw: i64,
) {
    const FAILURES: usize = 10_000;
    network.script(|plan| plan.connect_results = VecDeque::from(vec![false; FAILURES]));

    let forwarder = build(
        builder(&network, &sleeper)
            .with_max_attempts(raw)
            .with_backoff_factor(0.0),
    );

    assert_eq!(forwarder.policy().max_attempts, None);
    assert_eq!(network.connects(), FAILURES + 1);
    assert_eq!(sleeper.delays().len(), FAILURES);
    assert!(forwarder.is_connected());
}

#[rstest]
fn debug_mode_writes_to_sink_without_network(network: FakeNetwork, sleeper: RecordingSleeper) {
    let output = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&output);
    let mut forwarder = build(
        builder(&network, &sleeper)
            .with_debug(true)
            .with_tags(["env=test"])
            .with_debug_sink(move || SharedSink(Arc::clone(&sink))),
    );

    forwarder.send("web", "cpu", 3, 99);
    forwarder.send("web", "mem", 4, 99);

    assert_eq!(network.connects(), 0);
    assert!(sleeper.delays().is_empty());
    assert_eq!(
        String::from_utf8(output.lock().clone()).expect("utf-8 output"),
        "put web.cpu 99 3 env=test\nput web.mem 99 4 env=test\n"
    );
}

struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[rstest]
fn close_errors_are_swallowed(network: FakeNetwork, sleeper: RecordingSleeper) {
    let mut forwarder = build(builder(&network, &sleeper));
    network.script(|plan| plan.fail_close = true);

    forwarder.close();
    assert!(!forwarder.is_connected());
    assert_eq!(network.closes(), 1);

    forwarder.reconnect().expect("reconnect after close");
    forwarder.reconnect().expect("reconnect despite close failure");
    assert_eq!(network.connects(), 3);
    assert_eq!(network.closes(), 2);
}

#[rstest]
fn dropping_the_forwarder_closes_the_connection(network: FakeNetwork, sleeper: RecordingSleeper) {
    let forwarder = build(builder(&network, &sleeper));
    drop(forwarder);
    assert_eq!(network.closes(), 1);
}

#[rstest]
#[case::negative_delay(ForwarderBuilder::new().with_reconnect_delay_secs(-1.0), "reconnect_delay")]
#[case::nan_factor(ForwarderBuilder::new().with_backoff_factor(f64::NAN), "backoff_factor")]
#[case::negative_cap(ForwarderBuilder::new().with_backoff_max_secs(-2.0), "backoff_max")]
#[case::zero_timeout(ForwarderBuilder::new().with_connect_timeout_secs(0.0), "connect_timeout")]
#[case::empty_host(ForwarderBuilder::new().with_target(" ", 4242), "host")]
#[case::zero_port(ForwarderBuilder::new().with_target("tsdb", 0), "port")]
#[case::spaced_tag(ForwarderBuilder::new().with_tags(["a b"]), "tag")]
#[case::empty_tag(ForwarderBuilder::new().with_tags([""]), "tag")]
fn builder_rejects_invalid_options(#[case] builder: ForwarderBuilder, #[case] field: &str) {
    let err = builder
        .build_disconnected()
        .expect_err("invalid options must fail");
    assert!(
        matches!(&err, ForwarderError::InvalidConfig(msg) if msg.contains(field)),
        "unexpected error: {err}"
    );
}

#[rstest]
fn debug_mode_ignores_target_validation() {
    let forwarder = ForwarderBuilder::new()
        .with_debug(true)
        .with_target("", 0)
        .with_debug_sink(io::sink)
        .build()
        .expect("debug mode needs no target");
    assert!(forwarder.is_connected());
}

#[rstest]
fn defaults_match_documented_policy() {
    let forwarder = ForwarderBuilder::new()
        .build_disconnected()
        .expect("defaults are valid");
    let policy = forwarder.policy();
    assert_eq!(policy.attempt_limit(), 60);
    assert_eq!(policy.initial_delay, Duration::from_secs(1));
    assert_eq!(policy.backoff_factor, 1.5);
    assert_eq!(policy.max_delay, Some(Duration::from_secs(60)));
    assert_eq!(forwarder.target().host, "127.0.0.1");
    assert_eq!(forwarder.target().port, 4242);
    assert!(!forwarder.is_connected());
}
