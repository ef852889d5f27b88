//! End-to-end workflow scenarios through the public API

use std::sync::Arc;
use std::time::Duration;

use bibrunner_core::core::workflow::DEFAULT_CRITICAL_OUTPUT;
use bibrunner_core::{
    classify, parse_equipment, run_cycle, ControllerContext, DefaultResolver, DocumentFormat,
    HardwareSignalProvider, LevelPattern, LevelPatterns, Phase, PortReservationTable, SignalBoard,
    SimulatedUut, TriggerSettings, ValidationLevel, WorkflowExecutor,
};
use tokio_util::sync::CancellationToken;

const SCENARIO: &str = r#"
id = "bib_scenario"

[[units]]
id = "uut1"

[[units.ports]]
number = 1
name = "COM11"

[[units.ports.start]]
command = "ATZ"
expect = "OK"
timeout_ms = 1000

[[units.ports.test]]
command = "TEST"
expect = "NEVER"

[units.ports.test.levels]
warn = { pattern = "^PASS$" }
fail = { pattern = "^ERROR$" }
critical = { pattern = "^FAULT$", trigger_hardware = true }

[[units.ports.test]]
command = "AT+STATUS"
expect = "STATUS_OK"

[[units.ports.stop]]
command = "AT+QUIT"
expect = "GOODBYE"
"#;

fn context(uut: &SimulatedUut, board: &SignalBoard) -> ControllerContext {
    let signals: Arc<dyn HardwareSignalProvider> = Arc::new(board.clone());
    ControllerContext::new(
        WorkflowExecutor::new(PortReservationTable::new(), signals.clone()),
        Arc::new(DefaultResolver::simulated_only(uut.clone())),
        signals,
        TriggerSettings::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_warn_keeps_going() {
    let config = parse_equipment(SCENARIO, DocumentFormat::Toml).unwrap();
    let uut = SimulatedUut::new().with_reply("TEST", "PASS");
    let board = SignalBoard::new();
    let ctx = context(&uut, &board);

    let result = run_cycle(&ctx, &config, &mut None, &CancellationToken::new()).await;
    let port = result.ports().next().unwrap();

    let test = port.phase(Phase::Test).unwrap();
    assert_eq!(test.commands[0].validation.level(), ValidationLevel::Warn);
    assert!(test.commands[0].validation.should_continue_workflow());
    assert_eq!(test.commands.len(), 2);
    assert!(port.stop_executed());
    assert!(port.success);
    assert!(result.success);
    assert_eq!(result.highest_level, ValidationLevel::Warn);
    assert_eq!(board.assertions(DEFAULT_CRITICAL_OUTPUT), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_critical_stops_test_phase() {
    let config = parse_equipment(SCENARIO, DocumentFormat::Toml).unwrap();
    let uut = SimulatedUut::new().with_reply("TEST", "FAULT");
    let board = SignalBoard::new();
    let ctx = context(&uut, &board);

    let result = run_cycle(&ctx, &config, &mut None, &CancellationToken::new()).await;
    let port = result.ports().next().unwrap();

    assert_eq!(result.highest_level, ValidationLevel::Critical);
    assert_eq!(result.critical_count, 1);
    assert!(!result.success);
    assert_eq!(port.phase(Phase::Test).unwrap().commands.len(), 1);
    assert!(port.stop_executed());
    assert_eq!(board.assertions(DEFAULT_CRITICAL_OUTPUT), 1);

    let sent: Vec<_> = uut.received().into_iter().map(|(_, cmd)| cmd).collect();
    assert_eq!(sent, vec!["ATZ", "TEST", "AT+QUIT"]);
}

#[tokio::test(start_paused = true)]
async fn test_critical_output_clears_after_hold() {
    let config = parse_equipment(SCENARIO, DocumentFormat::Toml).unwrap();
    let uut = SimulatedUut::new().with_reply("TEST", "FAULT");
    let board = SignalBoard::new();
    let ctx = context(&uut, &board);

    run_cycle(&ctx, &config, &mut None, &CancellationToken::new()).await;
    assert!(board.output(DEFAULT_CRITICAL_OUTPUT));

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(!board.output(DEFAULT_CRITICAL_OUTPUT));
}

#[tokio::test(start_paused = true)]
async fn test_injected_override_replaces_first_test_response() {
    let config = parse_equipment(SCENARIO, DocumentFormat::Toml).unwrap();
    let uut = SimulatedUut::new().with_reply("TEST", "PASS");
    let board = SignalBoard::new();
    let ctx = context(&uut, &board);

    let mut injected = Some("FAULT".to_string());
    let result = run_cycle(&ctx, &config, &mut injected, &CancellationToken::new()).await;

    assert!(injected.is_none());
    assert_eq!(result.highest_level, ValidationLevel::Critical);
    let port = result.ports().next().unwrap();
    assert_eq!(port.phase(Phase::Test).unwrap().commands[0].validation.response(), "FAULT");
}

#[test]
fn test_classification_is_pure_and_severity_first() {
    let levels = LevelPatterns {
        warn: Some(LevelPattern::new("TEMP", false).unwrap()),
        fail: None,
        critical: Some(LevelPattern::new("OVER", true).unwrap()),
    };

    let first = classify("TEMP OVER LIMIT", "OK", &levels);
    for _ in 0..10 {
        let again = classify("TEMP OVER LIMIT", "OK", &levels);
        assert_eq!(again.level(), first.level());
        assert_eq!(again.message(), first.message());
        assert_eq!(again.matched_pattern(), first.matched_pattern());
    }
    assert_eq!(first.level(), ValidationLevel::Critical);
    assert!(first.should_trigger_hardware_signal());
    assert!(!first.should_continue_workflow());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_port_reservation_is_exclusive_under_contention() {
    let table = PortReservationTable::new();
    let barrier = Arc::new(tokio::sync::Barrier::new(8));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let table = table.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                let attempt = table.try_reserve("/dev/ttyUSB0", &format!("bib{i}/uut/1"));
                // Hold the winner long enough for every loser to try
                tokio::time::sleep(Duration::from_millis(50)).await;
                attempt.is_ok()
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(table.is_empty());
}

const UNNAMED_PORT: &str = r#"
id = "ID"

[[units]]
id = "uut1"

[[units.ports]]
number = 1

[[units.ports.start]]
command = "PORT1_ENABLE"
expect = "PORT1:ENABLED"

[[units.ports.test]]
command = "PORT1_TEST"
expect = "PORT1:TEST_OK"

[[units.ports.stop]]
command = "PORT1_DISABLE"
expect = "PORT1:DISABLED"
"#;

#[tokio::test(start_paused = true)]
async fn test_sibling_equipments_with_unnamed_ports_run_concurrently() {
    let a = parse_equipment(&UNNAMED_PORT.replace("ID", "bib_a"), DocumentFormat::Toml).unwrap();
    let b = parse_equipment(&UNNAMED_PORT.replace("ID", "bib_b"), DocumentFormat::Toml).unwrap();
    let uut = SimulatedUut::new().with_latency(Duration::from_millis(300));
    let board = SignalBoard::new();
    let ctx = context(&uut, &board);
    let cancel = CancellationToken::new();

    let (mut none_a, mut none_b) = (None, None);
    let (ra, rb) = tokio::join!(
        run_cycle(&ctx, &a, &mut none_a, &cancel),
        run_cycle(&ctx, &b, &mut none_b, &cancel),
    );

    for result in [&ra, &rb] {
        assert!(result.success, "{result}");
        assert_eq!(result.highest_level, ValidationLevel::Pass, "{result}");
        assert!(result.units[0].errors.is_empty());
    }
    assert_eq!(ra.ports().next().unwrap().target, "sim://bib_a/uut1/1");
    assert_eq!(rb.ports().next().unwrap().target, "sim://bib_b/uut1/1");
    assert_eq!(uut.received().len(), 6);
}
