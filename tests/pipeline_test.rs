//! End-to-end tests: capture taps through batching, the receiving aggregate,
//! classification and a signed report.

use humansign_agent::collector::{CaptureSource, CaptureTap, KeyKind, RawEvent};
use humansign_agent::core::{NoModel, ReportBuilder, Verdict};
use humansign_agent::session::{
    CaptureContext, IngestOutcome, PipelineConfig, SessionAggregate, SnapshotStore, SpoolSink,
};
use humansign_agent::signing::{verify_report, ReportSigner, SignatureStatus, SigningIdentity};
use humansign_agent::transparency::create_shared_log;
use pretty_assertions::assert_eq;

/// Type `n` characters through `keys`, echoing each one on `inputs` the way
/// an input-change listener would. Returns the time of the last release.
fn type_through(
    context: &mut CaptureContext,
    sink: &mut SpoolSink,
    keys: &CaptureTap,
    inputs: &CaptureTap,
    n: usize,
) -> f64 {
    let mut t = 10.0;
    for i in 0..n {
        let code = 65 + (i % 26) as u32;
        keys.key(KeyKind::Press, code, Some('a'), t).unwrap();
        inputs.input(1, t + 1.0).unwrap();
        keys.key(KeyKind::Release, code, None, t + 70.0).unwrap();
        context.pump(sink, t + 80.0).unwrap();
        t += 160.0;
    }
    t - 90.0
}

#[test]
fn test_capture_to_verified_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut spool = SpoolSink::new(dir.path().join("batches.jsonl"));
    let log = create_shared_log();

    let mut context = CaptureContext::new(PipelineConfig::default()).with_transparency(log.clone());
    let session_id = context.start_session("docs.example.com", 0.0).unwrap();
    let keys = context.tap(CaptureSource::KeyListener);
    let inputs = context.tap(CaptureSource::InputChange);

    let end = type_through(&mut context, &mut spool, &keys, &inputs, 40);
    context.stop(&mut spool, end + 100.0).unwrap();

    let mut local = context.take().unwrap();
    assert_eq!(local.ledger().typed, 40);
    assert_eq!(log.stats().duplicates_dropped, 40);
    assert_eq!(local.classify(&NoModel).verdict, Verdict::HumanVerified);

    // The receiving side rebuilds the same ledger from the shipped batches.
    let mut receiver = SessionAggregate::with_id(session_id, "docs.example.com", PipelineConfig::default());
    receiver.start(None).unwrap();
    let batches = spool.read_batches().unwrap();
    assert!(batches.len() > 1);
    for batch in &batches {
        let outcome = receiver
            .ingest_batch(batch.batch_sequence, batch.events.clone())
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Applied { .. }));
    }
    assert_eq!(
        receiver
            .ingest_batch(batches[0].batch_sequence, batches[0].events.clone())
            .unwrap(),
        IngestOutcome::AlreadyApplied
    );
    assert_eq!(receiver.ledger(), local.ledger());
    receiver.end().unwrap();

    let analysis = receiver.analyze(&NoModel);
    assert_eq!(analysis.result.verdict, Verdict::HumanVerified);

    let text = "a".repeat(40);
    let report = ReportBuilder::new().build(
        session_id,
        &analysis.features,
        receiver.ledger(),
        &analysis.result,
        &text,
    );
    let signed = ReportSigner::new(SigningIdentity::generate()).sign(report).unwrap();

    let reloaded = humansign_agent::SignedReport::from_json(&signed.to_json().unwrap()).unwrap();
    let verification = verify_report(&reloaded, Some(&text));
    assert!(verification.is_trusted());

    let edited = format!("{text}!");
    let verification = verify_report(&reloaded, Some(&edited));
    assert_eq!(verification.signature, SignatureStatus::Valid);
    assert!(verification.is_tampered());
}

#[test]
fn test_paste_side_effects_are_not_typing() {
    let dir = tempfile::tempdir().unwrap();
    let mut spool = SpoolSink::new(dir.path().join("batches.jsonl"));
    let mut context = CaptureContext::new(PipelineConfig::default());
    context.start_session("docs.example.com", 0.0).unwrap();
    let keys = context.tap(CaptureSource::KeyListener);
    let inputs = context.tap(CaptureSource::InputChange);
    let clipboard = context.tap(CaptureSource::PasteListener);

    let end = type_through(&mut context, &mut spool, &keys, &inputs, 20);
    clipboard.paste(200, end + 300.0).unwrap();
    inputs.input(200, end + 302.0).unwrap();
    context.stop(&mut spool, end + 500.0).unwrap();

    let aggregate = context.aggregate_mut().unwrap();
    assert_eq!(aggregate.ledger().typed, 20);
    assert_eq!(aggregate.ledger().pasted, 200);
    assert_eq!(aggregate.classify(&NoModel).verdict, Verdict::PasteDominant);
}

fn burst_session(burst_keys: usize) -> SessionAggregate {
    let mut aggregate = SessionAggregate::new("docs.example.com", PipelineConfig::default());
    aggregate.start(Some(0.0)).unwrap();

    let mut t = 0.0;
    for i in 0..25u32 {
        aggregate.submit(&RawEvent::key_press(65 + i, Some('a'), t)).unwrap();
        aggregate.submit(&RawEvent::key_release(65 + i, t + 80.0)).unwrap();
        t += 200.0;
    }
    // Press every 3 ms, held for 2 ms.
    let mut t = t - 200.0 + 81.0;
    for i in 0..burst_keys as u32 {
        aggregate.submit(&RawEvent::key_press(48 + i, Some('b'), t)).unwrap();
        aggregate.submit(&RawEvent::key_release(48 + i, t + 2.0)).unwrap();
        t += 3.0;
    }
    aggregate
}

#[test]
fn test_five_fast_keys_are_a_burst() {
    let mut aggregate = burst_session(5);
    let analysis = aggregate.analyze(&NoModel);
    assert_eq!(analysis.features.burst.max_run_length, 5);
    assert_eq!(analysis.features.burst.run_count, 1);
    assert_eq!(analysis.result.verdict, Verdict::BurstDetected);
}

#[test]
fn test_four_fast_keys_are_not_a_burst() {
    let mut aggregate = burst_session(4);
    let analysis = aggregate.analyze(&NoModel);
    assert_eq!(analysis.features.burst.max_run_length, 4);
    assert!(!analysis.features.burst.has_burst);
    assert_eq!(analysis.result.verdict, Verdict::HumanVerified);
}

#[test]
fn test_suspended_recording_ships_everything_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("sessions"));
    let mut spool = SpoolSink::new(dir.path().join("batches.jsonl"));

    let mut context = CaptureContext::new(PipelineConfig::default());
    let session_id = context.start_session("docs.example.com", 0.0).unwrap();
    let keys = context.tap(CaptureSource::KeyListener);
    let inputs = context.tap(CaptureSource::InputChange);
    let end = type_through(&mut context, &mut spool, &keys, &inputs, 15);
    context.suspend(&store).unwrap();
    assert!(keys.key(KeyKind::Press, 90, Some('z'), end + 10.0).is_err());

    let mut resumed = CaptureContext::new(PipelineConfig::default());
    resumed.resume(&store, session_id).unwrap();
    let keys = resumed.tap(CaptureSource::KeyListener);
    keys.key(KeyKind::Press, 90, Some('z'), end + 200.0).unwrap();
    keys.key(KeyKind::Release, 90, None, end + 280.0).unwrap();
    resumed.stop(&mut spool, end + 400.0).unwrap();

    let shipped: usize = spool
        .read_batches()
        .unwrap()
        .iter()
        .map(|b| b.events.len())
        .sum();
    // 16 presses and 16 releases; the echoed input changes were duplicates.
    assert_eq!(shipped, 32);
    assert_eq!(resumed.aggregate().unwrap().ledger().typed, 16);
}
