//! End-to-end scenarios spanning Decoder → Operator → Processor.

use tokio::sync::mpsc;
use xps_pipeline::decoder::Decoder;
use xps_pipeline::messages::{Frame, IntegratedLine, Message, PixelBuffer};
use xps_pipeline::operator::Operator;
use xps_pipeline::processor::peaks::fit_peaks;
use xps_pipeline::protocol::{DataType, ScanGeometry};
use xps_pipeline::settings::{PeakShape, ProcessingSettings};

fn start_json(scan_name: &str, width: i64, height: i64, f_reset: i64) -> serde_json::Value {
    serde_json::json!({
        "msg_type": "start",
        "scan_name": scan_name,
        "data_type": "U16",
        "F_Reset": f_reset,
        "Rectangle": {"Left": 0, "Top": 0, "Right": width, "Bottom": height, "Rotation": 0.0},
    })
}

fn event_pixels(width: usize, height: usize, fill: u16) -> Vec<u8> {
    (0..width * height).flat_map(|_| fill.to_be_bytes()).collect()
}

fn geometry(scan_name: &str, width: usize, height: usize, f_reset: u64) -> ScanGeometry {
    ScanGeometry {
        scan_name: scan_name.to_string(),
        data_type: DataType::U16,
        f_reset,
        height,
        width,
        notes: None,
    }
}

fn frame(frame_number: u64, width: usize, height: usize, fill: u16) -> Frame {
    Frame {
        frame_number,
        height,
        width,
        pixels: PixelBuffer::U16(vec![fill; width * height]),
    }
}

/// Spawns an `Operator` driven by a fresh inbox, returning the sender into
/// that inbox and the receiver for everything it publishes downstream.
fn spawn_operator() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
    let (inbox_tx, inbox_rx) = mpsc::channel(256);
    let (publish_tx, publish_rx) = mpsc::channel(256);
    let operator = Operator::new(ProcessingSettings::default(), publish_tx);
    tokio::spawn(async move {
        let _ = operator.run(inbox_rx).await;
    });
    (inbox_tx, publish_rx)
}

/// Scenario 1: a reference 1-D line with two known peaks.
#[test]
fn reference_line_with_two_peaks_is_fit_exactly() {
    let width = 1131usize;
    let mut line = vec![1.0f64; width];
    for &center in &[350usize, 650usize] {
        for i in 0..width {
            let d = i as f64 - center as f64;
            line[i] += 40.0 * (-d * d / (2.0 * 8.0 * 8.0)).exp();
        }
    }
    let table = fit_peaks(&IntegratedLine(line), 2, PeakShape::Gaussian);
    assert_eq!(table.rows.len(), 2);
    assert!((300..400).contains(&table.rows[0].index));
    assert!((600..700).contains(&table.rows[1].index));
}

/// Scenario 2: shape round-trip on a 300x1131 stack via the full event path.
#[tokio::test]
async fn shape_round_trip_on_a_known_stack() {
    let (inbox_tx, mut publish_rx) = spawn_operator();
    let height = 2usize;
    let width = 1131usize;

    inbox_tx
        .send(Message::ScanStart(geometry("run-shape", width, height, 300)))
        .await
        .unwrap();
    for n in 1..=300u64 {
        inbox_tx
            .send(Message::RawEvent(frame(n, width, height, n as u16)))
            .await
            .unwrap();
    }
    inbox_tx
        .send(Message::ScanStop(None))
        .await
        .unwrap();
    drop(inbox_tx);

    let mut last_result = None;
    while let Some(msg) = publish_rx.recv().await {
        if let Message::Result(r) = msg {
            last_result = Some(r);
        }
    }
    let result = last_result.expect("a Result must have been emitted on the last boundary");
    assert_eq!(result.stack_rows.len(), 300);
    assert_eq!(result.spectral.vfft.len(), 300);
    assert_eq!(result.spectral.ifft.len(), 300);
    assert_eq!(result.spectral.vfft[0].len(), width);
}

/// Scenario 3: full lifecycle with f_reset=5 over 10 events.
#[tokio::test]
async fn lifecycle_emits_two_results_and_one_resultstop() {
    let (inbox_tx, mut publish_rx) = spawn_operator();

    inbox_tx
        .send(Message::ScanStart(geometry("run-lifecycle", 8, 2, 5)))
        .await
        .unwrap();
    for n in 0..=9u64 {
        inbox_tx.send(Message::RawEvent(frame(n, 8, 2, 1))).await.unwrap();
    }
    inbox_tx.send(Message::ScanStop(None)).await.unwrap();
    drop(inbox_tx);

    let mut result_frames = Vec::new();
    let mut result_stop_seen = false;
    while let Some(msg) = publish_rx.recv().await {
        match msg {
            Message::Result(r) => result_frames.push(r.frame_number),
            Message::ResultStop(stop) => {
                result_stop_seen = true;
                assert!(!stop.timing.rows.is_empty());
            }
            _ => {}
        }
    }
    assert_eq!(result_frames, vec![5, 9]);
    assert!(result_stop_seen);
}

/// Scenario 4: a malformed frame between two valid events is skipped, the
/// Decoder resynchronizes, and the next event still reaches the Operator.
#[test]
fn malformed_frame_is_skipped_and_next_event_still_decoded() {
    let mut decoder = Decoder::new();
    assert!(decoder
        .accept(start_json("run-4", 2, 2, 5).to_string().as_bytes())
        .unwrap()
        .is_some());

    let bad = serde_json::json!({"msg_type": "not_a_real_type"});
    assert!(decoder.accept(bad.to_string().as_bytes()).is_err());

    let header = serde_json::json!({"msg_type": "event", "Frame Number": 3});
    assert!(decoder.accept(header.to_string().as_bytes()).unwrap().is_none());
    let event = decoder.accept(&event_pixels(2, 2, 9)).unwrap();
    match event {
        Some(Message::RawEvent(frame)) => assert_eq!(frame.frame_number, 3),
        other => panic!("expected RawEvent, got {other:?}"),
    }
}

/// Scenario 6: a second `start` during an active scan discards the first
/// Processor without a ResultStop and tags subsequent Results with the new
/// scan.
#[tokio::test]
async fn scan_replacement_discards_without_resultstop() {
    let (inbox_tx, mut publish_rx) = spawn_operator();

    inbox_tx.send(Message::ScanStart(geometry("run-a", 4, 2, 5))).await.unwrap();
    inbox_tx.send(Message::RawEvent(frame(1, 4, 2, 1))).await.unwrap();
    inbox_tx.send(Message::ScanStart(geometry("run-b", 4, 2, 1))).await.unwrap();
    inbox_tx.send(Message::RawEvent(frame(1, 4, 2, 2))).await.unwrap();
    inbox_tx.send(Message::ScanStop(None)).await.unwrap();
    drop(inbox_tx);

    let mut result_stops = 0;
    let mut scan_names = Vec::new();
    while let Some(msg) = publish_rx.recv().await {
        match msg {
            Message::ResultStop(_) => result_stops += 1,
            Message::Result(r) => scan_names.push(r.scan_name),
            _ => {}
        }
    }
    assert_eq!(result_stops, 1);
    assert!(scan_names.iter().all(|name| name == "run-b"));
}
