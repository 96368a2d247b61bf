//! Scan lifecycle state machine. Owns at most one [`Processor`] at a time
//! and drives it from the message stream the [`crate::decoder::Decoder`]
//! produces, publishing the Processor's derived output onward.
//!
//! CPU-heavy numerical work (`Processor::process_event` / `finish`) is
//! offloaded to `tokio::task::spawn_blocking` so this actor's control loop
//! — and therefore the socket it reads from — stays responsive under load,
//! the same division of labor the teacher's network actor draws between its
//! `select!` loop and the work it hands off per connection.

use crate::error::{AppResult, XpsError};
use crate::messages::{Frame, Message};
use crate::processor::Processor;
use crate::protocol::ScanGeometry;
use crate::settings::ProcessingSettings;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct Operator {
    processor: Option<Processor>,
    settings: ProcessingSettings,
    publish_tx: mpsc::Sender<Message>,
}

impl Operator {
    pub fn new(settings: ProcessingSettings, publish_tx: mpsc::Sender<Message>) -> Self {
        Self {
            processor: None,
            settings,
            publish_tx,
        }
    }

    /// Drain `inbox` until the sender side closes. Lifecycle errors
    /// (`EventOutsideScan`, `StopWithoutStart`) are recoverable per
    /// spec's IDLE/ARMED transition table — they're logged by `on_event`/
    /// `on_stop` and dropped here rather than ending this task; only a
    /// closed downstream (`Fatal`) ends the loop.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Message>) -> AppResult<()> {
        while let Some(msg) = inbox.recv().await {
            if let Err(e) = self.handle(msg).await {
                if e.is_recoverable_lifecycle_error() {
                    continue;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn handle(&mut self, msg: Message) -> AppResult<()> {
        match msg {
            Message::ScanStart(geometry) => self.on_start(geometry).await,
            Message::RawEvent(frame) => self.on_event(frame).await,
            Message::ScanStop(metadata) => self.on_stop(metadata).await,
            Message::Result(_) | Message::ResultStop(_) => {
                warn!("operator received a downstream message type, ignoring");
                Ok(())
            }
        }
    }

    async fn on_start(&mut self, geometry: ScanGeometry) -> AppResult<()> {
        if let Some(old) = self.processor.take() {
            // A start arriving while a scan is already active is a
            // replacement: the previous scan's Processor is discarded
            // without a ResultStop, it was never cleanly finished.
            warn!(
                previous_scan = old.scan_name(),
                next_scan = %geometry.scan_name,
                "scan.replaced"
            );
        }
        info!(scan_name = %geometry.scan_name, height = geometry.height, width = geometry.width, "scan.started");
        self.publish(Message::ScanStart(geometry.clone())).await?;
        self.processor = Some(Processor::new(&geometry, self.settings.clone()));
        Ok(())
    }

    async fn on_event(&mut self, frame: Frame) -> AppResult<()> {
        let Some(processor) = self.processor.take() else {
            warn!(frame_number = frame.frame_number, "event outside scan, dropping");
            return Err(XpsError::EventOutsideScan);
        };

        let (processor, outcome) = tokio::task::spawn_blocking(move || {
            let mut processor = processor;
            let outcome = processor.process_event(&frame);
            (processor, outcome)
        })
        .await
        .map_err(|e| XpsError::Fatal(format!("processor task panicked: {e}")))?;

        self.processor = Some(processor);

        if let Some(result) = outcome? {
            self.publish(Message::Result(result)).await?;
        }
        Ok(())
    }

    async fn on_stop(&mut self, metadata: Option<serde_json::Value>) -> AppResult<()> {
        let Some(processor) = self.processor.take() else {
            warn!("stop received with no active scan");
            return Err(XpsError::StopWithoutStart);
        };

        let scan_name = processor.scan_name().to_string();
        let stop_msg = tokio::task::spawn_blocking(move || processor.finish())
            .await
            .map_err(|e| XpsError::Fatal(format!("processor task panicked: {e}")))?;

        info!(scan_name = %scan_name, "scan.stopped");
        self.publish(Message::ScanStop(metadata)).await?;
        self.publish(Message::ResultStop(stop_msg)).await
    }

    async fn publish(&self, msg: Message) -> AppResult<()> {
        self.publish_tx
            .send(msg)
            .await
            .map_err(|_| XpsError::Fatal("publisher fan-out inbox closed".to_string()))
    }
}
