//! Trace records and the hooks that receive them.

use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Per-batch trace record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchTrace {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub job: &'static str,
    pub epoch: usize,
    pub batch: usize,
    pub size: usize,
    pub batches: usize,
    pub lr: f32,
    pub avg_loss: f32,
    pub penalties: BTreeMap<String, f32>,
    pub penalty: f32,
    pub cost: f32,
    pub prepare_time: f64,
    pub forward_time: f64,
    pub backward_time: f64,
    pub optimizer_time: f64,
}

/// Per-epoch trace record. Times are seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochTrace {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub job: &'static str,
    pub epoch: usize,
    pub batches: usize,
    pub size: usize,
    pub lr: f32,
    /// Example-weighted mean of the batch losses.
    pub avg_loss: f32,
    pub avg_penalty: f32,
    pub avg_penalties: BTreeMap<String, f32>,
    pub avg_cost: f32,
    pub epoch_time: f64,
    pub prepare_time: f64,
    pub forward_time: f64,
    pub backward_time: f64,
    pub optimizer_time: f64,
    /// Epoch time not covered by the four buckets.
    pub other_time: f64,
}

/// Hooks invoked by the training job, in registration order.
///
/// Trace hooks may edit the record before later observers see it.
pub trait TrainingObserver {
    fn pre_batch(&mut self, _epoch: usize, _batch_index: usize) -> Result<()> {
        Ok(())
    }

    fn post_batch_trace(&mut self, _trace: &mut BatchTrace) -> Result<()> {
        Ok(())
    }

    fn post_epoch_trace(&mut self, _trace: &mut EpochTrace) -> Result<()> {
        Ok(())
    }

    fn post_epoch(&mut self, _trace: &EpochTrace) -> Result<()> {
        Ok(())
    }
}

/// Writes traces through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceLogger;

impl TrainingObserver for TraceLogger {
    fn post_batch_trace(&mut self, trace: &mut BatchTrace) -> Result<()> {
        tracing::debug!(
            epoch = trace.epoch,
            batch = trace.batch,
            batches = trace.batches,
            avg_loss = trace.avg_loss,
            penalty = trace.penalty,
            cost = trace.cost,
            "batch done"
        );
        Ok(())
    }

    fn post_epoch_trace(&mut self, trace: &mut EpochTrace) -> Result<()> {
        tracing::info!(
            epoch = trace.epoch,
            avg_loss = trace.avg_loss,
            avg_penalty = trace.avg_penalty,
            avg_cost = trace.avg_cost,
            epoch_time = trace.epoch_time,
            "{} epoch done",
            trace.job
        );
        Ok(())
    }
}

/// Writes every trace as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesTrace<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesTrace<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> TrainingObserver for JsonLinesTrace<W> {
    fn post_batch_trace(&mut self, trace: &mut BatchTrace) -> Result<()> {
        self.write_line(trace)
    }

    fn post_epoch_trace(&mut self, trace: &mut EpochTrace) -> Result<()> {
        self.write_line(trace)
    }

    fn post_epoch(&mut self, _trace: &EpochTrace) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
