//! Per-partition feedback edge from the workset tail to the head.
//!
//! The channel holds one round: `send` for round `n + 1` waits until the
//! head has taken round `n`'s payload.

use dfl_common::{DflError, PartitionId, Result, Round};
use dfl_execution::Record;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
struct WorksetPayload {
    round: Round,
    records: Vec<Record>,
}

/// Create the back channel of `partition`.
pub fn back_channel(partition: PartitionId) -> (WorksetProducer, WorksetConsumer) {
    let (tx, rx) = mpsc::channel(1);
    (
        WorksetProducer { partition, tx },
        WorksetConsumer { partition, rx },
    )
}

#[derive(Debug)]
pub struct WorksetProducer {
    partition: PartitionId,
    tx: mpsc::Sender<WorksetPayload>,
}

impl WorksetProducer {
    /// Hand the workset for `round` to the head.
    pub async fn send(&self, round: Round, records: Vec<Record>) -> Result<()> {
        let len = records.len();
        self.tx
            .send(WorksetPayload { round, records })
            .await
            .map_err(|_| {
                DflError::Execution(format!(
                    "back channel of partition {} closed",
                    self.partition
                ))
            })?;
        debug!(
            partition = self.partition.0,
            round = round.0,
            records = len,
            "workset sent"
        );
        Ok(())
    }
}

#[derive(Debug)]
pub struct WorksetConsumer {
    partition: PartitionId,
    rx: mpsc::Receiver<WorksetPayload>,
}

impl WorksetConsumer {
    /// Take the workset for `round`.
    pub async fn recv(&mut self, round: Round) -> Result<Vec<Record>> {
        let payload = self.rx.recv().await.ok_or_else(|| {
            DflError::Execution(format!(
                "back channel of partition {} closed before round {round}",
                self.partition
            ))
        })?;
        if payload.round != round {
            return Err(DflError::Execution(format!(
                "back channel of partition {} delivered round {} while round {round} was expected",
                self.partition, payload.round
            )));
        }
        Ok(payload.records)
    }

    /// Close the channel and discard any pending payload; returns the number
    /// of discarded records.
    pub fn drain(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while let Ok(payload) = self.rx.try_recv() {
            discarded += payload.records.len();
        }
        discarded
    }
}
