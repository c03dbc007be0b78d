//! In-process exchange between the head role of every partition and the
//! intermediate role of every partition.
//!
//! Each producer sends its round output in batches followed by one
//! end-of-round event per target. A consumer's [`RoundGate`] releases the
//! round only after `events_until_interrupt` end-of-round events (one per
//! head partition) have arrived. Received records are concatenated in
//! upstream partition order, so the grouped input does not depend on task
//! scheduling.
//!
//! Channels are unbounded: every partition sends to every other partition
//! before it reads its own input, so bounded channels could deadlock.

use dfl_common::{DflError, PartitionId, Result, Round};
use dfl_execution::{Record, RecordComparator};
use tokio::sync::mpsc;
use tracing::debug;

use crate::partitioner::{HashPartitioner, ShipStrategy};

#[derive(Debug)]
pub enum ExchangeMessage {
    Records {
        round: Round,
        from: PartitionId,
        records: Vec<Record>,
    },
    EndOfRound {
        round: Round,
        from: PartitionId,
    },
}

/// Build a full mesh for `parallelism` partitions.
///
/// Element `i` of each returned vector belongs to partition `i`.
pub fn exchange(
    parallelism: u32,
    batch_records: usize,
) -> Result<(Vec<ExchangeSender>, Vec<ExchangeReceiver>)> {
    let partitioner = HashPartitioner::new(parallelism)?;
    let mut txs = Vec::with_capacity(parallelism as usize);
    let mut receivers = Vec::with_capacity(parallelism as usize);
    for p in 0..parallelism {
        let (tx, rx) = mpsc::unbounded_channel();
        txs.push(tx);
        receivers.push(ExchangeReceiver {
            partition: PartitionId(p),
            rx,
            gate: RoundGate::new(parallelism as usize),
        });
    }
    let senders = (0..parallelism)
        .map(|p| ExchangeSender {
            from: PartitionId(p),
            targets: txs.clone(),
            partitioner,
            batch_records: batch_records.max(1),
        })
        .collect();
    Ok((senders, receivers))
}

#[derive(Debug, Clone)]
pub struct ExchangeSender {
    from: PartitionId,
    targets: Vec<mpsc::UnboundedSender<ExchangeMessage>>,
    partitioner: HashPartitioner,
    batch_records: usize,
}

impl ExchangeSender {
    pub fn partition(&self) -> PartitionId {
        self.from
    }

    /// Route one round's output by `strategy`; returns records shipped.
    ///
    /// `key` is consulted only for [`ShipStrategy::PartitionHash`].
    pub fn route(
        &self,
        round: Round,
        strategy: ShipStrategy,
        key: &mut RecordComparator,
        records: Vec<Record>,
    ) -> Result<u64> {
        let shipped = records.len() as u64;
        match strategy {
            ShipStrategy::Forward => self.send_to(round, self.from, records)?,
            ShipStrategy::PartitionHash => {
                let buckets = self.partitioner.split(key, records)?;
                for (target, bucket) in buckets.into_iter().enumerate() {
                    self.send_to(round, PartitionId(target as u32), bucket)?;
                }
            }
            ShipStrategy::Broadcast => {
                for target in 0..self.targets.len() {
                    self.send_to(round, PartitionId(target as u32), records.clone())?;
                }
            }
        }
        Ok(shipped)
    }

    /// Send records to one target in batches.
    pub fn send_to(&self, round: Round, target: PartitionId, records: Vec<Record>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let tx = self.target(target)?;
        let mut records = records;
        while !records.is_empty() {
            let rest = if records.len() > self.batch_records {
                records.split_off(self.batch_records)
            } else {
                Vec::new()
            };
            tx.send(ExchangeMessage::Records {
                round,
                from: self.from,
                records,
            })
            .map_err(|_| closed(target))?;
            records = rest;
        }
        Ok(())
    }

    /// Signal end of `round` to every target.
    pub fn finish_round(&self, round: Round) -> Result<()> {
        for (i, tx) in self.targets.iter().enumerate() {
            tx.send(ExchangeMessage::EndOfRound {
                round,
                from: self.from,
            })
            .map_err(|_| closed(PartitionId(i as u32)))?;
        }
        debug!(partition = self.from.0, round = round.0, "exchange round finished");
        Ok(())
    }

    fn target(&self, target: PartitionId) -> Result<&mpsc::UnboundedSender<ExchangeMessage>> {
        self.targets.get(target.index()).ok_or_else(|| {
            DflError::Execution(format!(
                "exchange target {target} out of range ({} partitions)",
                self.targets.len()
            ))
        })
    }
}

fn closed(target: PartitionId) -> DflError {
    DflError::Execution(format!("exchange to partition {target} closed"))
}

#[derive(Debug)]
pub struct ExchangeReceiver {
    partition: PartitionId,
    rx: mpsc::UnboundedReceiver<ExchangeMessage>,
    gate: RoundGate,
}

impl ExchangeReceiver {
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Wait until every upstream partition has finished `round` and return
    /// its records in upstream partition order.
    pub async fn receive_round(&mut self, round: Round) -> Result<Vec<Record>> {
        self.gate.open(round);
        while !self.gate.is_released() {
            let msg = self.rx.recv().await.ok_or_else(|| {
                DflError::Execution(format!(
                    "exchange into partition {} closed during round {round}",
                    self.partition
                ))
            })?;
            self.gate.accept(msg)?;
        }
        let records = self.gate.take();
        debug!(
            partition = self.partition.0,
            round = round.0,
            records = records.len(),
            "exchange round received"
        );
        Ok(records)
    }
}

/// Counts end-of-round events and buffers records per upstream partition.
#[derive(Debug)]
pub struct RoundGate {
    events_until_interrupt: usize,
    round: Round,
    ended: Vec<bool>,
    remaining: usize,
    buffers: Vec<Vec<Record>>,
}

impl RoundGate {
    pub fn new(events_until_interrupt: usize) -> Self {
        Self {
            events_until_interrupt,
            round: Round::FIRST,
            ended: vec![false; events_until_interrupt],
            remaining: events_until_interrupt,
            buffers: vec![Vec::new(); events_until_interrupt],
        }
    }

    pub fn events_until_interrupt(&self) -> usize {
        self.events_until_interrupt
    }

    /// Start collecting `round`.
    pub fn open(&mut self, round: Round) {
        self.round = round;
        self.remaining = self.events_until_interrupt;
        self.ended.iter_mut().for_each(|e| *e = false);
        self.buffers.iter_mut().for_each(Vec::clear);
    }

    pub fn accept(&mut self, msg: ExchangeMessage) -> Result<()> {
        match msg {
            ExchangeMessage::Records {
                round,
                from,
                records,
            } => {
                self.check(round, from)?;
                self.buffers[from.index()].extend(records);
            }
            ExchangeMessage::EndOfRound { round, from } => {
                self.check(round, from)?;
                self.ended[from.index()] = true;
                self.remaining -= 1;
            }
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.remaining == 0
    }

    /// Records of the released round, concatenated in upstream order.
    pub fn take(&mut self) -> Vec<Record> {
        let total = self.buffers.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for buffer in &mut self.buffers {
            out.append(buffer);
        }
        out
    }

    fn check(&self, round: Round, from: PartitionId) -> Result<()> {
        if round != self.round {
            return Err(DflError::Execution(format!(
                "exchange message for round {round} while collecting round {}",
                self.round
            )));
        }
        match self.ended.get(from.index()) {
            None => Err(DflError::Execution(format!(
                "exchange message from unknown partition {from}"
            ))),
            Some(true) => Err(DflError::Execution(format!(
                "partition {from} sent data after ending round {round}"
            ))),
            Some(false) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use dfl_execution::{KeySpec, KeyType, Value};

    use super::*;

    fn rec(k: i64, v: i64) -> Record {
        Record::from_values([Value::Int64(k), Value::Int64(v)])
    }

    #[test]
    fn gate_waits_for_every_upstream_partition() {
        let mut gate = RoundGate::new(2);
        gate.open(Round(3));
        gate.accept(ExchangeMessage::Records {
            round: Round(3),
            from: PartitionId(1),
            records: vec![rec(1, 10)],
        })
        .expect("accept");
        gate.accept(ExchangeMessage::EndOfRound {
            round: Round(3),
            from: PartitionId(1),
        })
        .expect("accept");
        assert!(!gate.is_released());
        gate.accept(ExchangeMessage::Records {
            round: Round(3),
            from: PartitionId(0),
            records: vec![rec(2, 20)],
        })
        .expect("accept");
        gate.accept(ExchangeMessage::EndOfRound {
            round: Round(3),
            from: PartitionId(0),
        })
        .expect("accept");
        assert!(gate.is_released());
        assert_eq!(gate.take(), vec![rec(2, 20), rec(1, 10)]);
    }

    #[test]
    fn gate_rejects_protocol_violations() {
        let mut gate = RoundGate::new(1);
        gate.open(Round(2));
        assert!(
            gate.accept(ExchangeMessage::EndOfRound {
                round: Round(1),
                from: PartitionId(0),
            })
            .is_err()
        );
        gate.accept(ExchangeMessage::EndOfRound {
            round: Round(2),
            from: PartitionId(0),
        })
        .expect("end");
        assert!(
            gate.accept(ExchangeMessage::Records {
                round: Round(2),
                from: PartitionId(0),
                records: vec![],
            })
            .is_err()
        );
        assert!(
            gate.accept(ExchangeMessage::EndOfRound {
                round: Round(2),
                from: PartitionId(5),
            })
            .is_err()
        );
    }

    #[tokio::test]
    async fn hash_routing_delivers_each_key_to_one_partition() {
        let (senders, mut receivers) = exchange(2, 2).expect("exchange");
        let mut key = RecordComparator::new(KeySpec::single(0, KeyType::Int64)).expect("cmp");
        let round = Round::FIRST;
        for sender in &senders {
            let records = (0..6).map(|k| rec(k, sender.partition().0 as i64)).collect();
            let shipped = sender
                .route(round, ShipStrategy::PartitionHash, &mut key, records)
                .expect("route");
            assert_eq!(shipped, 6);
            sender.finish_round(round).expect("finish");
        }

        let mut seen = Vec::new();
        for receiver in &mut receivers {
            let got = receiver.receive_round(round).await.expect("receive");
            let mut last_origin = 0;
            for r in &got {
                let origin = r.get_i64(1).expect("origin");
                assert!(origin >= last_origin);
                last_origin = origin;
                seen.push((r.get_i64(0).expect("key"), receiver.partition()));
            }
        }
        assert_eq!(seen.len(), 12);
        for k in 0..6 {
            let owners: Vec<_> = seen.iter().filter(|(key, _)| *key == k).map(|(_, p)| *p).collect();
            assert_eq!(owners.len(), 2);
            assert_eq!(owners[0], owners[1]);
        }
    }

    #[tokio::test]
    async fn broadcast_copies_to_every_partition() {
        let (senders, mut receivers) = exchange(3, 16).expect("exchange");
        let mut key = RecordComparator::new(KeySpec::single(0, KeyType::Int64)).expect("cmp");
        let round = Round(4);
        senders[0]
            .route(round, ShipStrategy::Broadcast, &mut key, vec![rec(1, 1)])
            .expect("route");
        for sender in &senders {
            sender.finish_round(round).expect("finish");
        }
        for receiver in &mut receivers {
            assert_eq!(receiver.receive_round(round).await.expect("receive"), vec![rec(1, 1)]);
        }
    }
}
