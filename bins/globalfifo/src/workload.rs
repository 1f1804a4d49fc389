//! Producer/consumer traffic over one shared channel.
//!
//! Producers each own a contiguous slice of a global byte pattern and write
//! it in `chunk_size` pieces; one consumer drains until every byte arrived.
//! With a single producer the consumer also checks byte order. All sessions
//! share one interrupt so a failure on either side unblocks the other.

use anyhow::{Context, Result, anyhow, bail};
use globalfifo_channel::{BoundedChannel, ChannelHandle, FifoError, Interrupt, OpenOptions};
use globalfifo_config::WorkloadConfig;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug)]
pub struct Summary {
    pub bytes: usize,
    pub reads: usize,
    pub elapsed: Duration,
}

impl Summary {
    pub fn mib_per_sec(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0) / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

#[inline]
pub fn pattern(i: usize) -> u8 {
    (i % 251) as u8
}

/// Splits `total` bytes into `(offset, len)` shares, the first
/// `total % producers` shares one byte longer.
fn shares(total: usize, producers: usize) -> Vec<(usize, usize)> {
    let base = total / producers;
    let rem = total % producers;
    let mut offset = 0;
    (0..producers)
        .map(|i| {
            let len = base + usize::from(i < rem);
            let share = (offset, len);
            offset += len;
            share
        })
        .collect()
}

pub fn run(chan: &BoundedChannel, cfg: &WorkloadConfig) -> Result<Summary> {
    let irq = Interrupt::new();
    let session = OpenOptions::new()
        .non_blocking(cfg.non_blocking)
        .interrupt(irq.clone());

    let mut consumer_opts = session.clone();
    if let Some(timeout) = cfg.read_timeout() {
        consumer_opts = consumer_opts.timeout(timeout);
    }
    let consumer = chan.open_with(consumer_opts);

    info!(
        producers = cfg.producers,
        total_bytes = cfg.total_bytes,
        chunk_size = cfg.chunk_size,
        non_blocking = cfg.non_blocking,
        "workload starting"
    );
    let start = Instant::now();

    thread::scope(|s| {
        let producers: Vec<_> = shares(cfg.total_bytes, cfg.producers)
            .into_iter()
            .enumerate()
            .map(|(id, (offset, len))| {
                let handle = chan.open_with(session.clone());
                let irq = irq.clone();
                s.spawn(move || {
                    let res = produce(&handle, offset, len, cfg.chunk_size);
                    if let Err(e) = &res {
                        error!(producer = id, error = %e, "producer failed");
                        irq.raise();
                    }
                    res
                })
            })
            .collect();

        let consumed = consume(&consumer, cfg.total_bytes, cfg.chunk_size, cfg.producers == 1);
        if consumed.is_err() {
            irq.raise();
        }

        let produced = producers.into_iter().map(|p| p.join()).collect();
        let reads = settle(consumed, produced)?;
        Ok(Summary {
            bytes: cfg.total_bytes,
            reads,
            elapsed: start.elapsed(),
        })
    })
}

/// Picks the error to report once both sides have stopped.
///
/// A failing consumer raises the shared interrupt, so producers it leaves
/// blocked come back `Interrupted`; the consumer's error is the cause.
fn settle(
    consumed: Result<usize>,
    produced: Vec<thread::Result<Result<(), FifoError>>>,
) -> Result<usize> {
    let reads = consumed?;
    for (id, res) in produced.into_iter().enumerate() {
        res.map_err(|_| anyhow!("producer {id} panicked"))?
            .with_context(|| format!("producer {id}"))?;
    }
    Ok(reads)
}

fn produce(
    handle: &ChannelHandle,
    offset: usize,
    len: usize,
    chunk_size: usize,
) -> Result<(), FifoError> {
    let data: Vec<u8> = (offset..offset + len).map(pattern).collect();
    for chunk in data.chunks(chunk_size) {
        let mut rest = chunk;
        while !rest.is_empty() {
            match handle.write(rest) {
                Ok(n) => rest = &rest[n..],
                Err(FifoError::WouldBlock) => {
                    if handle.interrupt().is_some_and(Interrupt::is_raised) {
                        return Err(FifoError::Interrupted);
                    }
                    thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Reads until `total` bytes arrived. Returns the number of read calls
/// that produced data.
fn consume(handle: &ChannelHandle, total: usize, chunk_size: usize, ordered: bool) -> Result<usize> {
    let mut buf = vec![0u8; chunk_size];
    let mut received = 0;
    let mut reads = 0;

    while received < total {
        let n = match handle.read(&mut buf) {
            Ok(n) => n,
            Err(FifoError::WouldBlock) => {
                if handle.interrupt().is_some_and(Interrupt::is_raised) {
                    bail!("consumer interrupted after {received} of {total} bytes");
                }
                thread::yield_now();
                continue;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("consumer stopped after {received} of {total} bytes"));
            }
        };

        if ordered {
            if let Some(i) = (0..n).find(|&i| buf[i] != pattern(received + i)) {
                bail!("byte {} out of order", received + i);
            }
        }
        received += n;
        reads += 1;
    }
    Ok(reads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_cover_total() {
        assert_eq!(shares(10, 3), vec![(0, 4), (4, 3), (7, 3)]);
        assert_eq!(shares(2, 4), vec![(0, 1), (1, 1), (2, 0), (2, 0)]);
    }

    #[test]
    fn single_producer_blocking() {
        let chan = BoundedChannel::with_capacity(16);
        let cfg = WorkloadConfig {
            total_bytes: 5000,
            chunk_size: 7,
            ..WorkloadConfig::default()
        };
        let summary = run(&chan, &cfg).unwrap();
        assert_eq!(summary.bytes, 5000);
        assert!(summary.reads >= 5000 / 7);
        assert!(chan.is_empty());
    }

    #[test]
    fn several_producers_non_blocking() {
        let chan = BoundedChannel::with_capacity(32);
        let cfg = WorkloadConfig {
            producers: 3,
            total_bytes: 9001,
            chunk_size: 50,
            non_blocking: true,
            read_timeout_ms: None,
        };
        run(&chan, &cfg).unwrap();
        assert!(chan.is_empty());
        assert_eq!(chan.stats().open_handles, 0);
    }

    #[test]
    fn consumer_error_wins_over_interrupted_producers() {
        let consumed = Err(anyhow!("byte 7 out of order"));
        let produced = vec![Ok(Err(FifoError::Interrupted)), Ok(Ok(()))];
        let err = settle(consumed, produced).unwrap_err();
        assert!(err.to_string().contains("out of order"), "{err:#}");
    }

    #[test]
    fn producer_error_surfaces_when_consumer_finished() {
        let produced = vec![Ok(Ok(())), Ok(Err(FifoError::WouldBlock))];
        let err = settle(Ok(3), produced).unwrap_err();
        assert_eq!(err.to_string(), "producer 1");
        assert_eq!(settle(Ok(3), vec![Ok(Ok(()))]).unwrap(), 3);
    }

    #[test]
    fn consumer_timeout_is_reported() {
        let chan = BoundedChannel::with_capacity(8);
        let consumer = chan.open_with(OpenOptions::new().timeout(Duration::from_millis(20)));
        let err = consume(&consumer, 4, 4, true).unwrap_err();
        assert!(err.to_string().contains("after 0 of 4"), "{err:#}");
    }
}
