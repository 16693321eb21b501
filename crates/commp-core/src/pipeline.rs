//! Pipelined layer reducer: one worker thread per active tree layer.
//!
//! Layer 0 is spawned on the first leaf; each worker lazily spawns the
//! layer above it the first time it pairs two digests. Workers are chained
//! by bounded channels (backpressure doubles as flow control). Dropping the
//! layer-0 sender is the finalize signal: every worker flushes its held
//! digest against the same-height zero sibling, closes the layer above, and
//! exits. The last worker in the chain delivers the root.
//!
//! Roots are byte-identical to [`crate::reducer::SyncReducer`]; a digest
//! and its flush travel the exact same pairing order, just on other
//! threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result};
use crate::hash::{node_hash, Digest};
use crate::reducer::LayerReduce;
use crate::zerocomm::ZeroComm;
use crate::MAX_LAYERS;

/// Per-layer channel depth, matching the reference pipeline.
const LAYER_QUEUE_DEPTH: usize = 1024;

/// Cooperative cancellation for a [`PipelinedReducer`].
///
/// Triggering tears the layer workers down without producing a root; the
/// owning engine reports [`Error::Shutdown`] from then on and must be
/// reconstructed.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Signal every layer worker to stop at its next message.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

struct LayerWorker {
    index: usize,
    rx: Receiver<Digest>,
    result_tx: SyncSender<Option<Digest>>,
    zero: Arc<ZeroComm>,
    shutdown: Arc<AtomicBool>,
}

impl LayerWorker {
    fn spawn(
        index: usize,
        result_tx: SyncSender<Option<Digest>>,
        zero: Arc<ZeroComm>,
        shutdown: Arc<AtomicBool>,
    ) -> SyncSender<Digest> {
        let (tx, rx) = sync_channel(LAYER_QUEUE_DEPTH);
        let worker = Self {
            index,
            rx,
            result_tx,
            zero,
            shutdown,
        };
        thread::spawn(move || worker.run());
        tx
    }

    fn run(self) {
        let mut held: Option<Digest> = None;
        let mut next_tx: Option<SyncSender<Digest>> = None;

        loop {
            let Ok(digest) = self.rx.recv() else {
                // Our queue closed: the stream below is complete. An
                // aborted stack exits without flushing; no root may escape
                // after a shutdown.
                if !self.shutdown.load(Ordering::Relaxed) {
                    self.collapse(held, next_tx);
                }
                return;
            };
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }

            match held.take() {
                None => held = Some(digest),
                Some(left) => {
                    if next_tx.is_none() {
                        if self.index + 1 >= MAX_LAYERS {
                            // The engine's payload cap makes this
                            // unreachable; surface it rather than park.
                            let _ = self.result_tx.send(None);
                            return;
                        }
                        next_tx = Some(Self::spawn(
                            self.index + 1,
                            self.result_tx.clone(),
                            Arc::clone(&self.zero),
                            Arc::clone(&self.shutdown),
                        ));
                    }
                    let Some(up) = next_tx.as_ref() else { return };
                    if up.send(node_hash(&left, &digest)).is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Close-time cascade: flush the held digest upward (zero-padded) and
    /// propagate the close, or — if no layer was ever opened above us — we
    /// hold the root.
    fn collapse(self, held: Option<Digest>, next_tx: Option<SyncSender<Digest>>) {
        match next_tx {
            None => {
                let _ = self.result_tx.send(held);
            }
            Some(tx) => {
                if let Some(h) = held {
                    let padded = node_hash(&h, self.zero.pad_for_layer(self.index));
                    let _ = tx.send(padded);
                }
                // Dropping `tx` here closes the layer above.
            }
        }
    }
}

/// Reducer running each active layer on its own worker thread.
pub struct PipelinedReducer {
    zero: Arc<ZeroComm>,
    shutdown: Arc<AtomicBool>,
    layer0_tx: Option<SyncSender<Digest>>,
    result_rx: Option<Receiver<Option<Digest>>>,
}

impl PipelinedReducer {
    /// A reset reducer; no threads run until the first leaf arrives.
    #[must_use]
    pub fn new() -> Self {
        Self {
            zero: Arc::new(ZeroComm::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            layer0_tx: None,
            result_rx: None,
        }
    }

    /// Handle for aborting the worker stack from another thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
        }
    }
}

impl Default for PipelinedReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerReduce for PipelinedReducer {
    fn push_leaf(&mut self, digest: Digest) -> Result<()> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(Error::Shutdown);
        }
        if self.layer0_tx.is_none() {
            let (result_tx, result_rx) = sync_channel(1);
            self.result_rx = Some(result_rx);
            self.layer0_tx = Some(LayerWorker::spawn(
                0,
                result_tx,
                Arc::clone(&self.zero),
                Arc::clone(&self.shutdown),
            ));
        }
        let tx = self
            .layer0_tx
            .as_ref()
            .ok_or_else(|| Error::invariant("layer 0 sender missing"))?;
        tx.send(digest).map_err(|_| {
            if self.shutdown.load(Ordering::Relaxed) {
                Error::Shutdown
            } else {
                Error::invariant("layer 0 worker exited mid-stream")
            }
        })
    }

    fn finalize_root(&mut self) -> Result<Digest> {
        let Some(tx) = self.layer0_tx.take() else {
            return Err(Error::InputTooShort);
        };
        // The close signal: every layer flushes and the chain collapses.
        drop(tx);

        let rx = self
            .result_rx
            .take()
            .ok_or_else(|| Error::invariant("result channel missing"))?;
        match rx.recv() {
            Ok(Some(root)) => Ok(root),
            Ok(None) => Err(Error::invariant(
                "layer stack collapsed without producing a root",
            )),
            Err(_) => {
                if self.shutdown.load(Ordering::Relaxed) {
                    Err(Error::Shutdown)
                } else {
                    Err(Error::invariant("layer workers died before the root"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::leaf_hash;
    use crate::reducer::SyncReducer;

    fn roots_match(n_leaves: usize) {
        let mut sync = SyncReducer::new();
        let mut piped = PipelinedReducer::new();
        for i in 0..n_leaves {
            let d = leaf_hash(&[(i % 251) as u8; 64]);
            sync.push_leaf(d).unwrap();
            piped.push_leaf(d).unwrap();
        }
        assert_eq!(
            sync.finalize_root().unwrap(),
            piped.finalize_root().unwrap(),
            "divergence at {n_leaves} leaves"
        );
    }

    #[test]
    fn pipelined_matches_sync_across_shapes() {
        // Powers of two, odd counts (layer 0 closes holding an unpaired
        // digest and flushes it against Z[1]), and the promotion-heavy
        // in-betweens.
        for n in [2usize, 3, 4, 6, 7, 8, 10, 14, 16, 30, 32, 33, 34, 62, 128, 130] {
            roots_match(n);
        }
    }

    #[test]
    fn reducer_is_reusable_after_finalize() {
        let mut r = PipelinedReducer::new();
        r.push_leaf(leaf_hash(&[7u8; 64])).unwrap();
        r.push_leaf(leaf_hash(&[9u8; 64])).unwrap();
        let first = r.finalize_root().unwrap();

        assert!(matches!(r.finalize_root(), Err(Error::InputTooShort)));

        r.push_leaf(leaf_hash(&[7u8; 64])).unwrap();
        r.push_leaf(leaf_hash(&[9u8; 64])).unwrap();
        assert_eq!(r.finalize_root().unwrap(), first);
    }

    #[test]
    fn shutdown_makes_the_reducer_unusable() {
        let mut r = PipelinedReducer::new();
        let handle = r.shutdown_handle();
        assert!(!handle.is_triggered());

        r.push_leaf(leaf_hash(&[1u8; 64])).unwrap();
        handle.trigger();
        assert!(handle.is_triggered());
        // Clones observe the same flag.
        assert!(r.shutdown_handle().is_triggered());

        // Either the push or the finalize observes the abort; neither may
        // return a root.
        let pushed = r.push_leaf(leaf_hash(&[2u8; 64]));
        let finalized = r.finalize_root();
        assert!(pushed.is_err() || finalized.is_err());
        assert!(finalized.is_err());
    }
}
