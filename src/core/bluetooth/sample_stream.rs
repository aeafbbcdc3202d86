//! Latest-sample slot with fan-out to subscribers

use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::watch;

use crate::core::bluetooth::types::HeartRateSample;

/// Holds the most recent sample and wakes every subscriber when it changes.
///
/// Publishing never waits on subscribers: a slow subscriber only misses values
/// that were overwritten before it looked.
#[derive(Clone)]
pub struct SampleStream {
    slot: Arc<watch::Sender<Option<HeartRateSample>>>,
}

impl SampleStream {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Overwrites the slot and notifies subscribers
    pub fn publish(&self, sample: HeartRateSample) {
        self.slot.send_replace(Some(sample));
    }

    pub fn last_sample(&self) -> Option<HeartRateSample> {
        self.slot.borrow().clone()
    }

    /// Subscribes starting from the current sample, if any
    pub fn subscribe(&self) -> SampleSubscription {
        SampleSubscription {
            rx: self.slot.subscribe(),
            replayed: false,
        }
    }
}

impl Default for SampleStream {
    fn default() -> Self {
        Self::new()
    }
}

/// A single subscriber's view of a [`SampleStream`]
pub struct SampleSubscription {
    rx: watch::Receiver<Option<HeartRateSample>>,
    replayed: bool,
}

impl SampleSubscription {
    /// Waits for the next sample. The first call returns the current sample
    /// immediately when one exists. Returns `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<HeartRateSample> {
        if !self.replayed {
            self.replayed = true;
            if let Some(sample) = self.rx.borrow_and_update().clone() {
                return Some(sample);
            }
        }
        loop {
            self.rx.changed().await.ok()?;
            if let Some(sample) = self.rx.borrow_and_update().clone() {
                return Some(sample);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = HeartRateSample> + Send + 'static {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|sample| (sample, subscription))
        })
    }
}
