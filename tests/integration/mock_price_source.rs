//! Scripted push service for integration testing.
//!
//! Returns whatever price the test last set, encoded the way the local
//! oracle expects. No network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wagerchat::oracle::{PriceUpdate, PriceUpdateBundle, PriceUpdateSource};
use wagerchat::types::{FeedId, Price};

#[derive(Clone, Default)]
pub struct ScriptedSource {
    price: Arc<Mutex<Option<Price>>>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedSource {
    /// Source serving `mantissa` (8 decimals) published at `publish_time`.
    pub fn at(mantissa: i64, publish_time: u64) -> Self {
        let source = Self::default();
        source.set(mantissa, publish_time);
        source
    }

    pub fn set(&self, mantissa: i64, publish_time: u64) {
        *self.price.lock().unwrap() = Some(Price {
            price: mantissa,
            conf: 0,
            expo: -8,
            publish_time,
        });
    }

    /// Make every subsequent fetch fail.
    pub fn go_offline(&self) {
        *self.price.lock().unwrap() = None;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceUpdateSource for ScriptedSource {
    async fn latest_update(&self, feed: &FeedId) -> Result<PriceUpdateBundle> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let price = (*self.price.lock().unwrap()).ok_or_else(|| anyhow!("push service unavailable"))?;
        let update = PriceUpdate { feed_id: *feed, price };
        Ok(PriceUpdateBundle {
            binary: vec![update.encode()],
            parsed: vec![(*feed, price)],
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
