//! Market metrics derived from dispatched batches.
//!
//! `volatility` is the population standard deviation of log returns over the
//! last `window` prices; `liquidity` is the latest reported liquidity. Both
//! feed the alert engine. Compressed entries are read through their parsed
//! fields.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::alerts::AlertEngine;
use crate::ingest::batch::Batch;
use crate::ingest::dispatch::{BatchObserver, ObserverError};

pub const VOLATILITY: &str = "volatility";
pub const LIQUIDITY: &str = "liquidity";

const PRICE_FIELD: &str = "price";
const LIQUIDITY_FIELD: &str = "liquidity";

pub struct MarketMetricsObserver {
    alerts: Arc<AlertEngine>,
    window: usize,
    prices: Mutex<VecDeque<f64>>,
}

impl MarketMetricsObserver {
    pub fn new(alerts: Arc<AlertEngine>, window: usize) -> Self {
        let window = window.max(2);
        Self {
            alerts,
            window,
            prices: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    /// Current volatility estimate, if at least two returns are known.
    pub fn volatility(&self) -> Option<f64> {
        volatility(&self.prices.lock())
    }
}

/// Population standard deviation of consecutive log returns.
pub fn volatility(prices: &VecDeque<f64>) -> Option<f64> {
    let returns: Vec<f64> = prices
        .iter()
        .zip(prices.iter().skip(1))
        .map(|(prev, next)| (next / prev).ln())
        .collect();
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

#[async_trait]
impl BatchObserver for MarketMetricsObserver {
    fn name(&self) -> &str {
        "market_metrics"
    }

    async fn deliver(&self, batch: Arc<Batch>) -> Result<(), ObserverError> {
        let at = batch.created_at;
        let mut saw_price = false;
        let mut latest_liquidity = None;
        {
            let mut prices = self.prices.lock();
            for entry in &batch.entries {
                if let Some(price) = entry.field_f64(PRICE_FIELD).filter(|p| *p > 0.0) {
                    if prices.len() == self.window {
                        prices.pop_front();
                    }
                    prices.push_back(price);
                    saw_price = true;
                }
                if let Some(liquidity) = entry.field_f64(LIQUIDITY_FIELD) {
                    latest_liquidity = Some(liquidity);
                }
            }
        }

        if let Some(liquidity) = latest_liquidity {
            self.alerts.observe(LIQUIDITY, liquidity, at);
        }
        if saw_price {
            if let Some(vol) = self.volatility() {
                self.alerts.observe(VOLATILITY, vol, at);
            }
        }
        Ok(())
    }
}
