use anyhow::{bail, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trading_core::{MarketConditions, Side, SizingResult, TradeMemory};

use crate::kelly::KellyConfig;
use crate::win_rate::{WinRateEstimate, WinRateEstimator};

/// Reasons the sizer declines to produce an order
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SizingAbort {
    #[error("risk scaler {0} disables trading")]
    ScalerDisabled(f64),

    #[error("insufficient margin: need {required:.2}, usable {available:.2}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("quantity rounds to zero ({notional:.2} notional, lot step {lot_step})")]
    ZeroQuantity { notional: f64, lot_step: Decimal },

    #[error("invalid sizing input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Reward:risk ratio `b` used in the Kelly formula and for take-profit
    pub reward_risk_ratio: f64,
    /// Stop distance from entry, percent
    pub stop_loss_pct: f64,
    /// ATR% at which the volatility multiplier is 1.0
    pub reference_atr_pct: f64,
    pub min_volatility_multiplier: f64,
    pub max_volatility_multiplier: f64,
    pub min_confidence_multiplier: f64,
    pub max_confidence_multiplier: f64,
    /// Absolute notional bounds (quote currency)
    pub min_trade: f64,
    pub max_trade: f64,
    pub leverage: u32,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            reward_risk_ratio: 2.0,
            stop_loss_pct: 1.5,
            reference_atr_pct: 1.0,
            min_volatility_multiplier: 0.5,
            max_volatility_multiplier: 1.5,
            min_confidence_multiplier: 0.8,
            max_confidence_multiplier: 1.2,
            min_trade: 10.0,
            max_trade: 500.0,
            leverage: 5,
        }
    }
}

/// Per-order inputs
#[derive(Debug, Clone)]
pub struct SizingRequest {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub equity: f64,
    /// Margin free for a new entry, already net of the safety buffer
    pub usable_margin: f64,
    pub atr_pct: f64,
    pub confidence: f64,
    pub risk_scaler: f64,
    pub lot_step: Decimal,
    pub conditions: MarketConditions,
}

/// Volatility- and history-aware position sizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizer {
    pub config: SizerConfig,
    pub kelly: KellyConfig,
    pub win_rate: WinRateEstimator,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            config: SizerConfig::default(),
            kelly: KellyConfig::default(),
            win_rate: WinRateEstimator::default(),
        }
    }
}

impl PositionSizer {
    pub fn new(config: SizerConfig, kelly: KellyConfig, win_rate: WinRateEstimator) -> Result<Self> {
        if config.reward_risk_ratio <= 0.0 {
            bail!("reward_risk_ratio must be positive");
        }
        if config.stop_loss_pct <= 0.0 {
            bail!("stop_loss_pct must be positive");
        }
        if config.min_trade <= 0.0 || config.min_trade > config.max_trade {
            bail!("min_trade must be > 0 and <= max_trade");
        }
        if config.min_volatility_multiplier > config.max_volatility_multiplier
            || config.min_confidence_multiplier > config.max_confidence_multiplier
        {
            bail!("multiplier bounds are inverted");
        }
        if config.leverage == 0 {
            bail!("leverage must be at least 1");
        }
        Ok(Self {
            config,
            kelly,
            win_rate,
        })
    }

    /// reference / current ATR%, bounded. Unknown volatility is neutral.
    pub fn volatility_multiplier(&self, atr_pct: f64) -> f64 {
        if !(atr_pct.is_finite() && atr_pct > 0.0) {
            return 1.0;
        }
        (self.config.reference_atr_pct / atr_pct).clamp(
            self.config.min_volatility_multiplier,
            self.config.max_volatility_multiplier,
        )
    }

    /// Linear in confidence across the configured band.
    pub fn confidence_multiplier(&self, confidence: f64) -> f64 {
        let c = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        let lo = self.config.min_confidence_multiplier;
        let hi = self.config.max_confidence_multiplier;
        lo + (hi - lo) * c
    }

    /// Notional before margin checks and rounding, always in
    /// `[min_trade, max_trade]`.
    pub fn target_notional(
        &self,
        equity: f64,
        win_rate: f64,
        atr_pct: f64,
        confidence: f64,
        risk_scaler: f64,
    ) -> Result<f64, SizingAbort> {
        if risk_scaler.is_nan() || risk_scaler <= 0.0 {
            return Err(SizingAbort::ScalerDisabled(risk_scaler));
        }
        if !(equity.is_finite() && equity > 0.0) {
            return Err(SizingAbort::InvalidInput(format!("equity {}", equity)));
        }

        let fraction = self.kelly.fraction(win_rate, self.config.reward_risk_ratio);
        let raw = equity
            * fraction
            * self.volatility_multiplier(atr_pct)
            * self.confidence_multiplier(confidence)
            * risk_scaler;

        let bounded = if raw.is_finite() {
            raw.clamp(self.config.min_trade, self.config.max_trade)
        } else {
            self.config.max_trade
        };
        Ok(bounded)
    }

    /// Stop-loss and take-profit prices for an entry at `price`.
    pub fn protective_prices(&self, side: Side, price: f64) -> (f64, f64) {
        let stop = self.config.stop_loss_pct / 100.0;
        let target = stop * self.config.reward_risk_ratio;
        let sign = side.sign();
        (price * (1.0 - sign * stop), price * (1.0 + sign * target))
    }

    pub fn size(
        &self,
        request: &SizingRequest,
        memories: &[TradeMemory],
    ) -> Result<SizingResult, SizingAbort> {
        if !(request.price.is_finite() && request.price > 0.0) {
            return Err(SizingAbort::InvalidInput(format!(
                "{} price {}",
                request.symbol, request.price
            )));
        }
        if request.lot_step <= Decimal::ZERO {
            return Err(SizingAbort::InvalidInput(format!(
                "{} lot step {}",
                request.symbol, request.lot_step
            )));
        }
        if request.risk_scaler.is_nan() || request.risk_scaler <= 0.0 {
            return Err(SizingAbort::ScalerDisabled(request.risk_scaler));
        }

        let WinRateEstimate { blended, .. } =
            self.win_rate
                .estimate(request.confidence, &request.conditions, memories);
        let kelly_fraction = self.kelly.fraction(blended, self.config.reward_risk_ratio);

        let notional = self.target_notional(
            request.equity,
            blended,
            request.atr_pct,
            request.confidence,
            request.risk_scaler,
        )?;

        let required = notional / self.config.leverage as f64;
        if required > request.usable_margin {
            return Err(SizingAbort::InsufficientMargin {
                required,
                available: request.usable_margin,
            });
        }

        let quantity = round_to_lot(notional / request.price, request.lot_step)
            .ok_or_else(|| SizingAbort::InvalidInput(format!("quantity for {}", notional)))?;
        if quantity.is_zero() {
            return Err(SizingAbort::ZeroQuantity {
                notional,
                lot_step: request.lot_step,
            });
        }

        let (stop_loss_price, take_profit_price) =
            self.protective_prices(request.side, request.price);

        log::info!(
            "{} {} sized: notional {:.2}, qty {}, p={:.3}, kelly={:.3}",
            request.symbol,
            request.side,
            notional,
            quantity,
            blended,
            kelly_fraction
        );

        Ok(SizingResult {
            notional,
            quantity,
            stop_loss_price,
            take_profit_price,
            leverage: self.config.leverage,
            win_rate: blended,
            kelly_fraction,
        })
    }
}

/// Round `raw` down to a multiple of `lot_step`.
pub fn round_to_lot(raw: f64, lot_step: Decimal) -> Option<Decimal> {
    if !(raw.is_finite() && raw >= 0.0) || lot_step <= Decimal::ZERO {
        return None;
    }
    let raw = Decimal::from_f64(raw)?;
    let lots = (raw / lot_step).floor();
    Some((lots * lot_step).normalize())
}
