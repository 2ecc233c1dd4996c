//! Technical indicators and breakout evaluation
//!
//! Pure functions over `f64` price series. Anything that lacks enough data
//! returns `None` rather than NaN.

use crate::config::BreakoutConfig;
use crate::core::Direction;
use crate::gateway::Bar;

/// Exponential moving average seeded with the first value
///
/// `None` when `period` is zero or fewer than `period` values are given.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut e = values[0];
    for v in &values[1..] {
        e = v * k + e * (1.0 - k);
    }
    Some(e)
}

/// Mean of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

#[inline]
pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// Average true range with Wilder smoothing
///
/// The first ATR is the mean of the first `period` true ranges; each later
/// range is folded in as `(atr * (period - 1) + tr) / period`. Needs at least
/// `period + 1` bars.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| true_range(w[1].high, w[1].low, w[0].close))
        .collect();

    let mut value = ranges[..period].iter().sum::<f64>() / period as f64;
    for tr in &ranges[period..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(value)
}

/// Label describing the parameters a signal was found with
pub fn params_label(params: &BreakoutConfig) -> String {
    format!(
        "ATR:{} VOL:{}x EMA:{}/{}",
        params.k_atr, params.v_mult, params.ema_fast, params.ema_slow
    )
}

/// Confirmed breakout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakout {
    pub direction: Direction,
    /// Distance from the slow EMA in ATR units
    pub score: f64,
    pub atr: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub prior_high: f64,
    pub prior_low: f64,
}

/// Evaluate the latest bar of `bars` at `price` for a breakout
///
/// The last bar is the one in progress; the prior high/low and the ATR come
/// from the `lookback` completed bars before it. A breakout needs all of:
/// - price beyond `prior_high + k_atr * atr` (Up) or `prior_low - k_atr * atr` (Down)
/// - latest bar volume above `v_mult` times the average of the completed bars
/// - fast EMA above the slow one for Up, below for Down
pub fn evaluate_breakout(bars: &[Bar], price: f64, params: &BreakoutConfig) -> Option<Breakout> {
    if bars.len() < 2 || !price.is_finite() {
        return None;
    }

    let (current, completed) = bars.split_last()?;
    if completed.len() < params.lookback.max(1) {
        return None;
    }

    let atr = atr(completed, params.atr_period)?;
    if atr <= 0.0 {
        return None;
    }

    let window = &completed[completed.len() - params.lookback.max(1)..];
    let prior_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let prior_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    let direction = if price > prior_high + params.k_atr * atr {
        Direction::Up
    } else if price < prior_low - params.k_atr * atr {
        Direction::Down
    } else {
        return None;
    };

    let volumes: Vec<f64> = completed.iter().map(|b| b.volume).collect();
    let avg_volume = sma(&volumes, params.volume_period)?;
    if current.volume <= avg_volume * params.v_mult {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema_fast = ema(&closes, params.ema_fast)?;
    let ema_slow = ema(&closes, params.ema_slow)?;
    let aligned = match direction {
        Direction::Up => ema_fast > ema_slow,
        Direction::Down => ema_fast < ema_slow,
    };
    if !aligned {
        return None;
    }

    Some(Breakout {
        direction,
        score: (price - ema_slow).abs() / atr,
        atr,
        ema_fast,
        ema_slow,
        prior_high,
        prior_low,
    })
}

/// Position price outside the slow-EMA band in the direction of the trend
pub fn band_breakout(price: f64, ema_fast: f64, ema_slow: f64, atr: f64, k_atr: f64) -> Option<Direction> {
    if atr <= 0.0 {
        return None;
    }
    if price > ema_slow + k_atr * atr && ema_fast > ema_slow {
        Some(Direction::Up)
    } else if price < ema_slow - k_atr * atr && ema_fast < ema_slow {
        Some(Direction::Down)
    } else {
        None
    }
}
