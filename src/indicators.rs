//! Classic indicator math over candle slices.
//!
//! Functions return `None` (or an empty series) when there is not enough data
//! for a single value.

use crate::series::Candle;

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    mean(&values[values.len() - period..])
}

/// EMA series seeded with the SMA of the first `period` values.
///
/// The result has `values.len() - period + 1` entries; entry `k` corresponds to
/// `values[period - 1 + k]`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

/// Latest EMA value
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Wilder RSI of the latest close.
///
/// Returns 100 when there were no losses over the window.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in closes[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let p = period as f64;
    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        avg_gain = (avg_gain * (p - 1.0) + change.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-change).max(0.0)) / p;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line and signal line of the latest close
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<(f64, f64)> {
    if fast >= slow {
        return None;
    }
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // Align fast to slow: both end at the latest close.
    let offset = fast_ema.len() - slow_ema.len();
    let line: Vec<f64> = slow_ema
        .iter()
        .zip(&fast_ema[offset..])
        .map(|(s, f)| f - s)
        .collect();

    let signal_line = ema(&line, signal)?;
    line.last().map(|m| (*m, signal_line))
}

/// Stochastic %K of the latest candle. `None` for a flat window.
pub fn stochastic_k(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range = highest - lowest;
    if range <= 0.0 {
        return None;
    }
    let close = window[window.len() - 1].close;
    Some((close - lowest) / range * 100.0)
}

/// True range against the previous close
#[inline]
pub fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Wilder ADX of the latest candle. Needs `2 * period` candles.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < 2 * period {
        return None;
    }

    let mut tr = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        tr.push(true_range(cur, prev.close));
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let p = period as f64;
    let mut tr_s: f64 = tr[..period].iter().sum();
    let mut plus_s: f64 = plus_dm[..period].iter().sum();
    let mut minus_s: f64 = minus_dm[..period].iter().sum();

    let dx = |tr_s: f64, plus_s: f64, minus_s: f64| {
        if tr_s <= 0.0 {
            return 0.0;
        }
        let plus_di = 100.0 * plus_s / tr_s;
        let minus_di = 100.0 * minus_s / tr_s;
        let sum = plus_di + minus_di;
        if sum <= 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        }
    };

    let mut dxs = vec![dx(tr_s, plus_s, minus_s)];
    for i in period..tr.len() {
        tr_s = tr_s - tr_s / p + tr[i];
        plus_s = plus_s - plus_s / p + plus_dm[i];
        minus_s = minus_s - minus_s / p + minus_dm[i];
        dxs.push(dx(tr_s, plus_s, minus_s));
    }

    if dxs.len() < period {
        return None;
    }
    let mut adx = dxs[..period].iter().sum::<f64>() / p;
    for &d in &dxs[period..] {
        adx = (adx * (p - 1.0) + d) / p;
    }
    Some(adx)
}

/// Fractional change against the value `lag` positions earlier.
///
/// Output is aligned with `values[lag..]`; a zero base yields 0.0.
pub fn pct_change(values: &[f64], lag: usize) -> Vec<f64> {
    if lag == 0 || values.len() <= lag {
        return Vec::new();
    }
    values
        .iter()
        .zip(&values[lag..])
        .map(|(base, v)| if *base == 0.0 { 0.0 } else { (v - base) / base })
        .collect()
}

#[inline]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Composite trend strength in `0.0..=1.0`.
///
/// 40% ADX(14) scaled by 50, 40% twenty-candle momentum (scaled by 10) and 20%
/// recent-to-overall volume ratio. Returns 0.0 below twenty candles.
pub fn trend_strength(candles: &[Candle]) -> f64 {
    let n = candles.len();
    if n < 20 {
        return 0.0;
    }

    let adx_value = adx(candles, 14).unwrap_or(25.0);
    let adx_part = (adx_value / 50.0).min(1.0);

    let base = candles[n - 20].close;
    let momentum = if base == 0.0 {
        0.0
    } else {
        ((candles[n - 1].close / base - 1.0).abs() * 10.0).min(1.0)
    };

    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let volume_part = match (mean(&volumes[n - 5..]), mean(&volumes)) {
        (Some(recent), Some(all)) if all > 0.0 => (recent / all).min(2.0) / 2.0,
        _ => 0.5,
    };

    (adx_part * 0.4 + momentum * 0.4 + volume_part * 0.2).min(1.0)
}
