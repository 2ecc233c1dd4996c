//! Test data builders

use crate::config::Config;
use crate::core::{Direction, Symbol};
use crate::gateway::{Bar, BrokerPosition};
use rust_decimal::Decimal;

/// Flat history: `n` bars closing at `price` with a 1.0 range
pub fn quiet_bars(n: usize, price: f64) -> Vec<Bar> {
    (0..n)
        .map(|_| Bar {
            open: price,
            high: price + 0.5,
            low: price - 0.5,
            close: price,
            volume: 1_000.0,
        })
        .collect()
}

/// Flat history ending in a wide, high-volume bar in `direction`
///
/// With default breakout parameters the last close is a confirmed breakout
/// scoring 2.0, between the default minimum and top scores.
pub fn breakout_bars(price: f64, direction: Direction) -> Vec<Bar> {
    let mut bars = quiet_bars(40, price);
    let close = match direction {
        Direction::Up => price + 2.2,
        Direction::Down => price - 2.2,
    };
    bars.push(Bar {
        open: price,
        high: close.max(price) + 1.0,
        low: close.min(price) - 1.0,
        close,
        volume: 5_000.0,
    });
    bars
}

/// Same shape as `breakout_bars`, scoring about 5.5 (above the default top score)
pub fn strong_breakout_bars(price: f64, direction: Direction) -> Vec<Bar> {
    let mut bars = quiet_bars(40, price);
    let close = match direction {
        Direction::Up => price + 6.0,
        Direction::Down => price - 6.0,
    };
    bars.push(Bar {
        open: price,
        high: close.max(price) + 1.0,
        low: close.min(price) - 1.0,
        close,
        volume: 5_000.0,
    });
    bars
}

pub fn position(symbol: &str, quantity: i64, avg_cost: Decimal) -> BrokerPosition {
    BrokerPosition {
        symbol: Symbol::new(symbol),
        quantity,
        avg_cost,
    }
}

/// Default config with short intervals and timeouts for async tests
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.scanners.position_interval_ms = 20;
    config.scanners.market_interval_ms = 50;
    config.gateway.call_timeout_ms = 200;
    config.monitoring.heartbeat_secs = 1;
    config.monitoring.enable_server = false;
    config
}
