use trading_core::{BookLevel, OrderBook};

/// Order-flow imbalance over the best `levels` of each side, in [-1, 1].
///
/// Positive means resting bid volume outweighs ask volume.
pub fn order_flow_imbalance(book: &OrderBook, levels: usize) -> f64 {
    let bid_volume: f64 = book.bids.iter().take(levels).map(|l| l.size.max(0.0)).sum();
    let ask_volume: f64 = book.asks.iter().take(levels).map(|l| l.size.max(0.0)).sum();
    let total = bid_volume + ask_volume;
    if total <= 0.0 {
        return 0.0;
    }
    ((bid_volume - ask_volume) / total).clamp(-1.0, 1.0)
}

/// Imbalance of outsized resting orders ("walls").
///
/// A level counts as a wall when its notional is at least `multiplier` times
/// the median level notional across both sides. Returns `None` when the book
/// holds no walls.
pub fn whale_imbalance(book: &OrderBook, levels: usize, multiplier: f64) -> Option<f64> {
    let notional = |l: &BookLevel| l.price * l.size;

    let mut all: Vec<f64> = book
        .bids
        .iter()
        .take(levels)
        .chain(book.asks.iter().take(levels))
        .map(notional)
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if all.len() < 4 {
        return None;
    }
    all.sort_by(|a, b| a.total_cmp(b));
    let median = all[all.len() / 2];
    let threshold = median * multiplier;

    let wall_sum = |side: &[BookLevel]| -> f64 {
        side.iter()
            .take(levels)
            .map(notional)
            .filter(|v| *v >= threshold)
            .sum()
    };
    let bid_walls = wall_sum(&book.bids);
    let ask_walls = wall_sum(&book.asks);
    let total = bid_walls + ask_walls;
    if total <= 0.0 {
        return None;
    }
    Some((bid_walls - ask_walls) / total)
}
