//! Time-span checks ahead of the trend stage.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reddit::CollectedPost;

/// Literal response for data too thin to show a trend.
pub const INSUFFICIENT_DATA_MESSAGE: &str =
    "Insufficient data for trend analysis in this time range";

/// Default minimum number of timestamped posts and comments.
pub const DEFAULT_MIN_TREND_ITEMS: usize = 5;

/// Bucket size for trend grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// Pick a granularity for the span between the first and last item.
    #[must_use]
    pub fn for_span(span: Duration) -> Self {
        if span <= Duration::days(2) {
            Granularity::Hourly
        } else if span <= Duration::days(60) {
            Granularity::Daily
        } else if span <= Duration::days(365) {
            Granularity::Weekly
        } else {
            Granularity::Monthly
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        };
        write!(f, "{s}")
    }
}

/// Outcome of the pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendWindow {
    /// Enough data; run the stage at this granularity.
    Sufficient {
        items: usize,
        span: Duration,
        granularity: Granularity,
    },
    /// Too little data or too short a span.
    Insufficient { items: usize, span: Duration },
}

/// Measure the span and volume of timestamped items in `posts`.
///
/// Spans under one hour and fewer than `min_items` posts plus comments are
/// insufficient.
#[must_use]
pub fn assess(posts: &[CollectedPost], min_items: usize) -> TrendWindow {
    let mut items = 0usize;
    let mut bounds = None;

    for ts in posts.iter().flat_map(|p| p.timestamps()) {
        items += 1;
        bounds = Some(match bounds {
            None => (ts, ts),
            Some((lo, hi)) => (ts.min(lo), ts.max(hi)),
        });
    }

    let span = bounds.map_or_else(Duration::zero, |(lo, hi)| hi - lo);

    if bounds.is_none() || span < Duration::hours(1) || items < min_items {
        return TrendWindow::Insufficient { items, span };
    }

    TrendWindow::Sufficient {
        items,
        span,
        granularity: Granularity::for_span(span),
    }
}
