//! Drives a provider adapter across a whole `[since, now)` range.
//!
//! Only `(since, until, offset)` is threaded between requests, so a run can
//! be abandoned after any page and restarted from the stored watermark.

use crate::error::SyncError;
use crate::provider::{Adapter, FetchContext, ProviderTransport};
use crate::repository::TransferEvent;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Page by row offset until a short page comes back.
    Offset { limit: usize },
    /// One query per fixed-length window, each capped at `limit` rows.
    TimeWindow { window: TimeDelta, limit: usize },
}

impl Pagination {
    pub fn limit(&self) -> usize {
        match self {
            Pagination::Offset { limit } | Pagination::TimeWindow { limit, .. } => *limit,
        }
    }
}

/// Receives each page in chronological order before the next is requested.
#[async_trait]
pub trait PageSink: Send {
    async fn on_page(&mut self, events: Vec<TransferEvent>) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveSummary {
    pub total_fetched: usize,
    pub requests: usize,
}

/// Split `[since, now)` into consecutive half-open windows of `window`,
/// the last one clipped to `now`.
pub fn time_windows(
    since: DateTime<Utc>,
    now: DateTime<Utc>,
    window: TimeDelta,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    if window <= TimeDelta::zero() {
        return windows;
    }

    let mut start = since;
    while start < now {
        let end = start
            .checked_add_signed(window)
            .map_or(now, |end| end.min(now));
        windows.push((start, end));
        start = end;
    }
    windows
}

pub async fn drive<T, S>(
    adapter: Adapter,
    pagination: Pagination,
    transport: &T,
    ctx: FetchContext<'_>,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
    sink: &mut S,
) -> Result<DriveSummary, SyncError>
where
    T: ProviderTransport + ?Sized,
    S: PageSink + ?Sized,
{
    let mut summary = DriveSummary::default();
    if since >= now {
        debug!(%since, %now, "nothing to fetch, watermark is current");
        return Ok(summary);
    }

    match pagination {
        Pagination::Offset { limit } => {
            let mut offset = 0;
            loop {
                let request = adapter.build_query(ctx.address, since, now, limit, offset);
                let raw = transport.execute(&request).await?;
                let events = adapter.transform_response(&raw, &ctx)?;
                let rows = events.len();

                summary.requests += 1;
                summary.total_fetched += rows;
                debug!(offset, rows, "fetched page");

                sink.on_page(events).await?;

                if rows < limit {
                    break;
                }
                offset += limit;
            }
        }
        Pagination::TimeWindow { window, limit } => {
            for (start, end) in time_windows(since, now, window) {
                let request = adapter.build_query(ctx.address, start, end, limit, 0);
                let raw = transport.execute(&request).await?;
                let events = adapter.transform_response(&raw, &ctx)?;
                let rows = events.len();

                summary.requests += 1;
                summary.total_fetched += rows;
                debug!(%start, %end, rows, "fetched window");

                if rows >= limit {
                    warn!(
                        %start,
                        %end,
                        limit,
                        "window hit the row cap, results may be truncated; consider a shorter window"
                    );
                }

                sink.on_page(events).await?;
            }
        }
    }

    Ok(summary)
}
