//! Lazy, restartable sequences over keyset-paginated queries.
//!
//! A cursor fetches one page at a time through the reader pool and holds
//! no connection between pages, so long ranges stream in bounded memory.

use crate::deadline::Deadline;
use crate::error::{Result, StorageError};
use crate::query::rows::{point_from_row, snapshot_from_row, POINT_COLUMNS, SNAPSHOT_COLUMNS};
use crate::sqlite::query::Order;
use crate::sqlite::{bind_params, QueryBuilder, SqlParam};
use crate::types::{DeviceId, MetricPoint, MetricType, StatusSnapshot, Timestamp};
use futures_util::stream::{self, Stream};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::collections::VecDeque;
use tracing::debug;

/// Keyset position: the `(timestamp, id)` of the last row handed out
pub type Position = (Timestamp, i64);

/// A query a [`Cursor`] can page through
pub trait CursorSource: Send + Sync {
    type Item: Send;

    /// SQL for the page following `after`
    fn page_query(&self, after: Option<&Position>, limit: usize) -> (String, Vec<SqlParam>);

    fn decode(row: &SqliteRow) -> Result<Self::Item>;

    fn position(item: &Self::Item) -> Position;
}

/// Points of one device in `[from, to]`, oldest first
#[derive(Debug, Clone)]
pub struct PointRange {
    pub device_id: DeviceId,
    pub metric_type: Option<MetricType>,
    pub from: Timestamp,
    pub to: Timestamp,
}

impl CursorSource for PointRange {
    type Item = MetricPoint;

    fn page_query(&self, after: Option<&Position>, limit: usize) -> (String, Vec<SqlParam>) {
        let mut builder = QueryBuilder::new("metric_points").eq_int("device_id", self.device_id.0);
        if let Some(metric_type) = &self.metric_type {
            builder = builder.eq_text("metric_type", metric_type.as_str());
        }
        builder
            .time_range(self.from, self.to)
            .after_keyset(after, Order::Ascending)
            .order_by_time(Order::Ascending)
            .limit(limit)
            .build_select(POINT_COLUMNS)
    }

    fn decode(row: &SqliteRow) -> Result<MetricPoint> {
        point_from_row(row)
    }

    fn position(item: &MetricPoint) -> Position {
        (item.timestamp, item.id.0)
    }
}

/// Snapshots of one device in `[from, to]`, newest first
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    pub device_id: DeviceId,
    pub from: Timestamp,
    pub to: Timestamp,
}

impl CursorSource for SnapshotHistory {
    type Item = StatusSnapshot;

    fn page_query(&self, after: Option<&Position>, limit: usize) -> (String, Vec<SqlParam>) {
        QueryBuilder::new("status_snapshots")
            .eq_int("device_id", self.device_id.0)
            .time_range(self.from, self.to)
            .after_keyset(after, Order::Descending)
            .order_by_time(Order::Descending)
            .limit(limit)
            .build_select(SNAPSHOT_COLUMNS)
    }

    fn decode(row: &SqliteRow) -> Result<StatusSnapshot> {
        snapshot_from_row(row)
    }

    fn position(item: &StatusSnapshot) -> Position {
        (item.timestamp, item.id.0)
    }
}

/// Lazily paged result sequence
pub struct Cursor<S: CursorSource> {
    pool: SqlitePool,
    source: S,
    page_size: usize,
    deadline: Deadline,
    after: Option<Position>,
    page: VecDeque<S::Item>,
    exhausted: bool,
}

pub type PointCursor = Cursor<PointRange>;
pub type SnapshotCursor = Cursor<SnapshotHistory>;

impl<S: CursorSource> Cursor<S> {
    pub(crate) fn new(pool: SqlitePool, source: S, page_size: usize, deadline: Deadline) -> Self {
        Self {
            pool,
            source,
            page_size: page_size.max(1),
            deadline,
            after: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next row, fetching a new page when the current one is used up
    pub async fn next(&mut self) -> Result<Option<S::Item>> {
        if self.page.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.page.pop_front())
    }

    /// Start over from the first row; rows committed since are included
    pub fn restart(&mut self) {
        self.after = None;
        self.page.clear();
        self.exhausted = false;
    }

    /// Replace the deadline applied to subsequent page fetches
    pub fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Drain the remaining rows into memory
    pub async fn collect_all(mut self) -> Result<Vec<S::Item>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Adapt into a `Stream` of rows
    pub fn into_stream(self) -> impl Stream<Item = Result<S::Item>> + Send
    where
        S: 'static,
        S::Item: 'static,
    {
        stream::try_unfold(self, |mut cursor| async move {
            let next = cursor.next().await?;
            Ok::<_, StorageError>(next.map(|item| (item, cursor)))
        })
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let (sql, params) = self.source.page_query(self.after.as_ref(), self.page_size);
        let deadline = self.deadline;
        let pool = &self.pool;

        let rows = deadline
            .run("cursor page", async {
                Ok(bind_params(sqlx::query(&sql), &params).fetch_all(pool).await?)
            })
            .await?;

        if rows.len() < self.page_size {
            self.exhausted = true;
        }

        for row in &rows {
            let item = S::decode(row)?;
            self.after = Some(S::position(&item));
            self.page.push_back(item);
        }

        debug!("Fetched page of {} rows", rows.len());
        Ok(())
    }
}
