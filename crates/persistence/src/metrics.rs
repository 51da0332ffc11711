//! Query and pool metrics.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Records how long one named query took.
pub fn record_query_duration(query: &'static str, duration_secs: f64) {
    histogram!("database_query_duration_seconds", "query" => query).record(duration_secs);
}

/// Publishes pool occupancy gauges. Called on each metrics scrape.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("database_connections_active").set(size.saturating_sub(idle) as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(size as f64);
}

/// Times a repository query.
///
/// ```ignore
/// let timer = QueryTimer::new("find_invitation_by_token");
/// let row = sqlx::query_as::<_, InvitationEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// ```
///
/// Query names are static so the label set stays bounded.
pub struct QueryTimer {
    query: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query: &'static str) -> Self {
        Self {
            query,
            start: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.query, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timer_keeps_name() {
        let timer = QueryTimer::new("redeem_invitation");
        assert_eq!(timer.query, "redeem_invitation");
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        QueryTimer::new("list_invitations").record();
        record_query_duration("delete_invitation", 0.002);
    }
}
