use anyhow::Result;
use chrono::Utc;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::approval;

type DbPool = Pool<AsyncPgConnection>;

/// Approves workflow steps whose `auto_approve_at` has passed.
pub struct AutoApprovalSweeper {
    pool: DbPool,
    interval: Duration,
}

impl AutoApprovalSweeper {
    pub fn new(pool: DbPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.sweep().await {
                error!("Error sweeping auto-approvals: {}", e);
            }
        }
    }

    async fn sweep(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();

        let due = approval::orders_due_for_auto_approval(&mut conn, now).await?;
        for order_id in due {
            match approval::auto_approve(&mut conn, order_id, now).await {
                Ok(0) => {}
                Ok(count) => info!("Auto-approved {} step(s) of order {}", count, order_id),
                Err(e) => error!("Failed to auto-approve order {}: {}", order_id, e),
            }
        }

        Ok(())
    }
}
