// =====================================================
// QUEUE CONSUMER LOOP
// =====================================================
//
// Pulls pending project requests off the cloud queue and runs the insert
// workflow for each, one item at a time. A failing item is recorded on its
// queue row and the loop moves on; nothing short of shutdown stops the
// consumer.

use crate::error::SyncResult;
use crate::payload::parse_project_payload;
use crate::project::{InsertOutcome, ProjectInserter, ProjectInsertResult};
use crate::supabase::{self, QueueItem};
use sqlx::{Pool, Postgres};
use tokio::time::{sleep, Duration};

pub struct QueueConsumer<'a> {
    pub supabase: &'a Pool<Postgres>,
    pub inserter: ProjectInserter<'a>,
    pub queue_table: &'a str,
    pub page_size: i64,
    pub poll_interval: Duration,
}

impl QueueConsumer<'_> {
    /// Polls until stopped. With `once` a single page is drained and the
    /// call returns, which is what cron-style invocations use.
    pub async fn run(&self, once: bool) -> SyncResult<()> {
        loop {
            let processed = match self.drain_page().await {
                Ok(count) => count,
                Err(err) => {
                    if once {
                        return Err(err);
                    }
                    tracing::error!(error = %err, "queue poll failed");
                    0
                }
            };

            if once {
                return Ok(());
            }
            if processed == 0 {
                sleep(self.poll_interval).await;
            }
        }
    }

    /// Fetches one page of pending items and processes them to completion
    /// in creation order.
    pub async fn drain_page(&self) -> SyncResult<usize> {
        let items =
            supabase::fetch_pending(self.supabase, self.queue_table, self.page_size).await?;

        for item in &items {
            self.process_item(item).await;
        }

        Ok(items.len())
    }

    async fn process_item(&self, item: &QueueItem) {
        let claimed = match supabase::mark_processing(self.supabase, self.queue_table, item.id).await
        {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::error!(item = item.id, error = %err, "failed to claim queue item");
                return;
            }
        };
        if !claimed {
            tracing::debug!(item = item.id, "queue item taken by another consumer");
            return;
        }

        match self.handle(item).await {
            Ok(result) => {
                log_outcome(item, &result);
                if let Err(err) =
                    supabase::mark_done(self.supabase, self.queue_table, item.id).await
                {
                    tracing::error!(item = item.id, error = %err, "failed to mark item done");
                }
            }
            Err(err) => {
                tracing::warn!(item = item.id, error = %err, "queue item failed");
                if let Err(mark_err) =
                    supabase::mark_error(self.supabase, self.queue_table, item.id, &err.to_string())
                        .await
                {
                    tracing::error!(item = item.id, error = %mark_err, "failed to record item error");
                }
            }
        }
    }

    async fn handle(&self, item: &QueueItem) -> SyncResult<ProjectInsertResult> {
        let payload = parse_project_payload(&item.payload)?;
        self.inserter.insert(&payload).await
    }
}

fn log_outcome(item: &QueueItem, result: &ProjectInsertResult) {
    match result.status {
        InsertOutcome::Inserted => {
            tracing::info!(item = item.id, projnr = %result.projnr, "project inserted")
        }
        InsertOutcome::Exists => {
            tracing::info!(item = item.id, projnr = %result.projnr, "project already present")
        }
    }
}
