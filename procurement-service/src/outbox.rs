use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::events::Channel;
use shared::*;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::*;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;

const BATCH_SIZE: i64 = 100;

/// Writes `event` to the outbox on the caller's connection, so it commits or
/// rolls back with the state change that raised it.
pub async fn enqueue(conn: &mut AsyncPgConnection, event: &NotificationEvent) -> ApiResult<()> {
    let row = NewOutboxEvent::from(OutboxEvent::new(event)?);
    diesel::insert_into(outbox_events::table)
        .values(&row)
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Topics {
    pub notifications: String,
    pub email: String,
}

impl Topics {
    fn for_channel(&self, channel: Channel) -> &str {
        match channel {
            Channel::OrderNotifications => &self.notifications,
            Channel::EmailDispatch => &self.email,
        }
    }
}

pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
    topics: Topics,
    interval: Duration,
}

impl OutboxProcessor {
    pub fn new(pool: DbPool, producer: FutureProducer, topics: Topics, interval: Duration) -> Self {
        Self {
            pool,
            producer,
            topics,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    async fn process_outbox_events(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let unprocessed_events = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(BATCH_SIZE)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;

        for event in unprocessed_events {
            let email_history = email_history_id(&event);

            if let Err(e) = self.publish_event(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                if let Some(history_id) = email_history {
                    mark_email_failed(&mut conn, history_id, &e.to_string()).await?;
                }
                continue;
            }

            diesel::update(outbox_events::table.filter(outbox_events::id.eq(event.id)))
                .set(outbox_events::processed.eq(true))
                .execute(&mut conn)
                .await?;

            if let Some(history_id) = email_history {
                mark_email_sent(&mut conn, history_id).await?;
            }

            info!("Published outbox event {} ({})", event.id, event.event_type);
        }

        Ok(())
    }

    async fn publish_event(&self, event: &DbOutboxEvent) -> Result<()> {
        let topic = self
            .topics
            .for_channel(Channel::for_event_type(&event.event_type));

        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

fn email_history_id(event: &DbOutboxEvent) -> Option<Uuid> {
    if Channel::for_event_type(&event.event_type) != Channel::EmailDispatch {
        return None;
    }
    match serde_json::from_value::<NotificationEvent>(event.event_data.clone()) {
        Ok(NotificationEvent::EmailRequested { history_id, .. }) => Some(history_id),
        Ok(_) => None,
        Err(e) => {
            warn!("Outbox event {} carries an unreadable email request: {}", event.id, e);
            None
        }
    }
}

async fn mark_email_sent(conn: &mut AsyncPgConnection, history_id: Uuid) -> Result<()> {
    let now = Utc::now();
    let delivered = diesel::update(
        email_sending_details::table.filter(email_sending_details::history_id.eq(history_id)),
    )
    .set((
        email_sending_details::sending_status.eq("sent"),
        email_sending_details::error_message.eq(None::<String>),
        email_sending_details::sent_at.eq(Some(now)),
    ))
    .execute(conn)
    .await?;

    diesel::update(email_sending_history::table.find(history_id))
        .set((
            email_sending_history::sending_status.eq("sent"),
            email_sending_history::sent_count.eq(delivered as i32),
            email_sending_history::failed_count.eq(0),
            email_sending_history::error_message.eq(None::<String>),
            email_sending_history::sent_at.eq(Some(now)),
            email_sending_history::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// The event stays unprocessed, so the next tick retries it and may still
/// flip the history to sent.
async fn mark_email_failed(conn: &mut AsyncPgConnection, history_id: Uuid, reason: &str) -> Result<()> {
    let failed = diesel::update(
        email_sending_details::table.filter(email_sending_details::history_id.eq(history_id)),
    )
    .set((
        email_sending_details::sending_status.eq("failed"),
        email_sending_details::error_message.eq(Some(reason)),
    ))
    .execute(conn)
    .await?;

    diesel::update(email_sending_history::table.find(history_id))
        .set((
            email_sending_history::sending_status.eq("failed"),
            email_sending_history::sent_count.eq(0),
            email_sending_history::failed_count.eq(failed as i32),
            email_sending_history::error_message.eq(Some(reason)),
            email_sending_history::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}
