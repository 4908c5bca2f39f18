//! Short-lived OTP tickets keyed by (user, purpose).
//!
//! Putting a ticket replaces any earlier one for the same key, so only the
//! latest code is ever eligible. Consumption is a single atomic step: a
//! matching hash deletes the ticket and hands it back, a wrong one bumps the
//! attempt counter and drops the ticket once the limit is reached.
//!
//! The same store also remembers redeemed one-shot tokens by id until they
//! would have expired anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, Client, Script};
use uuid::Uuid;

use crate::models::{OtpPurpose, OtpTicket};
use crate::services::ServiceError;
use crate::utils::crypto::constant_time_eq;

pub const MAX_OTP_ATTEMPTS: u32 = 5;

#[derive(Debug)]
pub enum TicketCheck {
    Verified(OtpTicket),
    Mismatch,
    Missing,
}

#[async_trait]
pub trait OtpTicketStore: Send + Sync {
    async fn put_ticket(&self, ticket: &OtpTicket) -> Result<(), ServiceError>;
    async fn consume_ticket(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &str,
        max_attempts: u32,
    ) -> Result<TicketCheck, ServiceError>;

    /// Record `token_id` as redeemed. Returns `false` when it already was.
    async fn redeem_once(&self, token_id: &str, ttl_seconds: i64) -> Result<bool, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

fn ticket_key(user_id: Uuid, purpose: OtpPurpose) -> String {
    format!("otp:{}:{}", purpose.as_str(), user_id)
}

fn redeemed_key(token_id: &str) -> String {
    format!("redeemed:{}", token_id)
}

// KEYS[1] ticket key, ARGV[1] presented code hash, ARGV[2] attempt limit.
// HINCRBY leaves the key TTL untouched.
static CONSUME_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local stored = redis.call('HGET', KEYS[1], 'code_hash')
        if not stored then
            return {0, ''}
        end
        if stored == ARGV[1] then
            local ticket = redis.call('HGET', KEYS[1], 'ticket')
            redis.call('DEL', KEYS[1])
            return {1, ticket}
        end
        local attempts = redis.call('HINCRBY', KEYS[1], 'attempts', 1)
        if attempts >= tonumber(ARGV[2]) then
            redis.call('DEL', KEYS[1])
        end
        return {2, ''}
        "#,
    )
});

#[derive(Clone)]
pub struct RedisTicketStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisTicketStore {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl OtpTicketStore for RedisTicketStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }

    async fn put_ticket(&self, ticket: &OtpTicket) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        let key = ticket_key(ticket.user_id, ticket.purpose);
        let payload = serde_json::to_string(ticket)
            .map_err(|e| anyhow::anyhow!("Failed to serialize OTP ticket: {}", e))?;

        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg("ticket")
            .arg(payload)
            .arg("code_hash")
            .arg(&ticket.code_hash)
            .arg("attempts")
            .arg(0)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ticket.ttl_seconds().max(1))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn consume_ticket(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &str,
        max_attempts: u32,
    ) -> Result<TicketCheck, ServiceError> {
        let mut conn = self.manager.clone();
        let (status, payload): (i64, String) = CONSUME_SCRIPT
            .key(ticket_key(user_id, purpose))
            .arg(code_hash)
            .arg(max_attempts)
            .invoke_async(&mut conn)
            .await?;

        match status {
            1 => {
                let ticket: OtpTicket = serde_json::from_str(&payload)
                    .map_err(|e| anyhow::anyhow!("Corrupt OTP ticket: {}", e))?;
                if ticket.is_expired_at(Utc::now()) {
                    Ok(TicketCheck::Missing)
                } else {
                    Ok(TicketCheck::Verified(ticket))
                }
            }
            2 => Ok(TicketCheck::Mismatch),
            _ => Ok(TicketCheck::Missing),
        }
    }

    async fn redeem_once(&self, token_id: &str, ttl_seconds: i64) -> Result<bool, ServiceError> {
        let mut conn = self.manager.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(redeemed_key(token_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await?;

        Ok(set.is_some())
    }
}

/// Ticket store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryTicketStore {
    tickets: DashMap<(Uuid, OtpPurpose), OtpTicket>,
    redeemed: DashMap<String, DateTime<Utc>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpTicketStore for MemoryTicketStore {
    async fn put_ticket(&self, ticket: &OtpTicket) -> Result<(), ServiceError> {
        self.tickets
            .insert((ticket.user_id, ticket.purpose), ticket.clone());
        Ok(())
    }

    async fn consume_ticket(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &str,
        max_attempts: u32,
    ) -> Result<TicketCheck, ServiceError> {
        let Entry::Occupied(mut slot) = self.tickets.entry((user_id, purpose)) else {
            return Ok(TicketCheck::Missing);
        };

        if slot.get().is_expired_at(Utc::now()) {
            slot.remove();
            return Ok(TicketCheck::Missing);
        }

        if constant_time_eq(&slot.get().code_hash, code_hash) {
            return Ok(TicketCheck::Verified(slot.remove()));
        }

        let ticket = slot.get_mut();
        ticket.attempts += 1;
        if ticket.attempts >= max_attempts {
            slot.remove();
        }
        Ok(TicketCheck::Mismatch)
    }

    async fn redeem_once(&self, token_id: &str, ttl_seconds: i64) -> Result<bool, ServiceError> {
        let now = Utc::now();
        self.redeemed.retain(|_, until| *until > now);

        match self.redeemed.entry(redeemed_key(token_id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(now + chrono::Duration::seconds(ttl_seconds.max(1)));
                Ok(true)
            }
        }
    }
}
