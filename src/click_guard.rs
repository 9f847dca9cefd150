use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ClickError {
    #[error("unparseable click timestamp {raw:?}: {source}")]
    InvalidTimestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("click at {0} is not newer than the last accepted click")]
    Duplicate(DateTime<Utc>),

    #[error("click is missing the {0:?} parameter")]
    MissingParameter(&'static str),

    #[error("click carries invalid alert labels: {0}")]
    InvalidLabels(#[from] serde_json::Error),

    #[error("{0:#}")]
    Silence(anyhow::Error),
}

/// Parse the RFC 3339 event time attached to a click.
pub fn parse_event_time(raw: &str) -> Result<DateTime<Utc>, ClickError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| ClickError::InvalidTimestamp {
            raw: raw.to_string(),
            source,
        })
}

/// Rejects clicks that are not strictly newer than the last accepted one.
///
/// The chat transport may redeliver a click or deliver clicks out of order.
/// A single cursor is a best-effort guard: a genuinely new click on another
/// card that arrives late is rejected too.
#[derive(Debug, Default)]
pub struct ClickGuard {
    cursor: Mutex<Option<DateTime<Utc>>>,
}

impl ClickGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the cursor for a whole admit -> act -> commit sequence, so two
    /// overlapping deliveries of the same click cannot both be admitted.
    pub async fn lock(&self) -> ClickCursor<'_> {
        ClickCursor {
            cursor: self.cursor.lock().await,
        }
    }
}

pub struct ClickCursor<'a> {
    cursor: MutexGuard<'a, Option<DateTime<Utc>>>,
}

impl ClickCursor<'_> {
    pub fn admit(&self, event_time: DateTime<Utc>) -> bool {
        match *self.cursor {
            Some(cursor) if event_time <= cursor => {
                info!("Old click received - ignoring {}", event_time);
                false
            }
            cursor => {
                debug!("Click at {} admitted (cursor {:?})", event_time, cursor);
                true
            }
        }
    }

    /// Same as `admit` but as a `Result` for `?` call sites.
    pub fn check(&self, event_time: DateTime<Utc>) -> Result<(), ClickError> {
        if self.admit(event_time) {
            Ok(())
        } else {
            Err(ClickError::Duplicate(event_time))
        }
    }

    pub fn commit(&mut self, event_time: DateTime<Utc>) {
        *self.cursor = Some(event_time);
    }
}
