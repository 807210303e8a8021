//! LISTEN/NOTIFY plumbing for job wake hints.
//!
//! Every insert fires a trigger that publishes `"<queue> <id>"` on the
//! `job` channel. Delivery is best effort: at commit, and only to sessions
//! listening at that moment. Consumers treat a notice as a hint to claim
//! sooner, never as the thing that makes a job claimable — the row itself
//! is always the source of truth.

use sqlx::postgres::PgListener;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::model::JobId;

/// Channel the insert trigger publishes on.
pub const NOTIFY_CHANNEL: &str = "job";

/// A decoded wake hint: which queue gained a job, and which job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotice {
    pub queue: String,
    pub id: JobId,
}

impl super::Db {
    /// Open a dedicated LISTEN session on the notification channel.
    pub async fn listen(&self) -> Result<JobListener> {
        let mut listener = PgListener::connect_with(self.pool()).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        Ok(JobListener { listener })
    }
}

/// A subscription to job wake hints.
pub struct JobListener {
    listener: PgListener,
}

impl JobListener {
    /// Receive the next well-formed notice.
    ///
    /// Malformed payloads are logged and skipped rather than surfaced:
    /// anything else sharing the channel must not wedge the consumer.
    pub async fn recv(&mut self) -> Result<JobNotice> {
        loop {
            let notification = self.listener.recv().await?;
            match parse_notice(notification.payload()) {
                Some(notice) => return Ok(notice),
                None => {
                    warn!(
                        payload = notification.payload(),
                        "ignoring malformed job notice"
                    );
                }
            }
        }
    }
}

/// Parse a `"<queue> <id>"` payload. The id is always the last token, so
/// splitting from the right keeps queue names with spaces intact.
fn parse_notice(payload: &str) -> Option<JobNotice> {
    let (queue, id) = payload.rsplit_once(' ')?;
    if queue.is_empty() {
        return None;
    }
    let id = Uuid::parse_str(id).ok()?;
    Some(JobNotice {
        queue: queue.to_string(),
        id: JobId(id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_queue_and_id() {
        let id = Uuid::new_v4();
        let notice = parse_notice(&format!("emails {id}")).unwrap();
        assert_eq!(notice.queue, "emails");
        assert_eq!(notice.id, JobId(id));
    }

    #[test]
    fn splits_from_the_right_for_odd_queue_names() {
        let id = Uuid::new_v4();
        let notice = parse_notice(&format!("reports monthly {id}")).unwrap();
        assert_eq!(notice.queue, "reports monthly");
        assert_eq!(notice.id, JobId(id));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_notice("").is_none());
        assert!(parse_notice("no-separator").is_none());
        assert!(parse_notice("queue not-a-uuid").is_none());
        assert!(
            parse_notice(&format!(" {}", Uuid::new_v4())).is_none(),
            "empty queue name"
        );
    }
}
