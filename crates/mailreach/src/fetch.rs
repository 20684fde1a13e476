//! `mailreach fetch`: pipelined POP3 download into a directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};

use mailreach_proto::pop3::FollowUps;
use mailreach_proto::{PopEvent, RequestKind};

use crate::accounts::{Account, AccountProtocol};
use crate::pools::Pools;

/// Download settings.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub output: PathBuf,
    pub delete: bool,
    pub limit: Option<u32>,
}

/// Messages completed by the pipeline but not yet written out.
type Inbox = Arc<Mutex<Vec<(u32, Vec<u8>)>>>;

/// Retrieves every message of `account` (up to the limit) into
/// `options.output`, optionally deleting each one once it is complete.
pub async fn run(pools: &Pools, account: &Account, options: &FetchOptions) -> Result<()> {
    if account.protocol != AccountProtocol::Pop3 {
        bail!("{}: fetch works on POP3 accounts only", account.name);
    }
    tokio::fs::create_dir_all(&options.output)
        .await
        .with_context(|| format!("creating {}", options.output.display()))?;

    let mut pop = pools
        .pop3(account)
        .acquire_required(None)
        .await
        .with_context(|| format!("connecting to {}", account.identity()))?;
    let count = options
        .limit
        .map_or(pop.message_count(), |limit| limit.min(pop.message_count()));
    tracing::info!(account = %account.name, count, batch = pop.batch_size(), "fetching");

    let inbox: Inbox = Arc::default();
    let mut saved = 0usize;
    for msgno in 1..=count {
        pop.queue(RequestKind::Retr, msgno, retrieval(msgno, options.delete, inbox.clone()))
            .await?;
        saved += store(&options.output, &inbox).await?;
    }
    pop.flush_pending().await?;
    saved += store(&options.output, &inbox).await?;

    if options.delete {
        // Deletions only take effect on QUIT.
        pop.quit().await?;
    }
    println!(
        "{}: saved {saved} of {count} messages to {}",
        account.name,
        options.output.display()
    );
    Ok(())
}

/// Callback collecting one message and, if asked, queueing its deletion.
fn retrieval(
    msgno: u32,
    delete: bool,
    inbox: Inbox,
) -> impl FnMut(PopEvent<'_>, &mut FollowUps) + Send + 'static {
    let mut body = Vec::new();
    move |event, follow| match event {
        PopEvent::Status(Ok(())) => {}
        PopEvent::Status(Err(text)) => {
            tracing::warn!(msgno, %text, "retrieval failed");
        }
        PopEvent::Data(line) => body.extend_from_slice(line),
        PopEvent::Done => {
            inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((msgno, std::mem::take(&mut body)));
            if delete
                && let Err(e) = follow.queue(RequestKind::Dele, msgno, move |event, _| {
                    if let PopEvent::Status(Err(text)) = event {
                        tracing::warn!(msgno, %text, "delete refused");
                    }
                })
            {
                tracing::warn!(msgno, error = %e, "delete not queued");
            }
        }
    }
}

/// Writes out completed messages and returns how many were written.
async fn store(dir: &Path, inbox: &Inbox) -> Result<usize> {
    let done = std::mem::take(&mut *inbox.lock().unwrap_or_else(PoisonError::into_inner));
    for (msgno, body) in &done {
        let path = message_path(dir, *msgno);
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(msgno, octets = body.len(), path = %path.display(), "message saved");
    }
    Ok(done.len())
}

fn message_path(dir: &Path, msgno: u32) -> PathBuf {
    dir.join(format!("{msgno:06}.eml"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn test_message_path() {
        assert_eq!(
            message_path(Path::new("/tmp/mail"), 42),
            PathBuf::from("/tmp/mail/000042.eml")
        );
    }

    #[test]
    fn test_retrieval_collects_and_queues_delete() {
        let inbox: Inbox = Arc::default();
        let mut callback = retrieval(7, true, inbox.clone());
        let mut follow = FollowUps::new(4);

        callback(PopEvent::Status(Ok(())), &mut follow);
        callback(PopEvent::Data(b"Subject: hi\r\n"), &mut follow);
        callback(PopEvent::Data(b"\r\nbody\r\n"), &mut follow);
        callback(PopEvent::Done, &mut follow);

        let done = inbox.lock().unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, 7);
        assert_eq!(done[0].1, b"Subject: hi\r\n\r\nbody\r\n");
        assert_eq!(follow.len(), 1);
    }

    #[tokio::test]
    async fn test_store_drains_inbox() {
        let dir = std::env::temp_dir().join(format!("mailreach-store-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let inbox: Inbox = Arc::new(Mutex::new(vec![(1, b"one".to_vec()), (2, b"two".to_vec())]));

        assert_eq!(store(&dir, &inbox).await.unwrap(), 2);
        assert!(inbox.lock().unwrap().is_empty());
        assert_eq!(tokio::fs::read(message_path(&dir, 2)).await.unwrap(), b"two");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
