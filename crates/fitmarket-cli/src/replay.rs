//! Reading change events from JSON lines.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use fitmarket_live::feed::IngestSender;
use fitmarket_live::proto::ChangeEvent;

/// Counts from one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Non-empty, non-comment lines read.
    pub lines: u64,
    /// Events handed to the ingestor.
    pub forwarded: u64,
    /// Lines that were not valid change events.
    pub malformed: u64,
}

/// Parse each line as a [`ChangeEvent`] and send it to the ingestor.
///
/// Blank lines and lines starting with `#` are skipped. Malformed lines are
/// logged and skipped. Stops early if the ingestor goes away.
pub async fn forward_lines<R>(reader: R, tx: IngestSender) -> std::io::Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stats.lines += 1;

        let event = match ChangeEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed change event");
                stats.malformed += 1;
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            warn!(line = line_no, "ingestor stopped, ending replay");
            break;
        }
        stats.forwarded += 1;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::BufReader;

    const LINES: &str = r#"# replay of a bidding session
{"schema":"public","table":"bids","eventType":"INSERT","new":{"id":1,"amount":45}}

{"table":"bids","eventType":"UPSERT","new":{"id":2}}
not json at all
{"schema":"public","table":"bids","eventType":"UPDATE","old":{"id":1,"amount":45},"new":{"id":1,"amount":40}}
"#;

    #[tokio::test]
    async fn test_forward_skips_malformed_lines() {
        let (tx, mut rx) = fitmarket_live::feed::channel(16);

        let stats = forward_lines(BufReader::new(LINES.as_bytes()), tx)
            .await
            .unwrap();

        assert_eq!(
            stats,
            ReplayStats {
                lines: 4,
                forwarded: 2,
                malformed: 2
            }
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.new["amount"], 45);
        assert_eq!(second.new["amount"], 40);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LINES.as_bytes()).unwrap();
        file.flush().unwrap();

        let handle = tokio::fs::File::open(file.path()).await.unwrap();
        let (tx, _rx) = fitmarket_live::feed::channel(16);
        let stats = forward_lines(BufReader::new(handle), tx).await.unwrap();

        assert_eq!(stats.forwarded, 2);
    }

    #[tokio::test]
    async fn test_forward_stops_when_ingestor_is_gone() {
        let (tx, rx) = fitmarket_live::feed::channel(16);
        drop(rx);

        let stats = forward_lines(BufReader::new(LINES.as_bytes()), tx)
            .await
            .unwrap();

        assert_eq!(stats.forwarded, 0);
        assert_eq!(stats.lines, 1);
    }
}
