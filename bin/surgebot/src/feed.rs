use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use common::Candle;

/// Reads newline-delimited JSON candles from stdin and publishes them on the
/// candle broadcast. This is the aggregator boundary: whatever process
/// normalizes exchange data pipes closed candles in here, one per line.
pub async fn run_stdin_feed(candle_tx: broadcast::Sender<Candle>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    info!("Candle feed reading from stdin");

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Candle>(line) {
                    // Ignore send errors (no active receivers)
                    Ok(candle) => {
                        let _ = candle_tx.send(candle);
                    }
                    Err(e) => warn!(error = %e, "Malformed candle line skipped"),
                }
            }
            Ok(None) => {
                info!("Candle feed reached end of input");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Candle feed read error");
                return;
            }
        }
    }
}
