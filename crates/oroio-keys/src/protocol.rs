//! Line protocol for long-running mode
//!
//! `oroio serve` reads one JSON request per line on stdin and answers with
//! one JSON line on stdout, while a timer re-runs the alert check in the
//! background. Both paths share the same alert engine.
//!
//! Requests:
//!
//! ```text
//! {"op":"list"}                 -> [KeyInfo, ...]
//! {"op":"current"}              -> KeyInfo | null
//! {"op":"add","key":"sk-..."}   -> OpResult
//! {"op":"remove","index":2}     -> OpResult
//! {"op":"use","index":1}        -> OpResult
//! {"op":"refresh"}              -> OpResult
//! {"op":"check"}                -> {"alerts":[{title,message,urgency}, ...]}
//! {"op":"read","file":"current"} -> base64 string | null
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::service::{KeyService, OpResult};

/// A request read from stdin
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    List,
    Current,
    Add { key: String },
    Remove { index: usize },
    Use { index: usize },
    Refresh,
    Check,
    Read { file: String },
}

/// Answer a raw request line. Bytes that are not UTF-8 get an error result.
pub fn handle_bytes(service: &KeyService, line: &[u8]) -> Value {
    match std::str::from_utf8(line) {
        Ok(text) => handle(service, text),
        Err(e) => json!(OpResult::err(format!("Invalid request: {}", e))),
    }
}

/// Answer a single request line
pub fn handle(service: &KeyService, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return json!(OpResult::err(format!("Invalid request: {}", e))),
    };

    match request {
        Request::List => json!(service.list_keys()),
        Request::Current => json!(service.current_key()),
        Request::Add { key } => json!(service.add_key(&key)),
        Request::Remove { index } => json!(service.remove_key(index)),
        Request::Use { index } => json!(service.use_key(index)),
        Request::Refresh => json!(service.refresh_cache()),
        Request::Check => {
            let alerts: Vec<Value> = service
                .check()
                .iter()
                .map(|alert| {
                    let n = alert.to_notification();
                    json!({
                        "title": n.title,
                        "message": n.message,
                        "urgency": n.urgency.as_str(),
                    })
                })
                .collect();
            json!({ "alerts": alerts })
        }
        Request::Read { file } => json!(service.read_data(&file).map(|bytes| STANDARD.encode(bytes))),
    }
}

/// Serve requests from stdin until EOF or Ctrl-C, checking alerts every `period`
pub async fn serve(service: Arc<KeyService>, period: Duration) -> anyhow::Result<()> {
    let ticker = tokio::spawn(periodic_checks(Arc::clone(&service), period));

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line = Vec::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_until(b'\n', &mut line) => read?,
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        };

        if bytes_read == 0 {
            info!("Input closed, shutting down");
            break;
        }

        let request = line.trim_ascii().to_vec();
        if request.is_empty() {
            continue;
        }

        // Request lines may carry keys, so only their size is logged
        debug!(bytes = request.len(), "Received request");

        let svc = Arc::clone(&service);
        let response = tokio::task::spawn_blocking(move || handle_bytes(&svc, &request)).await?;

        let resp_str = serde_json::to_string(&response)?;
        stdout.write_all(resp_str.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    ticker.abort();
    Ok(())
}

/// Re-run the alert check on a fresh view every `period`, starting now
pub async fn periodic_checks(service: Arc<KeyService>, period: Duration) {
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let svc = Arc::clone(&service);
        match tokio::task::spawn_blocking(move || svc.check()).await {
            Ok(alerts) => debug!(alerts = alerts.len(), "Periodic alert check"),
            Err(e) => warn!("Periodic alert check failed: {}", e),
        }
    }
}
