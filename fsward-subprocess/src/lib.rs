pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use fsward_core::Toolbox;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Line that cancels every call currently in flight.
pub const CANCEL_LINE: &str = "CANCEL";

/// Pseudo tool answering with the registry's definitions.
pub const LIST_TOOLS: &str = "list_tools";

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    pub result: Value,
}

/// Reads one JSON request per line from `input` and writes one response per
/// line to `output`. Calls run concurrently, so responses may come back out
/// of order; match them up by `id`. Returns once `input` is exhausted and
/// every in-flight call has answered.
pub async fn run_subprocess<R, W>(
    toolbox: Arc<Toolbox>,
    input: R,
    output: W,
    maintenance_every: Duration,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let maintenance = tokio::spawn(run_maintenance(Arc::clone(&toolbox), maintenance_every));

    let mut cancel = CancellationToken::new();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == CANCEL_LINE {
            info!("Cancelling in-flight calls");
            cancel.cancel();
            cancel = CancellationToken::new();
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(?e, "Discarding malformed request");
                send(
                    &tx,
                    Response {
                        id: Value::Null,
                        result: json!({
                            "success": false,
                            "error": format!("Invalid request: {e}"),
                            "error_kind": "input",
                        }),
                    },
                );
                continue;
            }
        };

        let toolbox = Arc::clone(&toolbox);
        let tx = tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            debug!(tool = %request.tool, "Dispatching call");
            let result = if request.tool == LIST_TOOLS {
                json!({ "success": true, "tools": toolbox.registry().definitions() })
            } else {
                toolbox
                    .call_raw(&request.tool, request.arguments, &token)
                    .await
            };
            send(
                &tx,
                Response {
                    id: request.id,
                    result,
                },
            );
        });
    }

    // The writer drains until the last in-flight call drops its sender.
    drop(tx);
    writer.await??;
    maintenance.abort();
    Ok(())
}

fn send(tx: &mpsc::UnboundedSender<String>, response: Response) {
    match serde_json::to_string(&response) {
        Ok(line) => {
            if tx.send(line).is_err() {
                warn!("Output closed before a response could be written");
            }
        }
        Err(e) => warn!(?e, "Failed to serialize response"),
    }
}

async fn run_maintenance(toolbox: Arc<Toolbox>, every: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        interval.tick().await;
        let report = toolbox.run_maintenance().await;
        debug!(?report, "Maintenance pass finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsward_core::Settings;
    use tokio::io::{AsyncReadExt, BufReader};

    fn toolbox(temp: &tempfile::TempDir) -> Arc<Toolbox> {
        let workspace = temp.path().join("workspace");
        std::fs::create_dir(&workspace).unwrap();
        std::fs::write(workspace.join("hello.txt"), "hi").unwrap();

        let mut settings = Settings::default();
        settings.workspace.dir = workspace;
        settings.files.backup_dir = Some(temp.path().join("backups"));
        Arc::new(Toolbox::new(&settings).unwrap())
    }

    async fn run(toolbox: Arc<Toolbox>, input: &str) -> Vec<Value> {
        let (output, mut reader) = tokio::io::duplex(1 << 20);
        run_subprocess(
            toolbox,
            BufReader::new(input.as_bytes()),
            output,
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        text.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        let temp = tempfile::tempdir().unwrap();
        let input = [
            r#"{"id": 1, "tool": "read_file", "arguments": {"agent": "a", "path": "hello.txt"}}"#,
            "",
            r#"{"id": 2, "tool": "read_file", "arguments": {"agent": "a", "path": "../etc/passwd"}}"#,
            r#"{"id": 3, "tool": "list_tools"}"#,
            "not json",
        ]
        .join("\n");

        let mut responses = run(toolbox(&temp), &input).await;
        assert_eq!(responses.len(), 4);
        responses.sort_by_key(|r| r["id"].as_i64().unwrap_or(0));

        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[0]["result"]["error_kind"], json!("input"));
        assert_eq!(responses[1]["result"]["content"], json!("hi"));
        assert_eq!(responses[2]["result"]["success"], json!(false));
        assert_eq!(responses[2]["result"]["error_kind"], json!("policy"));
        assert!(responses[3]["result"]["tools"].as_array().unwrap().len() > 10);
    }

    #[tokio::test]
    async fn test_unknown_tool_answers_with_error() {
        let temp = tempfile::tempdir().unwrap();
        let responses = run(
            toolbox(&temp),
            r#"{"id": "x", "tool": "format_disk", "arguments": {"agent": "a"}}"#,
        )
        .await;
        assert_eq!(responses.len(), 1);
        let error = responses[0]["result"]["error"].as_str().unwrap();
        assert!(error.starts_with("Unknown tool: format_disk"));
    }
}
