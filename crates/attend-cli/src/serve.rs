//! Line-oriented request loop.
//!
//! Reads one JSON request per line from stdin and writes one JSON response
//! per line to stdout. Requests run concurrently, so responses may come
//! back out of order; echo an `id` to correlate them.
//!
//! ```text
//! {"op":"mark","id":"1","faces":[[0.1, ...]],"at":"2024-10-15T09:30:00"}
//! {"op":"reload","id":"2"}
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use attend_core::source::require_faces;
use attend_core::Embedding;
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::config::wall_clock;
use crate::engine::EngineHandle;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Mark {
        #[serde(default)]
        id: Option<String>,
        faces: Vec<Vec<f32>>,
        #[serde(default)]
        at: Option<NaiveDateTime>,
    },
    Reload {
        #[serde(default)]
        id: Option<String>,
    },
}

pub async fn run(engine: EngineHandle, gallery_path: PathBuf, tz: Tz) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    serve(engine, gallery_path, tz, stdin, tokio::io::stdout()).await?;
    tracing::info!("input closed; serve loop finished");
    Ok(())
}

/// Answer every request line read from `input` on `output`.
///
/// A line that cannot be decoded gets an error response. Only end of input
/// or a read failure ends the loop, and requests already in flight are
/// still answered before returning.
async fn serve<R, W>(
    engine: EngineHandle,
    gallery_path: PathBuf,
    tz: Tz,
    mut input: R,
    output: W,
) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = out_rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(output)
    });

    let mut tasks = JoinSet::new();
    let mut buf = Vec::new();
    let mut read_error = None;

    loop {
        while let Some(joined) = tasks.try_join_next() {
            log_join(joined);
        }

        buf.clear();
        match input.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "reading requests failed");
                read_error = Some(e);
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "request line is not UTF-8");
                let response = json!({ "error": format!("bad request: {e}") });
                let _ = out_tx.send(response.to_string()).await;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let engine = engine.clone();
        let gallery_path = gallery_path.clone();
        let out = out_tx.clone();
        tasks.spawn(async move {
            let response = handle_line(&engine, &gallery_path, tz, &line).await;
            let _ = out.send(response.to_string()).await;
        });
    }

    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
    drop(out_tx);
    let output = writer.await??;

    match read_error {
        Some(e) => Err(e.into()),
        None => Ok(output),
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "request task failed");
    }
}

async fn handle_line(engine: &EngineHandle, gallery_path: &Path, tz: Tz, line: &str) -> Value {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(e) => return json!({ "error": format!("bad request: {e}") }),
    };

    match request {
        Request::Mark { id, faces, at } => {
            let now = at.unwrap_or_else(|| wall_clock(tz, chrono::Utc::now()));
            let faces = require_faces(faces.into_iter().map(Embedding::new).collect());
            match engine.mark(faces, now).await {
                Ok(verdict) => json!({
                    "id": id,
                    "message": verdict.message(),
                    "result": verdict,
                }),
                Err(e) => {
                    tracing::error!(error = %e, "mark request failed");
                    json!({ "id": id, "error": e.to_string() })
                }
            }
        }
        Request::Reload { id } => {
            let path = gallery_path.to_path_buf();
            let loaded = tokio::task::spawn_blocking(move || attend_store::load_gallery(&path))
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| r.map_err(|e| e.to_string()));

            let replaced = loaded.and_then(|entries| {
                engine
                    .replace_gallery(entries)
                    .map_err(|e| e.to_string())
            });

            match replaced {
                Ok(gallery) => json!({
                    "id": id,
                    "gallery_version": gallery.version(),
                    "entries": gallery.len(),
                    "fingerprint": gallery.fingerprint(),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "gallery reload rejected; keeping current snapshot");
                    json!({ "id": id, "error": e })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine_with;
    use attend_core::{Gallery, GalleryEntry};
    use attend_store::Store;
    use std::io::Write;
    use std::time::Duration;

    const TZ: Tz = crate::config::DEFAULT_TIMEZONE;

    fn gallery_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "names": ["Ana", "Luis"], "encodings": [[0.0, 0.0], [1.0, 1.0]] }}"#
        )
        .unwrap();
        file
    }

    async fn serve_lines(engine: EngineHandle, gallery: &Path, input: &[u8]) -> Vec<Value> {
        let output = serve(engine, gallery.to_path_buf(), TZ, input, Vec::new())
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn engine() -> EngineHandle {
        let gallery = Gallery::new(vec![GalleryEntry {
            id: "1".into(),
            label: "Ana".into(),
            embedding: Embedding::new(vec![0.0, 0.0]),
        }])
        .unwrap();
        spawn_engine_with(
            Store::open_in_memory().unwrap(),
            gallery,
            0.6,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_bad_request() {
        let response = handle_line(&engine(), Path::new("unused"), TZ, "{\"op\":\"dance\"}").await;
        assert!(response["error"].as_str().unwrap().starts_with("bad request"));
    }

    #[tokio::test]
    async fn test_mark_without_faces() {
        let response = handle_line(
            &engine(),
            Path::new("unused"),
            TZ,
            r#"{"op":"mark","id":"7","faces":[],"at":"2024-10-15T09:30:00"}"#,
        )
        .await;
        assert_eq!(response["id"], "7");
        assert_eq!(response["result"]["verdict"], "no_face_detected");
        assert!(response["message"].as_str().unwrap().contains("no face"));
    }

    #[tokio::test]
    async fn test_mark_unregistered_label() {
        let response = handle_line(
            &engine(),
            Path::new("unused"),
            TZ,
            r#"{"op":"mark","faces":[[0.1, 0.0]],"at":"2024-10-15T09:30:00"}"#,
        )
        .await;
        assert_eq!(response["result"]["verdict"], "unknown_identity");
    }

    #[tokio::test]
    async fn test_reload_replaces_snapshot() {
        let file = gallery_file();
        let engine = engine();
        let response = handle_line(&engine, file.path(), TZ, r#"{"op":"reload","id":"r"}"#).await;
        assert_eq!(response["gallery_version"], 2);
        assert_eq!(response["entries"], 2);
        assert_eq!(engine.gallery().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_snapshot() {
        let engine = engine();
        let response =
            handle_line(&engine, Path::new("/nonexistent/gallery.json"), TZ, r#"{"op":"reload"}"#)
                .await;
        assert!(response["error"].is_string());
        assert_eq!(engine.gallery().version(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_line_does_not_stop_loop() {
        let file = gallery_file();
        let input = b"{\"op\":\"reload\",\"id\":\"1\"}\n\xff\n\n{\"op\":\"reload\",\"id\":\"2\"}\n";
        let responses = serve_lines(engine(), file.path(), input).await;

        assert_eq!(responses.len(), 3, "got {responses:?}");
        let bad: Vec<_> = responses.iter().filter(|r| r["error"].is_string()).collect();
        assert_eq!(bad.len(), 1);
        assert!(bad[0]["error"].as_str().unwrap().starts_with("bad request"));

        let mut ids: Vec<_> = responses
            .iter()
            .filter_map(|r| r["id"].as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, ["1", "2"]);
    }

    #[tokio::test]
    async fn test_every_request_answered_before_eof_returns() {
        let input: String = (0..20)
            .map(|i| format!("{{\"op\":\"mark\",\"id\":\"{i}\",\"faces\":[]}}\n"))
            .collect();
        let responses = serve_lines(engine(), Path::new("unused"), input.as_bytes()).await;

        assert_eq!(responses.len(), 20);
        assert!(responses
            .iter()
            .all(|r| r["result"]["verdict"] == "no_face_detected"));
    }
}
