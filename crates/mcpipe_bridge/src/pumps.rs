//! The three copy loops of an Active bridge.
//!
//! Each pump runs until its source ends or fails. They are generic over
//! the stream/sink types so they can be driven without a real socket or
//! process.

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use crate::error::{BridgeError, PumpDirection};

const PREVIEW_CHARS: usize = 120;

/// WebSocket → subprocess stdin.
///
/// Every text (or UTF-8 binary) message is written with a trailing newline
/// and flushed before the next message is read. Never returns `Ok`: the
/// loop only ends when the socket closes or fails.
pub async fn inbound<S, W>(mut messages: S, mut stdin: W) -> Result<(), BridgeError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let fail = |cause: String| BridgeError::pump(PumpDirection::Inbound, cause);

    while let Some(msg) = messages.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes)
                .map_err(|e| fail(format!("binary frame is not valid UTF-8: {}", e)))?,
            Ok(Message::Close(frame)) => return Err(closed_by_peer(frame)),
            // Ping/Pong are answered by tungstenite itself
            Ok(_) => continue,
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                return Err(BridgeError::WebSocketClosed {
                    code: None,
                    reason: "connection closed".into(),
                })
            }
            Err(e) => return Err(fail(e.to_string())),
        };

        debug!("← {}", preview(&text));
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| fail(e.to_string()))?;
        stdin.write_all(b"\n").await.map_err(|e| fail(e.to_string()))?;
        stdin.flush().await.map_err(|e| fail(e.to_string()))?;
    }

    Err(BridgeError::WebSocketClosed {
        code: None,
        reason: "stream ended".into(),
    })
}

/// Subprocess stdout → WebSocket.
///
/// Sends each line verbatim, newline included. Returns `Ok` when the
/// process closes its stdout.
pub async fn outbound<R, S>(mut stdout: R, ws: &mut S) -> Result<(), BridgeError>
where
    R: AsyncBufRead + Unpin,
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| BridgeError::pump(PumpDirection::Outbound, e))?;
        if n == 0 {
            return Ok(());
        }

        debug!("→ {}", preview(line.trim_end()));
        ws.send(Message::Text(line.clone()))
            .await
            .map_err(|e| BridgeError::pump(PumpDirection::Outbound, e))?;
    }
}

/// Subprocess stderr → local diagnostics, raw bytes, never parsed.
///
/// Returns `Ok` at end of stream.
pub async fn diagnostic<R, W>(mut stderr: R, mut out: W) -> Result<(), BridgeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = stderr
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| BridgeError::pump(PumpDirection::Diagnostic, e))?;
        if n == 0 {
            return Ok(());
        }
        out.write_all(&buf)
            .await
            .map_err(|e| BridgeError::pump(PumpDirection::Diagnostic, e))?;
        out.flush()
            .await
            .map_err(|e| BridgeError::pump(PumpDirection::Diagnostic, e))?;
    }
}

fn closed_by_peer(frame: Option<CloseFrame<'_>>) -> BridgeError {
    match frame {
        Some(frame) => BridgeError::WebSocketClosed {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.into_owned(),
        },
        None => BridgeError::WebSocketClosed {
            code: None,
            reason: "closed by peer".into(),
        },
    }
}

/// At most [`PREVIEW_CHARS`] characters of a payload, for logging.
pub(crate) fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    fn frames(msgs: Vec<Message>) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(msgs.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_inbound_preserves_order_and_appends_newline() {
        let messages = frames(vec![
            Message::Text("m1".into()),
            Message::Binary(b"m2".to_vec()),
            Message::Ping(vec![1]),
            Message::Text("m3".into()),
        ]);
        let mut stdin = Vec::new();
        let err = inbound(messages, &mut stdin).await.unwrap_err();

        assert_eq!(String::from_utf8(stdin).unwrap(), "m1\nm2\nm3\n");
        assert!(matches!(err, BridgeError::WebSocketClosed { code: None, .. }));
    }

    #[tokio::test]
    async fn test_inbound_close_frame_carries_code() {
        let messages = frames(vec![
            Message::Text("hello".into()),
            Message::Close(Some(CloseFrame {
                code: CloseCode::from(4004),
                reason: "endpoint gone".into(),
            })),
            Message::Text("never delivered".into()),
        ]);
        let mut stdin = Vec::new();
        let err = inbound(messages, &mut stdin).await.unwrap_err();

        assert_eq!(stdin, b"hello\n");
        match err {
            BridgeError::WebSocketClosed { code, reason } => {
                assert_eq!(code, Some(4004));
                assert_eq!(reason, "endpoint gone");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inbound_rejects_invalid_utf8() {
        let messages = frames(vec![Message::Binary(vec![0xff, 0xfe])]);
        let err = inbound(messages, Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Pump {
                direction: PumpDirection::Inbound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_outbound_sends_lines_verbatim_then_ends() {
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let mut ws = tx.sink_map_err(|_| WsError::ConnectionClosed);
        let stdout: &[u8] = b"l1\nl2\nl3";

        outbound(stdout, &mut ws).await.unwrap();
        drop(ws);

        let mut sent = Vec::new();
        while let Some(msg) = rx.next().await {
            sent.push(msg);
        }
        assert_eq!(
            sent,
            vec![
                Message::Text("l1\n".into()),
                Message::Text("l2\n".into()),
                Message::Text("l3".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_outbound_send_failure_is_pump_error() {
        let (tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        let mut ws = tx.sink_map_err(|_| WsError::ConnectionClosed);
        let stdout: &[u8] = b"l1\n";

        let err = outbound(stdout, &mut ws).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Pump {
                direction: PumpDirection::Outbound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_diagnostic_copies_raw_bytes() {
        let stderr: &[u8] = b"warning: one\n\xffraw\n";
        let mut out = Vec::new();
        diagnostic(stderr, &mut out).await.unwrap();
        assert_eq!(out, b"warning: one\n\xffraw\n");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(200);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
    }
}
