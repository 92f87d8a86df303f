//! Byte pumps between terminal streams and an attached remote process.
//!
//! Runs three loops for the lifetime of a remote command:
//!
//! - input: terminal stdin to the process stdin
//! - output: process stdout and stderr to the terminal sinks
//! - resize: terminal size changes to the process
//!
//! Whichever of input or output finishes first ends the run.

use std::sync::Arc;

use bytes::BytesMut;
use futures::channel::mpsc;
use futures::SinkExt;
use kube::api::TerminalSize as RemoteSize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::ExecError;
use crate::session::{BridgeError, OutputSink, PtyStreams, StdinSource, TerminalSizeQueue};

/// Buffer size for remote output reads.
const OUTPUT_BUFFER_SIZE: usize = 4096;

/// Buffer size for terminal input.
const INPUT_BUFFER_SIZE: usize = 1024;

/// How a pump run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The remote process closed its output streams.
    RemoteExited,
    /// The browser went away first.
    ClientClosed,
}

/// Copies bytes between `streams` and a remote process until one side ends.
///
/// `remote_stderr` is `None` when the process runs with a TTY, in which case
/// stderr is merged into stdout remotely. Without `size_tx` size changes are
/// drained and dropped so the terminal reader never stalls on them.
pub async fn pump_streams<I, O, E>(
    streams: PtyStreams,
    mut remote_stdin: I,
    remote_stdout: O,
    remote_stderr: Option<E>,
    size_tx: Option<mpsc::Sender<RemoteSize>>,
) -> Result<PumpOutcome, ExecError>
where
    I: AsyncWrite + Unpin,
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let PtyStreams {
        mut stdin,
        stdout,
        stderr,
        resize,
    } = streams;

    let sizes = tokio::spawn(forward_sizes(resize, size_tx));

    let input = copy_input(stdin.as_mut(), &mut remote_stdin);
    let output = async {
        let stderr_copy = async {
            match remote_stderr {
                Some(remote) => copy_output(remote, stderr).await,
                None => Ok(()),
            }
        };
        tokio::try_join!(copy_output(remote_stdout, stdout), stderr_copy)
    };

    let outcome = tokio::select! {
        result = input => result,
        result = output => result.map(|_| PumpOutcome::RemoteExited),
    };

    sizes.abort();
    outcome
}

async fn copy_input<S, I>(stdin: &mut S, remote: &mut I) -> Result<PumpOutcome, ExecError>
where
    S: StdinSource + ?Sized,
    I: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(INPUT_BUFFER_SIZE);
    loop {
        buf.clear();
        let result = stdin.read(&mut buf).await;

        // On error the buffer carries the end-of-transmission trailer.
        if !buf.is_empty() {
            remote.write_all(&buf).await?;
            remote.flush().await?;
        }

        match result {
            Ok(_) => continue,
            Err(BridgeError::TransportClosed) => return Ok(PumpOutcome::ClientClosed),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Copies remote output to `sink`, one frame per read.
///
/// A multi-byte UTF-8 character cut by a read boundary is held back and sent
/// with the next read, so frames never split a character.
async fn copy_output<O>(mut remote: O, sink: Arc<dyn OutputSink>) -> Result<(), ExecError>
where
    O: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut pending = 0;
    loop {
        let n = remote.read(&mut buf[pending..]).await?;
        if n == 0 {
            if pending > 0 {
                sink.write(&buf[..pending]).await?;
            }
            return Ok(());
        }

        let filled = pending + n;
        let complete = filled - incomplete_utf8_tail(&buf[..filled]);
        if complete > 0 {
            sink.write(&buf[..complete]).await?;
        }
        buf.copy_within(complete..filled, 0);
        pending = filled - complete;
    }
}

/// Length of a trailing UTF-8 sequence that is cut short but could still be
/// completed by more input. Bytes that can never be valid count as complete.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let Some(chunk) = bytes.utf8_chunks().last() else {
        return 0;
    };
    let invalid = chunk.invalid();
    let width = match invalid.first() {
        Some(0xC2..=0xDF) => 2,
        Some(0xE0..=0xEF) => 3,
        Some(0xF0..=0xF4) => 4,
        _ => return 0,
    };
    if invalid.len() < width {
        invalid.len()
    } else {
        0
    }
}

/// Runs a cleanup action on drop unless disarmed.
///
/// Used to abort an attached remote process on every exit path except a
/// normal remote exit, including cancellation of the surrounding future.
pub struct AbortGuard<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> AbortGuard<F> {
    /// Arms the guard with `on_drop`.
    pub fn new(on_drop: F) -> Self {
        Self {
            on_drop: Some(on_drop),
        }
    }

    /// Drops the guard without running its action.
    pub fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for AbortGuard<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

async fn forward_sizes(
    mut resize: Box<dyn TerminalSizeQueue>,
    size_tx: Option<mpsc::Sender<RemoteSize>>,
) {
    let Some(mut tx) = size_tx else {
        while resize.next().await.is_some() {}
        return;
    };

    while let Some(size) = resize.next().await {
        let remote = RemoteSize {
            width: size.cols,
            height: size.rows,
        };
        if tx.send(remote).await.is_err() {
            debug!("Remote terminal size channel closed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PtyHandler, TerminalSession};
    use axum::extract::ws::Message;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;
    use protocol::{TerminalMessage, TerminalSize as LocalSize};
    use std::time::Duration;
    use tokio::io::{duplex, empty, DuplexStream, Empty};

    type Inbound = fmpsc::UnboundedSender<Result<Message, std::io::Error>>;

    fn session() -> (
        TerminalSession<
            fmpsc::UnboundedReceiver<Result<Message, std::io::Error>>,
            fmpsc::UnboundedSender<Message>,
        >,
        Inbound,
        fmpsc::UnboundedReceiver<Message>,
    ) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        (TerminalSession::new("pump", in_rx, out_tx), in_tx, out_rx)
    }

    fn text(message: &TerminalMessage) -> Result<Message, std::io::Error> {
        Ok(Message::Text(message.encode().unwrap()))
    }

    fn output_data(message: Message) -> String {
        match message {
            Message::Text(t) => TerminalMessage::decode(t.as_bytes()).unwrap().data,
            other => panic!("unexpected frame {other:?}"),
        }
    }

    /// Reads stdout frames until `len` bytes of text have arrived.
    async fn read_frames(outbound: &mut fmpsc::UnboundedReceiver<Message>, len: usize) -> Vec<String> {
        let mut frames = Vec::new();
        let mut received = 0;
        while received < len {
            let frame = tokio::time::timeout(Duration::from_secs(1), outbound.next())
                .await
                .unwrap()
                .map(output_data)
                .unwrap();
            received += frame.len();
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_remote_exit_ends_run() {
        let (session, _inbound, mut outbound) = session();
        let (remote_stdin, _remote_stdin_peer) = duplex(64);
        let (mut process_out, remote_stdout) = duplex(64);

        let pump = tokio::spawn(pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            None::<Empty>,
            None,
        ));

        process_out.write_all(b"hello\r\n").await.unwrap();
        assert_eq!(output_data(outbound.next().await.unwrap()), "hello\r\n");

        drop(process_out);
        let outcome = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PumpOutcome::RemoteExited);
    }

    #[tokio::test]
    async fn test_stdin_reaches_remote_process() {
        let (session, inbound, _outbound) = session();
        let (remote_stdin, mut process_in) = duplex(64);
        let (_process_out, remote_stdout) = duplex(64);

        let pump = tokio::spawn(pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            None::<Empty>,
            None,
        ));

        inbound.unbounded_send(text(&TerminalMessage::stdin("ls\n"))).unwrap();
        let mut buf = [0u8; 3];
        process_in.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls\n");

        drop(inbound);
        let mut eot = [0u8; 1];
        process_in.read_exact(&mut eot).await.unwrap();
        assert_eq!(&eot, protocol::END_OF_TRANSMISSION);

        let outcome = pump.await.unwrap().unwrap();
        assert_eq!(outcome, PumpOutcome::ClientClosed);
    }

    #[tokio::test]
    async fn test_bad_frame_sends_eot_and_fails() {
        let (session, inbound, _outbound) = session();
        let (remote_stdin, mut process_in) = duplex(64);
        let (_process_out, remote_stdout) = duplex(64);

        let pump = tokio::spawn(pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            None::<Empty>,
            None,
        ));

        inbound
            .unbounded_send(Ok(Message::Text(r#"{"operation":"launch"}"#.into())))
            .unwrap();

        let mut eot = [0u8; 1];
        process_in.read_exact(&mut eot).await.unwrap();
        assert_eq!(&eot, protocol::END_OF_TRANSMISSION);

        let err = pump.await.unwrap().unwrap_err();
        assert!(matches!(err, ExecError::Bridge(BridgeError::UnknownOperation(_))));
    }

    #[tokio::test]
    async fn test_resizes_forwarded_to_remote() {
        let (session, inbound, _outbound) = session();
        let (remote_stdin, _process_in) = duplex(64);
        let (_process_out, remote_stdout) = duplex(64);
        let (size_tx, mut size_rx) = fmpsc::channel(1);

        let pump = tokio::spawn(pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            None::<Empty>,
            Some(size_tx),
        ));

        inbound
            .unbounded_send(text(&TerminalMessage::resize(LocalSize::new(132, 43))))
            .unwrap();

        let size = size_rx.next().await.unwrap();
        assert_eq!((size.width, size.height), (132, 43));

        drop(inbound);
        assert_eq!(pump.await.unwrap().unwrap(), PumpOutcome::ClientClosed);
    }

    #[tokio::test]
    async fn test_resizes_drained_without_remote_channel() {
        let (session, inbound, _outbound) = session();
        let session = session.with_tty(false);
        assert!(!session.tty());
        let (remote_stdin, mut process_in) = duplex(64);
        let (_process_out, remote_stdout) = duplex(64);

        let pump = tokio::spawn(pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            None::<Empty>,
            None,
        ));

        inbound
            .unbounded_send(text(&TerminalMessage::resize(LocalSize::new(80, 24))))
            .unwrap();
        inbound.unbounded_send(text(&TerminalMessage::stdin("x"))).unwrap();

        let mut buf = [0u8; 1];
        tokio::time::timeout(Duration::from_secs(1), process_in.read_exact(&mut buf))
            .await
            .expect("resize must not stall input")
            .unwrap();
        assert_eq!(&buf, b"x");

        drop(inbound);
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stderr_copied_when_present() {
        let (session, _inbound, mut outbound) = session();
        let (remote_stdin, _process_in) = duplex(64);
        let (process_out, remote_stdout): (DuplexStream, DuplexStream) = duplex(64);
        let (mut process_err, remote_stderr) = duplex(64);

        let pump = tokio::spawn(pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            Some(remote_stderr),
            None,
        ));

        process_err.write_all(b"warning").await.unwrap();
        assert_eq!(output_data(outbound.next().await.unwrap()), "warning");

        drop(process_out);
        drop(process_err);
        assert_eq!(pump.await.unwrap().unwrap(), PumpOutcome::RemoteExited);
    }

    #[tokio::test]
    async fn test_character_split_by_read_boundary_is_kept_whole() {
        let (session, _inbound, mut outbound) = session();
        let (remote_stdin, _process_in) = duplex(64);
        let (mut process_out, remote_stdout) = duplex(2 * OUTPUT_BUFFER_SIZE);

        let mut expected = "a".repeat(OUTPUT_BUFFER_SIZE - 1);
        expected.push_str("é┤漢");
        process_out.write_all(expected.as_bytes()).await.unwrap();
        drop(process_out);

        let outcome = pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            None::<Empty>,
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome, PumpOutcome::RemoteExited);

        let frames = read_frames(&mut outbound, expected.len()).await;
        assert!(frames.len() >= 2);
        assert!(frames.iter().all(|frame| !frame.contains('\u{fffd}')));
        assert_eq!(frames.concat(), expected);
    }

    #[tokio::test]
    async fn test_truncated_character_flushed_at_end() {
        let (session, _inbound, mut outbound) = session();
        let (remote_stdin, _process_in) = duplex(64);
        let (mut process_out, remote_stdout) = duplex(64);

        process_out.write_all(b"ok \xe2\x94").await.unwrap();
        drop(process_out);

        pump_streams(
            session.into_streams(),
            remote_stdin,
            remote_stdout,
            None::<Empty>,
            None,
        )
        .await
        .unwrap();

        let frames = read_frames(&mut outbound, "ok \u{fffd}".len()).await;
        assert_eq!(frames.concat(), "ok \u{fffd}");
    }

    #[test]
    fn test_incomplete_utf8_tail() {
        assert_eq!(incomplete_utf8_tail(b""), 0);
        assert_eq!(incomplete_utf8_tail(b"plain"), 0);
        assert_eq!(incomplete_utf8_tail("é".as_bytes()), 0);
        assert_eq!(incomplete_utf8_tail(b"a\xc3"), 1);
        assert_eq!(incomplete_utf8_tail(b"a\xe6\xbc"), 2);
        assert_eq!(incomplete_utf8_tail(b"a\xf0\x9f\x98"), 3);
        // Never valid, so nothing to wait for
        assert_eq!(incomplete_utf8_tail(b"a\xff"), 0);
        assert_eq!(incomplete_utf8_tail(b"a\x80"), 0);
    }

    #[test]
    fn test_abort_guard_runs_unless_disarmed() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let aborted = AtomicUsize::new(0);
        drop(AbortGuard::new(|| {
            aborted.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(aborted.load(Ordering::SeqCst), 1);

        AbortGuard::new(|| {
            aborted.fetch_add(1, Ordering::SeqCst);
        })
        .disarm();
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_guard_runs_on_cancelled_future() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let aborted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        let guard = AbortGuard::new(move || flag.store(true, Ordering::SeqCst));
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        tokio::task::yield_now().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_remote_output_exits_immediately() {
        let (session, _inbound, _outbound) = session();
        let (remote_stdin, _process_in) = duplex(64);

        let streams = session.into_streams();
        let outcome = pump_streams(streams, remote_stdin, empty(), None::<Empty>, None)
            .await
            .unwrap();
        assert_eq!(outcome, PumpOutcome::RemoteExited);
    }
}
