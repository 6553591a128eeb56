use std::{
    io::{self, BufRead, BufReader},
    sync::Arc,
    thread,
};

use futures::channel::mpsc::{self, UnboundedReceiver};
use log::debug;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::codec::LinesCodecError;

pub type ConsoleLines = UnboundedReceiver<Result<String, LinesCodecError>>;

/// Line-oriented output shared between tasks. Each line is written and
/// flushed while holding the lock, so lines from different writers never
/// interleave.
pub struct Console<W> {
    output: Arc<Mutex<W>>,
}

impl<W> Clone for Console<W> {
    fn clone(&self) -> Self {
        Self {
            output: self.output.clone(),
        }
    }
}

impl Console<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> Console<W> {
    pub fn new(output: W) -> Self {
        Self {
            output: Arc::new(Mutex::new(output)),
        }
    }

    pub async fn println(&self, line: impl AsRef<str>) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.as_ref().len() + 1);
        bytes.extend_from_slice(line.as_ref().as_bytes());
        bytes.push(b'\n');

        let mut output = self.output.lock().await;
        output.write_all(&bytes).await?;
        output.flush().await
    }

    pub async fn with_output<R>(&self, f: impl FnOnce(&W) -> R) -> R {
        f(&*self.output.lock().await)
    }
}

/// Lines typed on stdin. See [`spawn_line_reader`].
pub fn stdin_lines() -> ConsoleLines {
    spawn_line_reader(BufReader::new(io::stdin()))
}

/// Reads `reader` line by line on a detached thread. Blocking reads can't be
/// cancelled, so a consumer that stops early just drops the receiver and the
/// thread ends on its next line or with the process.
pub fn spawn_line_reader<R: BufRead + Send + 'static>(reader: R) -> ConsoleLines {
    let (sender, receiver) = mpsc::unbounded();
    thread::spawn(move || {
        for line in reader.lines() {
            let failed = line.is_err();
            if sender.unbounded_send(line.map_err(LinesCodecError::from)).is_err() || failed {
                break;
            }
        }
        debug!("Console reader end");
    });
    receiver
}
