use std::io::{Cursor, SeekFrom};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeek, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{emit, Ammo, AmmoKind, AmmoReceiver, HttpAmmo, Outlet, Provider, DEFAULT_AMMO_BUFFER};
use crate::error::{Error, Result};
use crate::pool::Pool;

/// Anything a decoder can read lines from and rewind.
pub trait AmmoInput: AsyncBufRead + AsyncSeek + Unpin + Send + Sync {}

impl<T: AsyncBufRead + AsyncSeek + Unpin + Send + Sync> AmmoInput for T {}

/// Where a file-backed provider reads its ammo from.
#[derive(Debug, Clone)]
pub enum AmmoSource {
    File(PathBuf),
    Inline(Vec<u8>),
}

impl AmmoSource {
    pub async fn open(&self) -> Result<LineReader> {
        let input: Box<dyn AmmoInput> = match self {
            AmmoSource::File(path) => {
                let file = File::open(path).await.map_err(|source| Error::SourceOpen {
                    path: path.clone(),
                    source,
                })?;
                Box::new(BufReader::new(file))
            }
            AmmoSource::Inline(bytes) => Box::new(Cursor::new(bytes.clone())),
        };
        Ok(LineReader::new(input))
    }
}

// ─── Line reader ─────────────────────────────────────────────────

/// Line-oriented reader that tracks 1-based line numbers for error reports.
pub struct LineReader {
    input: Box<dyn AmmoInput>,
    buf: Vec<u8>,
    line: u64,
}

impl LineReader {
    pub fn new(input: Box<dyn AmmoInput>) -> Self {
        Self {
            input,
            buf: Vec::new(),
            line: 0,
        }
    }

    /// Next line without its terminator, or `None` at end of input.
    /// A line that is not UTF-8 is a decode error carrying its number.
    pub async fn next_line(&mut self) -> Result<Option<(u64, &str)>> {
        self.buf.clear();
        let n = self
            .input
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(Error::SourceRead)?;
        if n == 0 {
            return Ok(None);
        }
        self.line += 1;
        let line = self.line;
        let text = std::str::from_utf8(&self.buf).map_err(|_| {
            let lossy = String::from_utf8_lossy(&self.buf);
            Error::decode(line, lossy.trim_end_matches(['\r', '\n']), "invalid UTF-8")
        })?;
        Ok(Some((line, text.trim_end_matches(['\r', '\n']))))
    }

    /// Reads exactly `len` raw bytes into `out`, replacing its contents.
    /// The buffer grows with the bytes actually read; a short input is
    /// `UnexpectedEof`.
    pub async fn read_block(&mut self, len: u64, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.clear();
        let read = (&mut self.input).take(len).read_to_end(out).await?;
        self.line += out.iter().filter(|&&b| b == b'\n').count() as u64;
        if (read as u64) < len {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }

    /// Back to the first byte of the input.
    pub async fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(SeekFrom::Start(0))
            .await
            .map_err(Error::SourceRead)?;
        self.line = 0;
        Ok(())
    }

    /// Number of the last line returned.
    pub fn line(&self) -> u64 {
        self.line
    }
}

// ─── Decoder ─────────────────────────────────────────────────────

/// Turns input lines into HTTP ammo.
#[async_trait]
pub trait Decoder: Send {
    /// Provider name used in logs and errors.
    const NAME: &'static str;

    /// Fills `ammo` in place from the next entry. `Ok(false)` at end of input.
    async fn decode(&mut self, input: &mut LineReader, ammo: &mut HttpAmmo) -> Result<bool>;

    /// Called at every pass boundary, after the input was rewound.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct FileSettings {
    /// Total ammo to emit, 0 = unbounded.
    pub limit: u64,
    /// Times to read the input, 0 = unbounded.
    pub passes: u64,
    pub chan_size: usize,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            limit: 0,
            passes: 0,
            chan_size: DEFAULT_AMMO_BUFFER,
        }
    }
}

// ─── Provider ────────────────────────────────────────────────────

/// Provider reading HTTP ammo from a file or an in-memory buffer with a
/// pluggable decoder.
pub struct FileProvider<D> {
    source: AmmoSource,
    settings: FileSettings,
    decoder: Mutex<Option<D>>,
    pool: Pool<HttpAmmo>,
    outlet: Outlet,
}

impl<D: Decoder> FileProvider<D> {
    pub fn new(source: AmmoSource, settings: FileSettings, decoder: D) -> Self {
        let chan_size = settings.chan_size.max(1);
        Self {
            source,
            settings,
            decoder: Mutex::new(Some(decoder)),
            pool: Pool::new(chan_size * 2 + 64),
            outlet: Outlet::new(chan_size),
        }
    }

    pub fn settings(&self) -> &FileSettings {
        &self.settings
    }

    fn limit_reached(&self, emitted: u64) -> bool {
        self.settings.limit > 0 && emitted >= self.settings.limit
    }
}

#[async_trait]
impl<D: Decoder + 'static> Provider for FileProvider<D> {
    fn kind(&self) -> AmmoKind {
        AmmoKind::Http
    }

    fn source(&self) -> AmmoReceiver {
        self.outlet.receiver()
    }

    fn release(&self, ammo: Box<dyn Ammo>) {
        if let Ok(ammo) = ammo.into_any().downcast::<HttpAmmo>() {
            self.pool.put(ammo);
        }
    }

    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let tx = self.outlet.take_sender(D::NAME)?;
        let mut decoder = self
            .decoder
            .lock()
            .take()
            .ok_or(Error::AlreadyRunning(D::NAME))?;
        let mut input = self.source.open().await?;

        let mut emitted = 0u64;
        let mut pass = 0u64;
        loop {
            let mut in_pass = 0u64;
            loop {
                if self.limit_reached(emitted) {
                    debug!(provider = D::NAME, emitted, "ammo limit reached");
                    return Ok(());
                }
                let mut ammo = self.pool.get();
                let more = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Ok(()),
                    decoded = decoder.decode(&mut input, &mut ammo) => decoded?,
                };
                if !more {
                    self.pool.put(ammo);
                    break;
                }
                if !emit(&tx, &ctx, ammo).await {
                    return Ok(());
                }
                emitted += 1;
                in_pass += 1;
            }

            if in_pass == 0 {
                if pass == 0 {
                    return Err(Error::EmptySource);
                }
                break;
            }
            pass += 1;
            if self.settings.passes > 0 && pass >= self.settings.passes {
                break;
            }
            input.rewind().await?;
            decoder.reset();
        }
        info!(provider = D::NAME, emitted, passes = pass, "ammo source exhausted");
        Ok(())
    }
}
