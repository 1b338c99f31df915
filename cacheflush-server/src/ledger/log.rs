use super::{LedgerError, Result};
use crate::core::FlushOperation;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Frame header: payload size (u64) + crc32 (u32)
const HEADER_LEN: usize = 12;

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Encode one operation as a framed log record
pub(crate) fn encode_frame(op: &FlushOperation) -> Result<Vec<u8>> {
    let data = bincode::serde::encode_to_vec(op, bincode_config())?;
    let checksum = crc32fast::hash(&data);

    let mut frame = Vec::with_capacity(HEADER_LEN + data.len());
    frame.extend_from_slice(&(data.len() as u64).to_be_bytes());
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

/// Decode every complete, valid frame in `buf`.
///
/// Returns the operations and the length of the valid prefix. Decoding stops
/// at the first torn or corrupted frame.
pub(crate) fn decode_frames(buf: &[u8]) -> (Vec<FlushOperation>, usize) {
    let mut ops = Vec::new();
    let mut pos = 0usize;

    while buf.len() - pos >= HEADER_LEN {
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&buf[pos..pos + 8]);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&buf[pos + 8..pos + HEADER_LEN]);

        let size = u64::from_be_bytes(size_bytes) as usize;
        let expected = u32::from_be_bytes(crc_bytes);
        let start = pos + HEADER_LEN;

        if buf.len() - start < size {
            warn!("Incomplete ledger entry at byte {}", pos);
            break;
        }

        let data = &buf[start..start + size];
        let actual = crc32fast::hash(data);
        if actual != expected {
            warn!(
                "Ledger checksum mismatch at byte {}: expected {}, got {}",
                pos, expected, actual
            );
            break;
        }

        match bincode::serde::decode_from_slice::<FlushOperation, _>(data, bincode_config()) {
            Ok((op, _)) => ops.push(op),
            Err(e) => {
                warn!("Corrupted ledger entry at byte {}: {}", pos, e);
                break;
            }
        }

        pos = start + size;
    }

    (ops, pos)
}

/// Append-only ledger file
pub struct LedgerLog {
    file: BufWriter<File>,
    path: PathBuf,
    fsync: bool,
}

impl LedgerLog {
    /// Open (or create) the log and replay its entries
    pub async fn open(path: impl AsRef<Path>, fsync: bool) -> Result<(Self, Vec<FlushOperation>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let buf = match tokio::fs::read(&path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (ops, valid_len) = decode_frames(&buf);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if valid_len < buf.len() {
            warn!(
                "Truncating ledger {:?} from {} to {} bytes",
                path,
                buf.len(),
                valid_len
            );
            file.set_len(valid_len as u64).await?;
        }

        info!("Ledger opened at {:?}, {} operations replayed", path, ops.len());

        Ok((
            Self {
                file: BufWriter::new(file),
                path,
                fsync,
            },
            ops,
        ))
    }

    /// Append one operation
    pub async fn append(&mut self, op: &FlushOperation) -> Result<()> {
        let frame = encode_frame(op)?;
        debug!(
            "Ledger append: operation={}, size={}",
            op.operation_id,
            frame.len()
        );

        self.file.write_all(&frame).await?;
        self.file.flush().await?;
        if self.fsync {
            self.file.get_ref().sync_all().await?;
        }
        Ok(())
    }

    /// Replace the log contents with `ops`
    pub async fn rewrite(&mut self, ops: &[FlushOperation]) -> Result<()> {
        let tmp_path = self.path.with_extension("ledger.new");
        let tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        let mut writer = BufWriter::new(tmp);

        for op in ops {
            writer.write_all(&encode_frame(op)?).await?;
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        // Open the append handle before the rename; it follows the inode, and a
        // failure here leaves the current log and handle untouched
        let file = OpenOptions::new().append(true).open(&tmp_path).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        self.file = BufWriter::new(file);

        info!("Ledger {:?} rewritten with {} operations", self.path, ops.len());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(e: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(e: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
