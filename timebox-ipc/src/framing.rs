//! Frames on the supervisor/worker pipes.
//!
//! Each frame is a little-endian `u32` payload length followed by an rkyv
//! archive of the message. Archives are validated before they are
//! deserialized; a worker that scribbles on its pipe cannot crash the
//! supervisor.

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use thiserror::Error;

/// Largest accepted payload. Messages carry fault text, never bulk data.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;
const PIPE_BUFFER: usize = 8 * 1024;

/// Framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The pipe itself failed
    #[error("pipe I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The message could not be archived
    #[error("cannot encode message: {0}")]
    Encode(String),

    /// The payload is not a valid archive of the expected type
    #[error("cannot decode message: {0}")]
    Decode(String),

    /// Announced or produced payload exceeds [`MAX_FRAME_SIZE`]
    #[error("frame of {len} bytes exceeds the {} byte limit", MAX_FRAME_SIZE)]
    Oversized {
        /// Payload length
        len: usize,
    },

    /// A header announcing an empty payload
    #[error("empty frame")]
    Empty,

    /// The peer closed the pipe in the middle of a frame
    #[error("stream ended inside a frame")]
    Truncated,

    /// The peer closed the pipe on a frame boundary
    #[error("end of stream")]
    EndOfStream,
}

fn encode<T>(message: &T) -> Result<AlignedVec, FrameError>
where
    T: Serialize<AllocSerializer<256>>,
{
    let payload =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Encode(e.to_string()))?;
    match payload.len() {
        0 => Err(FrameError::Empty),
        len if len > MAX_FRAME_SIZE => Err(FrameError::Oversized { len }),
        _ => Ok(payload),
    }
}

fn decode<T>(payload: &[u8]) -> Result<T, FrameError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let archived =
        rkyv::check_archived_root::<T>(payload).map_err(|e| FrameError::Decode(e.to_string()))?;
    archived
        .deserialize(&mut Infallible)
        .map_err(|_| FrameError::Decode("deserializer failed".to_string()))
}

/// Sends framed messages. Every message is flushed immediately because the
/// peer is usually blocked waiting for it.
pub struct FrameWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a pipe or any other byte sink.
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::with_capacity(PIPE_BUFFER, inner),
        }
    }

    /// Frame and flush `message`.
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        let payload = encode(message)?;
        self.inner.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.inner.write_all(&payload)?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Receives framed messages, reusing one aligned buffer for payloads.
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
    payload: AlignedVec,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a pipe or any other byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::with_capacity(PIPE_BUFFER, inner),
            payload: AlignedVec::new(),
        }
    }

    /// Bytes of the next frame are already buffered, so polling the
    /// underlying fd could block even though a message is ready.
    pub fn has_buffered_data(&self) -> bool {
        !self.inner.buffer().is_empty()
    }

    /// Read the next message.
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        let len = match self.read_header()? {
            0 => return Err(FrameError::Empty),
            len if len > MAX_FRAME_SIZE => return Err(FrameError::Oversized { len }),
            len => len,
        };

        self.payload.clear();
        self.payload.resize(len, 0);
        self.inner.read_exact(&mut self.payload).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => FrameError::Truncated,
            _ => FrameError::Io(e),
        })?;
        decode(&self.payload)
    }

    fn read_header(&mut self) -> Result<usize, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let available = match self.inner.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if available.is_empty() {
                return Err(if filled == 0 {
                    FrameError::EndOfStream
                } else {
                    FrameError::Truncated
                });
            }
            let take = available.len().min(HEADER_LEN - filled);
            header[filled..filled + take].copy_from_slice(&available[..take]);
            self.inner.consume(take);
            filled += take;
        }
        Ok(u32::from_le_bytes(header) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SupervisorCommand, WorkerMessage};
    use std::io::Cursor;

    fn framed<T: Serialize<AllocSerializer<256>>>(messages: &[T]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut writer = FrameWriter::new(&mut bytes);
        for message in messages {
            writer.write(message).unwrap();
        }
        drop(writer);
        bytes
    }

    #[test]
    fn test_commands_arrive_in_order() {
        let bytes = framed(&[
            SupervisorCommand::Perform {
                set: "sorting".to_string(),
                case: 3,
                stack_mib: 16,
            },
            SupervisorCommand::Shutdown,
        ]);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        match reader.read::<SupervisorCommand>().unwrap() {
            SupervisorCommand::Perform {
                set,
                case,
                stack_mib,
            } => assert_eq!((set.as_str(), case, stack_mib), ("sorting", 3, 16)),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            reader.read::<SupervisorCommand>().unwrap(),
            SupervisorCommand::Shutdown
        ));
        assert!(matches!(
            reader.read::<SupervisorCommand>(),
            Err(FrameError::EndOfStream)
        ));
    }

    #[test]
    fn test_fault_text_is_preserved() {
        let bytes = framed(&[WorkerMessage::Raised {
            kind: "divide-by-zero".to_string(),
            message: "attempt to divide by zero".to_string(),
            elapsed_nanos: 1_500,
        }]);

        match FrameReader::new(Cursor::new(bytes)).read::<WorkerMessage>().unwrap() {
            WorkerMessage::Raised {
                kind,
                message,
                elapsed_nanos,
            } => {
                assert_eq!(kind, "divide-by-zero");
                assert_eq!(message, "attempt to divide by zero");
                assert_eq!(elapsed_nanos, 1_500);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_cut_off_frames_are_truncated() {
        let mut bytes = framed(&[SupervisorCommand::Shutdown]);
        bytes.pop();
        let result = FrameReader::new(Cursor::new(bytes)).read::<SupervisorCommand>();
        assert!(matches!(result, Err(FrameError::Truncated)));

        let result = FrameReader::new(Cursor::new(vec![7u8, 0])).read::<SupervisorCommand>();
        assert!(matches!(result, Err(FrameError::Truncated)));
    }

    #[test]
    fn test_bad_headers_are_rejected() {
        let oversized = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes().to_vec();
        let result = FrameReader::new(Cursor::new(oversized)).read::<WorkerMessage>();
        assert!(matches!(result, Err(FrameError::Oversized { .. })));

        let result = FrameReader::new(Cursor::new(vec![0u8; 4])).read::<WorkerMessage>();
        assert!(matches!(result, Err(FrameError::Empty)));
    }

    #[test]
    fn test_garbage_payload_fails_validation() {
        let mut bytes = 8u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff; 8]);
        let result = FrameReader::new(Cursor::new(bytes)).read::<WorkerMessage>();
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }
}
