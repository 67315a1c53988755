use super::{opcode, ControlMessage, FileEntry, MAX_CONTROL_LEN, MAX_LIST_ENTRIES};
use crate::{Error, Result};

/// Outcome of decoding the front of a byte buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A whole message occupying the first `consumed` bytes.
    Message {
        message: ControlMessage,
        consumed: usize,
    },
    /// The buffer holds a valid prefix; at least `at_least` more bytes are needed.
    /// Reading exactly that many never reads past the end of the message.
    NeedMoreData { at_least: usize },
}

/// Encode a control message into its wire form.
pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    out.push(msg.opcode());

    match msg {
        ControlMessage::List
        | ControlMessage::Ping
        | ControlMessage::Quit
        | ControlMessage::Ready
        | ControlMessage::Pong
        | ControlMessage::Bye => {}
        ControlMessage::GetInfo { name } | ControlMessage::Get { name } => {
            put_str(&mut out, name)?;
        }
        ControlMessage::Put { name, size } => {
            put_str(&mut out, name)?;
            out.extend_from_slice(&size.to_be_bytes());
        }
        ControlMessage::FileList { entries } => {
            if entries.len() > MAX_LIST_ENTRIES {
                return Err(Error::Malformed(format!(
                    "file list has {} entries (max {})",
                    entries.len(),
                    MAX_LIST_ENTRIES
                )));
            }
            out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
            for entry in entries {
                put_str(&mut out, &entry.name)?;
                out.extend_from_slice(&entry.size.to_be_bytes());
                out.extend_from_slice(&entry.modified.to_be_bytes());
            }
        }
        ControlMessage::FileInfo { size, modified } => {
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(&modified.to_be_bytes());
        }
        ControlMessage::Ack { received } => {
            out.extend_from_slice(&received.to_be_bytes());
        }
        ControlMessage::Error { reason } => {
            put_str(&mut out, reason)?;
        }
    }

    if out.len() > MAX_CONTROL_LEN {
        return Err(Error::Malformed(format!(
            "{} encodes to {} bytes (max {})",
            msg.kind(),
            out.len(),
            MAX_CONTROL_LEN
        )));
    }
    Ok(out)
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::Malformed(format!("string field too long ({} bytes)", s.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Decode the control message at the front of `buf`.
///
/// Never inspects bytes beyond the message itself, so trailing payload is left untouched.
pub fn decode_control(buf: &[u8]) -> Result<Decoded> {
    let mut r = Reader { buf, pos: 0 };
    match r.message() {
        Ok(message) => Ok(Decoded::Message {
            message,
            consumed: r.pos,
        }),
        Err(Fault::Short(at_least)) => Ok(Decoded::NeedMoreData { at_least }),
        Err(Fault::Bad(e)) => Err(e),
    }
}

/// Incremental decoder that owns the bytes of one control message as they arrive.
///
/// Unlike repeated [`decode_control`] calls, a file list is never re-parsed from the start:
/// completed entries are kept and decoding resumes after the last one.
#[derive(Debug, Default)]
pub struct ControlDecoder {
    buf: Vec<u8>,
    list: Option<PartialList>,
}

#[derive(Debug)]
struct PartialList {
    count: usize,
    entries: Vec<FileEntry>,
    /// Offset just past the last complete entry
    pos: usize,
}

impl ControlDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received so far.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Grow the buffer by `n` zeroed bytes and return them for the caller to fill.
    pub fn reserve(&mut self, n: usize) -> &mut [u8] {
        let start = self.buf.len();
        self.buf.resize(start + n, 0);
        &mut self.buf[start..]
    }

    /// Append already received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Same contract as [`decode_control`] over everything fed so far.
    pub fn decode(&mut self) -> Result<Decoded> {
        if self.list.is_none() {
            if self.buf.first() != Some(&opcode::LIST_RESULT) {
                return decode_control(&self.buf);
            }
            let mut r = Reader {
                buf: &self.buf,
                pos: 1,
            };
            let count = match r.list_count() {
                Ok(count) => count,
                Err(Fault::Short(at_least)) => return Ok(Decoded::NeedMoreData { at_least }),
                Err(Fault::Bad(e)) => return Err(e),
            };
            self.list = Some(PartialList {
                count,
                entries: Vec::with_capacity(count.min(1024)),
                pos: r.pos,
            });
        }

        let Some(list) = self.list.as_mut() else {
            return decode_control(&self.buf);
        };
        let mut r = Reader {
            buf: &self.buf,
            pos: list.pos,
        };
        while list.entries.len() < list.count {
            match r.entry() {
                Ok(entry) => {
                    list.entries.push(entry);
                    list.pos = r.pos;
                }
                Err(Fault::Short(at_least)) => return Ok(Decoded::NeedMoreData { at_least }),
                Err(Fault::Bad(e)) => return Err(e),
            }
        }

        let consumed = list.pos;
        let entries = std::mem::take(&mut list.entries);
        self.list = None;
        Ok(Decoded::Message {
            message: ControlMessage::FileList { entries },
            consumed,
        })
    }
}

enum Fault {
    Short(usize),
    Bad(Error),
}

type Step<T> = std::result::Result<T, Fault>;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Step<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if available < n {
            return Err(Fault::Short(n - available));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Step<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Step<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Step<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(b))
    }

    fn u64(&mut self) -> Step<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(b))
    }

    fn string(&mut self) -> Step<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Fault::Bad(Error::Malformed("string field is not UTF-8".into())))
    }

    fn list_count(&mut self) -> Step<usize> {
        let count = self.u32()? as usize;
        if count > MAX_LIST_ENTRIES {
            return Err(Fault::Bad(Error::Malformed(format!(
                "file list claims {} entries (max {})",
                count, MAX_LIST_ENTRIES
            ))));
        }
        Ok(count)
    }

    fn entry(&mut self) -> Step<FileEntry> {
        Ok(FileEntry {
            name: self.string()?,
            size: self.u64()?,
            modified: self.u64()?,
        })
    }

    fn message(&mut self) -> Step<ControlMessage> {
        let op = self.u8()?;
        let msg = match op {
            opcode::LIST => ControlMessage::List,
            opcode::INFO => ControlMessage::GetInfo {
                name: self.string()?,
            },
            opcode::GET => ControlMessage::Get {
                name: self.string()?,
            },
            opcode::PUT => ControlMessage::Put {
                name: self.string()?,
                size: self.u64()?,
            },
            opcode::PING => ControlMessage::Ping,
            opcode::QUIT => ControlMessage::Quit,
            opcode::LIST_RESULT => {
                let count = self.list_count()?;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    entries.push(self.entry()?);
                }
                ControlMessage::FileList { entries }
            }
            opcode::INFO_RESULT => ControlMessage::FileInfo {
                size: self.u64()?,
                modified: self.u64()?,
            },
            opcode::READY => ControlMessage::Ready,
            opcode::ACK => ControlMessage::Ack {
                received: self.u64()?,
            },
            opcode::ERROR => ControlMessage::Error {
                reason: self.string()?,
            },
            opcode::PONG => ControlMessage::Pong,
            opcode::BYE => ControlMessage::Bye,
            other => return Err(Fault::Bad(Error::UnknownOpcode(other))),
        };
        Ok(msg)
    }
}
