// SDB - CLR Snapshot Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The framed breakpoint pipe.
//!
//! The reader process owns the pipe endpoint (a Unix-domain socket here).
//! The agent connects twice, once for the inbound breakpoint stream and once
//! for outbound snapshots, so the two directions have independent
//! lifetimes. Each message is framed as a start-marker line, a decimal
//! payload-length line, the serde_json payload, a newline, and an end-marker
//! line.

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::Shutdown,
    os::unix::net::UnixStream,
    path::Path,
};

use tracing::debug;

use sdb_common::{BreakpointRequest, Snapshot};

use crate::{
    breakpoints::SnapshotSink,
    error::{Error, Result},
};

/// Line marking the start of a framed message.
pub const START_MESSAGE_MARKER: &str = "START_DEBUG_MESSAGE";
/// Line marking the end of a framed message.
pub const END_MESSAGE_MARKER: &str = "END_DEBUG_MESSAGE";

/// Upper bound on a framed payload, a basic sanity check against a
/// desynchronized stream.
const MAXIMUM_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Writes one framed message to a stream.
fn write_frame(stream: &mut impl Write, payload: &[u8]) -> Result<()> {
    stream.write_all(START_MESSAGE_MARKER.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.write_all(payload.len().to_string().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.write_all(payload)?;
    stream.write_all(b"\n")?;
    stream.write_all(END_MESSAGE_MARKER.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Reads one framed payload. `Ok(None)` on a clean end of stream.
fn read_frame(reader: &mut impl BufRead) -> Result<Option<Vec<u8>>> {
    // Scan for the start marker, tolerating noise between frames.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.trim_end() == START_MESSAGE_MARKER {
            break;
        }
    }

    let mut length_line = String::new();
    if reader.read_line(&mut length_line)? == 0 {
        return Err(unexpected_eof());
    }
    let length: usize = length_line
        .trim_end()
        .parse()
        .map_err(|_| Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid frame length {length_line:?}"),
        )))?;
    if length > MAXIMUM_PAYLOAD_SIZE {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {length} exceeds the payload limit"),
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).map_err(Error::Io)?;

    let mut trailer = String::new();
    reader.read_line(&mut trailer)?; // newline after payload
    let mut end_line = String::new();
    if reader.read_line(&mut end_line)? == 0 || end_line.trim_end() != END_MESSAGE_MARKER {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "missing end-of-message marker",
        )));
    }

    Ok(Some(payload))
}

fn unexpected_eof() -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "pipe closed mid-frame"))
}

/// The inbound breakpoint stream.
pub struct PipeReader {
    reader: BufReader<UnixStream>,
    raw: UnixStream,
}

impl PipeReader {
    /// Connects to the reader process's pipe.
    pub fn connect(pipe_name: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(pipe_name.as_ref())?;
        let raw = stream.try_clone()?;
        debug!(pipe = %pipe_name.as_ref().display(), "connected breakpoint read pipe");
        Ok(Self { reader: BufReader::new(stream), raw })
    }

    /// Reads the next breakpoint request. `Ok(None)` on end of stream.
    pub fn read_request(&mut self) -> Result<Option<BreakpointRequest>> {
        let Some(payload) = read_frame(&mut self.reader)? else {
            return Ok(None);
        };
        let request = serde_json::from_slice(&payload).map_err(|e| {
            Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        Ok(Some(request))
    }

    /// A handle that can unblock the read loop from another thread.
    pub fn cancellation_handle(&self) -> Result<PipeCancellation> {
        Ok(PipeCancellation { stream: self.raw.try_clone()? })
    }
}

impl Iterator for PipeReader {
    type Item = Result<BreakpointRequest>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_request().transpose()
    }
}

/// Shuts down the read side of the pipe, cancelling `sync_breakpoints`.
pub struct PipeCancellation {
    stream: UnixStream,
}

impl PipeCancellation {
    /// Unblocks the reader.
    pub fn cancel(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Read)?;
        Ok(())
    }
}

/// The outbound snapshot stream.
pub struct PipeWriter {
    stream: UnixStream,
}

impl PipeWriter {
    /// Connects to the reader process's pipe.
    pub fn connect(pipe_name: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(pipe_name.as_ref())?;
        debug!(pipe = %pipe_name.as_ref().display(), "connected snapshot write pipe");
        Ok(Self { stream })
    }

    /// Writes one snapshot frame.
    pub fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let payload = serde_json::to_vec(snapshot).map_err(|e| {
            Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        write_frame(&mut self.stream, &payload)
    }
}

impl SnapshotSink for PipeWriter {
    fn write(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.write_snapshot(snapshot)
    }
}

/// Serializes one request the way the reader side frames it; used by tests
/// and tooling.
pub fn write_request(stream: &mut impl Write, request: &BreakpointRequest) -> Result<()> {
    let payload = serde_json::to_vec(request)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    write_frame(stream, &payload)
}

/// Reads one snapshot frame; the reader side of the snapshot stream.
pub fn read_snapshot(reader: &mut impl BufRead) -> Result<Option<Snapshot>> {
    let Some(payload) = read_frame(reader)? else { return Ok(None) };
    let snapshot = serde_json::from_slice(&payload)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"{\"id\":\"b-1\"}").unwrap();

        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("START_DEBUG_MESSAGE\n12\n"));
        assert!(text.ends_with("END_DEBUG_MESSAGE\n"));

        let mut cursor = Cursor::new(buffer);
        let payload = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(payload, b"{\"id\":\"b-1\"}");
    }

    #[test]
    fn test_read_frame_eof() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_read_frame_skips_noise() {
        let mut buffer = b"garbage line\n".to_vec();
        write_frame(&mut buffer, b"x").unwrap();
        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"x");
    }

    #[test]
    fn test_read_frame_bad_length() {
        let data = b"START_DEBUG_MESSAGE\nnot-a-number\n".to_vec();
        let mut cursor = Cursor::new(data);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_request_roundtrip_through_frame() {
        let request = BreakpointRequest {
            id: "b-7".to_string(),
            activated: true,
            ..Default::default()
        };
        let mut buffer = Vec::new();
        write_request(&mut buffer, &request).unwrap();

        let mut cursor = Cursor::new(buffer);
        let payload = read_frame(&mut cursor).unwrap().unwrap();
        let back: BreakpointRequest = serde_json::from_slice(&payload).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_snapshot_roundtrip_through_frame() {
        let snapshot = Snapshot { id: "b-7".to_string(), ..Default::default() };
        let mut buffer = Vec::new();
        let mut writer_buffer = Vec::new();
        write_frame(&mut writer_buffer, &serde_json::to_vec(&snapshot).unwrap()).unwrap();
        buffer.extend_from_slice(&writer_buffer);

        let mut cursor = Cursor::new(buffer);
        let back = read_snapshot(&mut cursor).unwrap().unwrap();
        assert_eq!(back, snapshot);
    }
}
