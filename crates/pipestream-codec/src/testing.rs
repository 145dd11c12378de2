use std::io;

use pipestream_process::{ChildIo, Direction, ExitKind, ProcessError};

/// In-memory stand-in for a child: replays `input`, records writes.
pub(crate) struct ScriptedIo {
    input: Vec<u8>,
    pos: usize,
    max_read: usize,
    written: Vec<u8>,
    writes: usize,
    alive: bool,
    liveness_checks: usize,
}

impl ScriptedIo {
    pub(crate) fn new(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            pos: 0,
            max_read: usize::MAX,
            written: Vec::new(),
            writes: 0,
            alive: true,
            liveness_checks: 0,
        }
    }

    pub(crate) fn byte_by_byte(self) -> Self {
        self.chunked(1)
    }

    pub(crate) fn chunked(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    pub(crate) fn dead(mut self) -> Self {
        self.alive = false;
        self
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.written
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes
    }

    pub(crate) fn liveness_checks(&self) -> usize {
        self.liveness_checks
    }

    pub(crate) fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }
}

impl ChildIo for ScriptedIo {
    fn soft_read(&mut self, buf: &mut [u8], check_liveness: bool) -> pipestream_process::Result<usize> {
        if check_liveness {
            self.liveness_checks += 1;
            if !self.alive {
                return Err(ProcessError::ChildDied {
                    direction: Direction::Read,
                    kind: ExitKind::Regular(0),
                });
            }
        }
        if self.pos == self.input.len() {
            return Err(ProcessError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "script exhausted",
            )));
        }
        let n = buf.len().min(self.max_read).min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn hard_write(&mut self, buf: &[u8]) -> pipestream_process::Result<()> {
        if !self.alive {
            return Err(ProcessError::ChildDied {
                direction: Direction::Write,
                kind: ExitKind::Regular(0),
            });
        }
        self.written.extend_from_slice(buf);
        self.writes += 1;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}
