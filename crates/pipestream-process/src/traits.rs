use crate::error::Result;

/// Byte-level access to a live child, as used by the wire codecs.
///
/// [`ChildProcess`](crate::ChildProcess) is the production implementation;
/// codecs are written against this trait so they can be exercised with
/// in-memory fakes.
pub trait ChildIo {
    /// Read whatever is available, at most `buf.len()` bytes.
    ///
    /// Blocks until at least one byte arrives and returns the count, which is
    /// always non-zero for a non-empty `buf`. With `check_liveness` set, a
    /// child that has already exited is reported as an error even if it left
    /// data behind; clear it only for the final exchange.
    fn soft_read(&mut self, buf: &mut [u8], check_liveness: bool) -> Result<usize>;

    /// Fill `buf` completely.
    fn hard_read(&mut self, buf: &mut [u8], check_liveness: bool) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            filled += self.soft_read(&mut buf[filled..], check_liveness)?;
        }
        Ok(())
    }

    /// Write all of `buf`, or fail.
    fn hard_write(&mut self, buf: &[u8]) -> Result<()>;

    /// True while the child is believed to be running.
    fn is_alive(&self) -> bool;
}

impl<T: ChildIo + ?Sized> ChildIo for &mut T {
    fn soft_read(&mut self, buf: &mut [u8], check_liveness: bool) -> Result<usize> {
        (**self).soft_read(buf, check_liveness)
    }

    fn hard_read(&mut self, buf: &mut [u8], check_liveness: bool) -> Result<()> {
        (**self).hard_read(buf, check_liveness)
    }

    fn hard_write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).hard_write(buf)
    }

    fn is_alive(&self) -> bool {
        (**self).is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out one byte per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        liveness_checks: usize,
    }

    impl ChildIo for Trickle {
        fn soft_read(&mut self, buf: &mut [u8], check_liveness: bool) -> Result<usize> {
            if check_liveness {
                self.liveness_checks += 1;
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }

        fn hard_write(&mut self, _buf: &[u8]) -> Result<()> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    #[test]
    fn hard_read_loops_over_partial_reads() {
        let mut io = Trickle {
            data: b"abcdef".to_vec(),
            pos: 0,
            liveness_checks: 0,
        };
        let mut buf = [0u8; 4];
        io.hard_read(&mut buf, true).unwrap();
        assert_eq!(&buf, b"abcd");
        assert_eq!(io.liveness_checks, 4);

        let mut rest = [0u8; 2];
        io.hard_read(&mut rest, false).unwrap();
        assert_eq!(&rest, b"ef");
        assert_eq!(io.liveness_checks, 4);
    }

    #[test]
    fn hard_read_of_nothing_reads_nothing() {
        let mut io = Trickle {
            data: Vec::new(),
            pos: 0,
            liveness_checks: 0,
        };
        io.hard_read(&mut [], true).unwrap();
        assert_eq!(io.pos, 0);
    }
}
