use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use std::io::{Error, ErrorKind, Read, Result, Write};

/// Writing half of an in-memory byte pipe. Every `write` becomes one chunk.
pub struct CrossbeamSender(Sender<Vec<u8>>);

/// Reading half of an in-memory byte pipe.
///
/// `read` blocks until at least one byte is available and then drains whatever else is
/// already queued, so short reads never stall on a quiet sender.
pub struct CrossbeamReceiver {
    inner: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl Write for CrossbeamSender {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.0
            .send(buf.to_vec())
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "receiving half was dropped"))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl CrossbeamReceiver {
    fn buffered(&self) -> &[u8] {
        &self.pending[self.offset..]
    }

    fn refill(&mut self, chunk: Vec<u8>) {
        self.pending = chunk;
        self.offset = 0;
    }
}

impl Read for CrossbeamReceiver {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.buffered().is_empty() {
            match self.inner.recv() {
                Ok(chunk) => self.refill(chunk),
                Err(_) => {
                    return Err(Error::new(
                        ErrorKind::BrokenPipe,
                        "sending half was dropped",
                    ))
                }
            }
        }

        let mut written = 0;
        loop {
            let avail = self.buffered();
            let n = avail.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&avail[..n]);
            self.offset += n;
            written += n;

            if written == buf.len() {
                break;
            }
            match self.inner.try_recv() {
                Ok(chunk) => self.refill(chunk),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        Ok(written)
    }
}

/// An unbounded in-memory pipe.
pub fn cbch_pair() -> (CrossbeamSender, CrossbeamReceiver) {
    let (s, r) = unbounded();
    (
        CrossbeamSender(s),
        CrossbeamReceiver {
            inner: r,
            pending: Vec::new(),
            offset: 0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::{AbstractChannel, SyncChannel};

    #[test]
    fn test() {
        let (mut s1, mut r1) = cbch_pair();

        let handle = std::thread::spawn(move || {
            let mut v = vec![0u8; 5];
            r1.read_exact(&mut v).unwrap();
            assert_eq!(v, [1, 2, 3, 4, 5]);
        });

        s1.write_all(&[1, 2]).unwrap();
        s1.write_all(&[3, 4, 5]).unwrap();

        handle.join().unwrap();
    }

    #[test]
    fn test_partial_chunks() {
        let (mut s1, mut r1) = cbch_pair();

        s1.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();

        let mut v = [0u8; 4];
        r1.read_exact(&mut v).unwrap();
        assert_eq!(v, [1, 2, 3, 4]);
        let mut v = [0u8; 2];
        r1.read_exact(&mut v).unwrap();
        assert_eq!(v, [5, 6]);
    }

    #[test]
    fn test_broken_pipe() {
        let (mut s1, mut r1) = cbch_pair();

        let handle = std::thread::spawn(move || {
            let mut v = vec![0u8; 3];
            r1.read_exact(&mut v).unwrap();
            assert_eq!(v, [1, 2, 3]);

            let mut v = vec![0u8; 3];
            let e = r1.read_exact(&mut v).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::BrokenPipe);
        });

        s1.write_all(&[1, 2, 3]).unwrap();
        drop(s1);

        handle.join().unwrap();
    }

    #[test]
    fn test_channel() {
        let (s1, r1) = cbch_pair();
        let (s2, r2) = cbch_pair();
        let mut ch1 = SyncChannel::new(r1, s2);
        let mut ch2 = SyncChannel::new(r2, s1);

        let handle = std::thread::spawn(move || {
            let n = ch1.read_u32().unwrap();
            assert_eq!(n, 123);
            ch1.write_u32(n * 2).unwrap();
            ch1.flush().unwrap();
        });

        let n = 123;
        ch2.write_u32(n).unwrap();
        ch2.flush().unwrap();
        let n = ch2.read_u32().unwrap();
        assert_eq!(n, 246);

        handle.join().unwrap();
    }
}
