// Bounded output capture shared by the sandbox backends

use tokio::io::{AsyncRead, AsyncReadExt};

/// Output collected up to a byte cap. Bytes past the cap are dropped and
/// `truncated` is set, so partial output is never mistaken for complete output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
    cap: usize,
}

impl Captured {
    pub fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            truncated: false,
            cap,
        }
    }

    /// Output whose reader never reached EOF; flagged so it is never judged
    pub fn incomplete(cap: usize) -> Self {
        Self {
            truncated: true,
            ..Self::new(cap)
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy UTF-8 conversion plus the truncation flag
    pub fn into_parts(self) -> (String, bool) {
        (String::from_utf8_lossy(&self.bytes).into_owned(), self.truncated)
    }
}

/// Drain a pipe to EOF, keeping at most `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
pub async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> Captured {
    let mut captured = Captured::new(cap);
    let Some(mut reader) = reader else {
        return captured;
    };

    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => captured.push(&buf[..n]),
            Err(_) => break,
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_is_flagged() {
        let captured = Captured::incomplete(10);
        assert!(captured.is_empty());
        assert_eq!(captured.into_parts(), (String::new(), true));
    }

    #[test]
    fn test_push_within_cap() {
        let mut captured = Captured::new(10);
        captured.push(b"hello");
        captured.push(b"\n");
        assert_eq!(captured.len(), 6);
        assert!(!captured.is_truncated());
        assert_eq!(captured.into_parts(), ("hello\n".to_string(), false));
    }

    #[test]
    fn test_push_past_cap_truncates() {
        let mut captured = Captured::new(4);
        captured.push(b"abc");
        captured.push(b"defg");
        captured.push(b"h");
        assert_eq!(captured.into_parts(), ("abcd".to_string(), true));
    }

    #[test]
    fn test_exact_cap_is_not_truncated() {
        let mut captured = Captured::new(3);
        captured.push(b"abc");
        assert!(!captured.is_truncated());
        captured.push(b"");
        assert!(!captured.is_truncated());
    }

    #[tokio::test]
    async fn test_read_bounded_drains_everything() {
        let data = vec![b'x'; 100_000];
        let captured = read_bounded(Some(&data[..]), 1024).await;
        assert_eq!(captured.len(), 1024);
        assert!(captured.is_truncated());
    }

    #[tokio::test]
    async fn test_read_bounded_without_pipe() {
        let captured = read_bounded(None::<&[u8]>, 16).await;
        assert!(captured.is_empty());
        assert!(!captured.is_truncated());
    }
}
