/// Bounded FIFO of input lines for buffered mode.
///
/// Lines are pushed as they arrive from stdin. Once the buffer holds
/// `capacity` lines, every push evicts the oldest line.
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RingBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl RingBuffer {
    /// Create an empty buffer. A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting from the front until the capacity holds again.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    /// Append every line from an iterator, in order.
    pub fn extend<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.push(line);
        }
    }

    /// Owned copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// The snapshot rendered as stdin bytes, one `\n`-terminated line each.
    pub fn to_input_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for line in self.snapshot() {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        bytes
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_below_capacity_keeps_everything() {
        let mut buf = RingBuffer::new(5);
        buf.push("a");
        buf.push("b");
        assert_eq!(buf.snapshot(), vec!["a", "b"]);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buf = RingBuffer::new(3);
        for line in ["a", "b", "c", "d"] {
            buf.push(line);
        }
        assert_eq!(buf.snapshot(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut buf = RingBuffer::new(4);
        for i in 0..100 {
            buf.push(format!("line {i}"));
            assert!(buf.len() <= 4);
        }
        assert_eq!(
            buf.snapshot(),
            vec!["line 96", "line 97", "line 98", "line 99"]
        );
    }

    #[test]
    fn test_snapshot_is_independent_of_later_pushes() {
        let mut buf = RingBuffer::new(2);
        buf.push("x");
        let snap = buf.snapshot();
        buf.push("y");
        buf.push("z");
        assert_eq!(snap, vec!["x"]);
        assert_eq!(buf.snapshot(), vec!["y", "z"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buf = RingBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.push("a");
        buf.push("b");
        assert_eq!(buf.snapshot(), vec!["b"]);
    }

    #[test]
    fn test_input_bytes_terminate_each_line() {
        let mut buf = RingBuffer::new(3);
        buf.extend(["ERROR one", "ok", "ERROR two"]);
        assert_eq!(buf.to_input_bytes(), b"ERROR one\nok\nERROR two\n".to_vec());
    }

    #[test]
    fn test_input_bytes_empty_buffer() {
        let buf = RingBuffer::new(3);
        assert!(buf.is_empty());
        assert!(buf.to_input_bytes().is_empty());
    }
}
