type SequenceNumberInnerType = u16;

/// Wire sequence number of an echo probe. Sessions count probes in 64 bits
/// and fold them onto the 16-bit field, so long runs wrap.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct SequenceNumber(pub SequenceNumberInnerType);

impl SequenceNumber {
    #[must_use]
    pub fn from_probe_index(index: u64) -> SequenceNumber {
        #[allow(clippy::cast_possible_truncation)]
        SequenceNumber((index & 0xFFFF) as SequenceNumberInnerType)
    }

    /// True when `self` directly succeeds `prev`, wrap included. Replies
    /// that break this ordering arrived out of order.
    #[must_use]
    pub fn follows(self, prev: SequenceNumber) -> bool {
        self.0 == prev.0.wrapping_add(1)
    }
}

impl From<SequenceNumberInnerType> for SequenceNumber {
    fn from(value: SequenceNumberInnerType) -> Self {
        SequenceNumber(value)
    }
}

impl From<SequenceNumber> for SequenceNumberInnerType {
    fn from(value: SequenceNumber) -> Self {
        value.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
