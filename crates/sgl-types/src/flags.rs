use bitflags::bitflags;

bitflags! {
    /// Flags word carried in every directory and segment stream header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamFlags: u16 {
        /// Stream holds a segment directory rather than a segment body.
        const DIRECTORY = 0x0001;
        /// Segment body uses the bit-packed compressed layout.
        const COMPRESSED = 0x0002;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bits_are_dropped_by_truncate() {
        let flags = StreamFlags::from_bits_truncate(0xFFFF);
        assert!(flags.contains(StreamFlags::DIRECTORY | StreamFlags::COMPRESSED));
        assert_eq!(flags.bits(), 0x0003);
        assert!(StreamFlags::from_bits(0x0004).is_none());
    }
}
