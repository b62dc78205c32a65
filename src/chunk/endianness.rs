use derive_more::Display;

/// The byte order of the unsigned 16-bit samples in a serialised cell, either `big` or `little`.
///
/// Cells always go over the wire as [`Endianness::Big`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum Endianness {
    /// Little endian.
    Little,

    /// Big endian.
    Big,
}

impl Endianness {
    /// Serialise `samples` with this byte order.
    #[must_use]
    pub fn encode_u16(self, samples: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        match self {
            Self::Big => samples
                .iter()
                .for_each(|sample| bytes.extend_from_slice(&sample.to_be_bytes())),
            Self::Little => samples
                .iter()
                .for_each(|sample| bytes.extend_from_slice(&sample.to_le_bytes())),
        }
        bytes
    }

    /// Deserialise `bytes` with this byte order.
    ///
    /// Returns [`None`] if `bytes` has an odd length.
    #[must_use]
    pub fn decode_u16(self, bytes: &[u8]) -> Option<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return None;
        }
        let chunks = bytes.chunks_exact(2).map(|pair| [pair[0], pair[1]]);
        Some(match self {
            Self::Big => chunks.map(u16::from_be_bytes).collect(),
            Self::Little => chunks.map(u16::from_le_bytes).collect(),
        })
    }
}
