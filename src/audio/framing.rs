//! Aufteilung von PCM-Puffern in Blöcke fester Größe

/// Teilt `buffer` in volle Frames und einen Rest
pub fn frame(buffer: &[i16], frame_samples: usize) -> (Vec<Vec<i16>>, Vec<i16>) {
    if frame_samples == 0 {
        return (Vec::new(), buffer.to_vec());
    }
    let chunks = buffer.chunks_exact(frame_samples);
    let remainder = chunks.remainder().to_vec();
    (chunks.map(|c| c.to_vec()).collect(), remainder)
}

/// Dekodiert Little-Endian 16-bit PCM (ein ungerades Byte wird ignoriert)
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Framer mit Restpuffer über mehrere Aufrufe hinweg
///
/// Übrig gebliebene Samples werden dem nächsten Aufruf vorangestellt.
#[derive(Debug, Clone)]
pub struct PcmFramer {
    frame_samples: usize,
    pending: Vec<i16>,
    odd_byte: Option<u8>,
}

impl PcmFramer {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending: Vec::new(),
            odd_byte: None,
        }
    }

    /// Hängt Samples an und gibt alle jetzt vollständigen Frames zurück
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(samples);
        let (frames, remainder) = frame(&self.pending, self.frame_samples);
        self.pending = remainder;
        frames
    }

    /// Dekodiert einen LE-Bytepuffer; ein ungerades letztes Byte wird
    /// mit dem nächsten Puffer zusammengesetzt
    pub fn decode_bytes(&mut self, bytes: &[u8]) -> Vec<i16> {
        let mut joined;
        let data = match self.odd_byte.take() {
            Some(first) => {
                joined = Vec::with_capacity(bytes.len() + 1);
                joined.push(first);
                joined.extend_from_slice(bytes);
                joined.as_slice()
            }
            None => bytes,
        };
        if data.len() % 2 == 1 {
            self.odd_byte = data.last().copied();
        }
        pcm_from_le_bytes(data)
    }

    /// Anzahl gepufferter Samples
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Verwirft Restsamples und ein offenes Byte
    pub fn clear(&mut self) {
        self.pending.clear();
        self.odd_byte = None;
    }
}
