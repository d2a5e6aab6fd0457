//! Fixed-size binary encoding of a chunk's materials.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "SVCK"
//! 4       2     format version, little endian
//! 6       4     CRC-32 of the payload, little endian
//! 10      4096  material identifiers in chunk layout order
//! ```

use crc32fast::Hasher;

use crate::engine_state::voxels::block::material::Material;
use crate::engine_state::voxels::chunk::{chunk_creation::ChunkCreationIterator, Chunk, CHUNK_SIZE};
use crate::engine_state::voxels::coords::ChunkIndex;
use crate::error::{Result, WorldError};

pub const CHUNK_BLOB_MAGIC: &[u8; 4] = b"SVCK";
pub const CHUNK_BLOB_VERSION: u16 = 1;
pub const CHUNK_BLOB_HEADER_LEN: usize = 4 + 2 + 4;
pub const CHUNK_BLOB_LEN: usize = CHUNK_BLOB_HEADER_LEN + CHUNK_SIZE;

/// Serialized material array of one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkBlob {
    bytes: Vec<u8>,
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

impl ChunkBlob {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let payload: Vec<u8> = chunk.materials().iter().map(|m| m.id()).collect();
        let mut bytes = Vec::with_capacity(CHUNK_BLOB_LEN);
        bytes.extend_from_slice(CHUNK_BLOB_MAGIC);
        bytes.extend_from_slice(&CHUNK_BLOB_VERSION.to_le_bytes());
        bytes.extend_from_slice(&crc32(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);
        ChunkBlob { bytes }
    }

    /// Validates raw bytes read from storage or the wire.
    ///
    /// # Errors
    /// `PersistenceIo` with `InvalidData` for a wrong length, magic, version or
    /// checksum, or an unknown material identifier.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != CHUNK_BLOB_LEN {
            return Err(WorldError::corrupt(format!(
                "chunk blob is {} bytes, expected {CHUNK_BLOB_LEN}",
                bytes.len()
            )));
        }
        if &bytes[0..4] != CHUNK_BLOB_MAGIC {
            return Err(WorldError::corrupt("chunk blob magic mismatch"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != CHUNK_BLOB_VERSION {
            return Err(WorldError::corrupt(format!("unsupported chunk blob version {version}")));
        }
        let expected = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let payload = &bytes[CHUNK_BLOB_HEADER_LEN..];
        if crc32(payload) != expected {
            return Err(WorldError::corrupt("chunk blob checksum mismatch"));
        }
        if let Some(bad) = payload.iter().find(|id| Material::from_id(**id).is_none()) {
            return Err(WorldError::corrupt(format!("unknown material id {bad}")));
        }
        Ok(ChunkBlob { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Rebuilds the chunk this blob was made from.
    pub fn to_chunk(&self, index: ChunkIndex) -> Chunk {
        let mut cci = ChunkCreationIterator::new(index);
        for id in &self.bytes[CHUNK_BLOB_HEADER_LEN..] {
            // Identifiers were validated when the blob was built.
            cci.push_material(Material::from_id(*id).unwrap_or_default());
        }
        cci.return_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_state::voxels::coords::CellLoc;

    fn sample_chunk() -> Chunk {
        Chunk::from_fn(ChunkIndex::new(4, 2, 1), |loc| match (loc.lon + loc.lat + loc.alt) % 4 {
            0 => Material::Stone,
            1 => Material::Grass,
            2 => Material::BlueBlock,
            _ => Material::Air,
        })
    }

    #[test]
    fn blob_reproduces_the_material_array() {
        let chunk = sample_chunk();
        let blob = ChunkBlob::from_chunk(&chunk);
        assert_eq!(blob.as_bytes().len(), CHUNK_BLOB_LEN);

        let decoded = ChunkBlob::from_bytes(blob.clone().into_bytes()).unwrap();
        let rebuilt = decoded.to_chunk(chunk.index);
        assert_eq!(rebuilt.materials(), chunk.materials());
        assert_eq!(
            rebuilt.material(chunk.index.origin() + CellLoc::new(1, 1, 2)),
            chunk.material(chunk.index.origin() + CellLoc::new(1, 1, 2))
        );
    }

    #[test]
    fn flipped_payload_byte_fails_the_checksum() {
        let mut bytes = ChunkBlob::from_chunk(&sample_chunk()).into_bytes();
        bytes[CHUNK_BLOB_HEADER_LEN + 100] ^= 0x01;
        let err = ChunkBlob::from_bytes(bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let good = ChunkBlob::from_chunk(&sample_chunk()).into_bytes();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert!(ChunkBlob::from_bytes(bad_magic).is_err());

        let mut bad_version = good.clone();
        bad_version[4] = 9;
        assert!(ChunkBlob::from_bytes(bad_version).is_err());

        assert!(ChunkBlob::from_bytes(good[..good.len() - 1].to_vec()).is_err());
    }

    #[test]
    fn unknown_material_ids_are_rejected() {
        let mut bytes = ChunkBlob::from_chunk(&Chunk::empty(ChunkIndex::new(0, 0, 0))).into_bytes();
        bytes[CHUNK_BLOB_HEADER_LEN] = 200;
        let crc = crc32(&bytes[CHUNK_BLOB_HEADER_LEN..]);
        bytes[6..10].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(ChunkBlob::from_bytes(bytes), Err(WorldError::PersistenceIo(_))));
    }
}
