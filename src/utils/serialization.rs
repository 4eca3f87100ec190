// Thin bincode 2.x layer shared by every persisted record
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration.
/// Trailing bytes are treated as corruption.
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, read) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::CorruptData(format!("Deserialization failed: {e}")))?;
    if read != bytes.len() {
        return Err(BlockchainError::CorruptData(format!(
            "{} trailing bytes after record",
            bytes.len() - read
        )));
    }
    Ok(data)
}
