use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read size used when hashing staged files.
pub const CHUNK_SIZE: usize = 8 * 1024;

pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex MD5 of everything `reader` yields, read in `CHUNK_SIZE` pieces.
pub async fn calculate_hash_from_reader<R: AsyncRead + Unpin>(reader: R) -> anyhow::Result<String> {
    calculate_hash_with_chunk_size(reader, CHUNK_SIZE).await
}

pub async fn calculate_hash_with_chunk_size<R: AsyncRead + Unpin>(
    mut reader: R,
    chunk_size: usize,
) -> anyhow::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_hash() {
        assert_eq!(
            calculate_hash(b"helloworld"),
            "fc5e038d38a57032085441e7fe7010b0"
        );
    }

    #[test]
    fn test_calculate_hash_empty() {
        // MD5 of the empty string
        assert_eq!(calculate_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_calculate_hash_from_reader() {
        let hash = calculate_hash_from_reader(&b"helloworld"[..]).await.unwrap();
        assert_eq!(hash, "fc5e038d38a57032085441e7fe7010b0");
    }

    #[tokio::test]
    async fn test_hash_independent_of_chunk_size() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = calculate_hash(&data);

        for chunk_size in [1, 7, 512, CHUNK_SIZE, 64 * 1024, 1024 * 1024] {
            let hash = calculate_hash_with_chunk_size(&data[..], chunk_size)
                .await
                .unwrap();
            assert_eq!(hash, expected, "chunk size {}", chunk_size);
        }
    }
}
