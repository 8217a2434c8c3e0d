use anyhow::Context;
use tracing::debug;

/// Compresses the complete input into a single zstd frame
pub fn compress(data: &[u8], level: i32) -> anyhow::Result<Vec<u8>> {
    debug!("compressing {} bytes", data.len());
    let compressed = zstd::encode_all(data, level)
        .context("compression failed")?;
    debug!("compressed {} bytes to {}", data.len(), compressed.len());
    Ok(compressed)
}

/// NB: Truncated or corrupt input is an error rather than partial output
pub fn decompress(compressed: &[u8]) -> anyhow::Result<Vec<u8>> {
    debug!("decompressing {} bytes", compressed.len());
    zstd::decode_all(compressed)
        .context("decompression failed")
}
