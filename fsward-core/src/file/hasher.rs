use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{IoContext, ToolResult};

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams a file through SHA-256 in fixed size chunks so memory use does
/// not depend on the file size. Returns the lowercase hex digest.
pub fn hash_file_blocking(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub async fn hash_file(path: PathBuf) -> ToolResult<String> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || hash_file_blocking(&path))
        .await?
        .io_context(|| format!("Failed to hash {display}"))
}
