use sha2::{Digest, Sha256};

/// Hash an ordered sequence of lines.
///
/// Each line is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn sha256_lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for line in lines {
        let line = line.as_ref();
        hasher.update((line.len() as u64).to_le_bytes());
        hasher.update(line.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
