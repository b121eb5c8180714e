use anyhow::Result;
use std::path::PathBuf;

const CHATRELAY_DIR: &str = ".chatrelay";
const DB_FILE: &str = "chatrelay.db";

/// Environment variable to override the ChatRelay directory.
const CHATRELAY_DIR_ENV: &str = "CHATRELAY_DIR";

/// Resolve the ChatRelay data directory.
/// Priority: CHATRELAY_DIR env var > ~/.chatrelay/
pub fn resolve_chatrelay_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CHATRELAY_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(CHATRELAY_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the ChatRelay directory exists and return its path.
pub fn ensure_chatrelay_dir() -> Result<PathBuf> {
    let dir = resolve_chatrelay_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the database path: ~/.chatrelay/chatrelay.db
pub fn database_path() -> Result<PathBuf> {
    Ok(resolve_chatrelay_dir()?.join(DB_FILE))
}

/// Convenience helper returning the database path as a UTF-8 string,
/// creating its directory first.
pub fn ensure_database_path_string() -> Result<String> {
    Ok(ensure_chatrelay_dir()?
        .join(DB_FILE)
        .to_string_lossy()
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_ends_with_db_file() {
        let path = database_path().unwrap();
        assert!(path.ends_with(DB_FILE));
    }
}
