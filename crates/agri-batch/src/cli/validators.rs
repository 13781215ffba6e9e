use std::num::NonZeroUsize;
use std::path::PathBuf;

const MAX_CHUNK_SIZE: usize = 500;
const MAX_POLL_INTERVAL_SECS: u64 = 3600;

/// Validate chunk size: must be between 1 and 500.
pub fn validate_chunk_size(s: &str) -> Result<NonZeroUsize, String> {
    let value = s
        .parse::<usize>()
        .map_err(|_| format!("invalid number: {}", s))?;

    if value > MAX_CHUNK_SIZE {
        return Err(format!("chunk size cannot exceed {MAX_CHUNK_SIZE}"));
    }

    NonZeroUsize::new(value).ok_or_else(|| "chunk size must be at least 1".to_string())
}

/// Validate poll interval in seconds: must be between 1 and 3600.
pub fn validate_poll_interval(s: &str) -> Result<u64, String> {
    let value = s
        .parse::<u64>()
        .map_err(|_| format!("invalid number: {}", s))?;

    if value == 0 {
        return Err("poll interval must be at least 1 second".to_string());
    }

    if value > MAX_POLL_INTERVAL_SECS {
        return Err(format!(
            "poll interval cannot exceed {MAX_POLL_INTERVAL_SECS} seconds"
        ));
    }

    Ok(value)
}

/// Validate an input file: must exist and be a regular file.
pub fn validate_input_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);

    if !path.exists() {
        return Err(format!("file does not exist: {}", s));
    }

    if !path.is_file() {
        return Err(format!("path is not a file: {}", s));
    }

    Ok(path)
}

/// Validate a job name: ASCII letters, digits, `-` and `_`, length 1..=64.
pub fn validate_job_name(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("job name cannot be empty".to_string());
    }

    if s.len() > 64 {
        return Err(format!("job name too long: {} chars (max 64)", s.len()));
    }

    if !s
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
    {
        return Err("job name must contain only ASCII letters, digits, `-` and `_`".to_string());
    }

    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_bounds() {
        assert!(validate_chunk_size("0").is_err());
        assert_eq!(validate_chunk_size("1").map(NonZeroUsize::get), Ok(1));
        assert_eq!(validate_chunk_size("500").map(NonZeroUsize::get), Ok(500));
        assert!(validate_chunk_size("501").is_err());
        assert!(validate_chunk_size("ten").is_err());
    }

    #[test]
    fn poll_interval_bounds() {
        assert!(validate_poll_interval("0").is_err());
        assert_eq!(validate_poll_interval("30"), Ok(30));
        assert!(validate_poll_interval("3601").is_err());
    }

    #[test]
    fn job_names_reject_separators() {
        assert!(validate_job_name("validation_batch").is_ok());
        assert!(validate_job_name("../etc").is_err());
        assert!(validate_job_name("").is_err());
    }
}
