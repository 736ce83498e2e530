use std::time::{SystemTime, UNIX_EPOCH};

pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Accepts a numeric device index, a stream URI, a `sim://` descriptor or a
/// raw capture pipeline description.
pub fn validate_source(source: &str) -> Result<(), String> {
    let source = source.trim();
    if source.is_empty() {
        return Err("video source must not be empty".to_string());
    }
    if source.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    if let Some((scheme, rest)) = source.split_once("://") {
        return match scheme {
            "rtsp" | "http" | "https" | "file" | "sim" if !rest.is_empty() => Ok(()),
            _ => Err(format!("unsupported video source scheme: {}", scheme)),
        };
    }
    if source.contains('!') {
        return Ok(());
    }
    Err("source must be a device index, a URI or a pipeline description".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source() {
        assert!(validate_source("0").is_ok());
        assert!(validate_source("rtsp://10.0.0.4/stream1").is_ok());
        assert!(validate_source("sim://camera/1").is_ok());
        assert!(validate_source("v4l2src device=/dev/video0 ! videoconvert").is_ok());
        assert!(validate_source("ftp://host/file").is_err());
        assert!(validate_source("   ").is_err());
    }
}
