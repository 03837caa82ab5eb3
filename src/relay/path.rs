//! Remote path utilities
//!
//! Remote SFTP paths always use `/` as separator regardless of either OS.

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    let component = component.trim_start_matches('/');
    if base.is_empty() || base == "/" {
        format!("/{component}")
    } else if base.ends_with('/') {
        format!("{base}{component}")
    } else {
        format!("{base}/{component}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote_path() {
        assert_eq!(join_remote_path("/", "world"), "/world");
        assert_eq!(join_remote_path("", "world"), "/world");
        assert_eq!(join_remote_path("/data", "world"), "/data/world");
        assert_eq!(join_remote_path("/data/", "world"), "/data/world");
        assert_eq!(join_remote_path("/data", "/world"), "/data/world");
        assert_eq!(
            join_remote_path("/data", "world/region"),
            "/data/world/region"
        );
    }
}
