//! Classification of repository identities.

const REMOTE_PREFIXES: [&str; 5] = ["http://", "https://", "git://", "ssh://", "git@"];

pub fn is_remote_url(repo: &str) -> bool {
    REMOTE_PREFIXES.iter().any(|p| repo.starts_with(p))
}

/// Syntactic check only; does not touch the filesystem.
pub fn looks_like_local_path(repo: &str) -> bool {
    if is_remote_url(repo) {
        return false;
    }
    let bytes = repo.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return true;
    }
    repo.starts_with('/')
        || repo.starts_with("./")
        || repo.starts_with("../")
        || repo.starts_with(".\\")
        || repo.starts_with("..\\")
}

/// Final path component, treating both separators as boundaries.
pub fn last_path_component(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_spellings() {
        assert!(is_remote_url("git@github.com:user/repo.git"));
        assert!(is_remote_url("https://github.com/user/repo"));
        assert!(!looks_like_local_path("ssh://host/repo"));
        assert!(looks_like_local_path("/home/dev/repo"));
        assert!(looks_like_local_path("./repo"));
        assert!(looks_like_local_path("C:\\src\\repo"));
        assert!(!looks_like_local_path("repo"));
    }

    #[test]
    fn last_component_handles_both_separators() {
        assert_eq!(last_path_component("/home/dev/repo/"), "repo");
        assert_eq!(last_path_component("c:\\src\\repo"), "repo");
        assert_eq!(last_path_component("repo"), "repo");
    }
}
