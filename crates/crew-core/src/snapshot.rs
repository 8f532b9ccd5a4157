//! Content-addressed image names for pre-built repository snapshots.

use crate::fsutil::sha256_hex;
use crate::repo::{last_path_component, looks_like_local_path};

pub const SNAPSHOT_PREFIX: &str = "crew-snapshot";
const DIGEST_LEN: usize = 12;

/// Reduces the spellings of one logical repository to a single string.
pub fn normalize_repo_identity(repo: &str) -> String {
    let mut s = repo.trim_end_matches('/');
    s = s.strip_suffix(".git").unwrap_or(s);

    let mut normalized = match s.strip_prefix("git@") {
        Some(rest) => format!("https://{}", rest.replacen(':', "/", 1)),
        None => s.to_string(),
    };
    normalized = normalized.to_lowercase();

    if looks_like_local_path(&normalized) {
        normalized = last_path_component(&normalized).to_string();
    }
    normalized
}

pub fn snapshot_name_with_tag(repo: &str, tag: &str) -> String {
    let digest = sha256_hex(normalize_repo_identity(repo).as_bytes());
    format!("{}-{}:{}", SNAPSHOT_PREFIX, &digest[..DIGEST_LEN], tag)
}

pub fn snapshot_name(repo: &str) -> String {
    snapshot_name_with_tag(repo, "latest")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_and_https_spellings_share_a_snapshot() {
        let a = snapshot_name("git@github.com:user/repo.git");
        let b = snapshot_name("https://github.com/User/Repo/");
        assert_eq!(a, b);
        assert_ne!(a, snapshot_name("https://github.com/user/other"));
    }

    #[test]
    fn name_has_prefix_digest_and_tag() {
        let name = snapshot_name_with_tag("https://github.com/user/repo", "v2");
        let (image, tag) = name.split_once(':').expect("tag separator");
        assert_eq!(tag, "v2");
        let digest = image
            .strip_prefix("crew-snapshot-")
            .expect("prefix");
        assert_eq!(digest.len(), 12);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn local_paths_reduce_to_their_final_component() {
        assert_eq!(normalize_repo_identity("/home/dev/Project/"), "project");
        assert_eq!(normalize_repo_identity("C:\\src\\Project.git"), "project");
        assert_eq!(
            snapshot_name("/home/alice/project"),
            snapshot_name("/srv/build/Project")
        );
    }

    #[test]
    fn remote_normalization() {
        assert_eq!(
            normalize_repo_identity("git@gitlab.com:Team/App.git"),
            "https://gitlab.com/team/app"
        );
    }
}
