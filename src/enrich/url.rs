//! Commit URL derivation by origin host pattern

/// Derive the browsable commit URL and repository type from the origin URL.
pub fn commit_url(origin: &str, sha: &str) -> (String, &'static str) {
    if origin.starts_with("git://") {
        return (
            format!("{}/commit/?id={}", origin.replacen("git://", "http://", 1), sha),
            "git",
        );
    }
    if origin.starts_with("http://git.") || origin.starts_with("https://git.") {
        return (format!("{origin}/commit/?id={sha}"), "git");
    }
    if origin.contains("github.com") {
        return (format!("{origin}/commit/{sha}"), "github");
    }
    if origin.contains("gitlab.com") {
        return (format!("{origin}/-/commit/{sha}"), "gitlab");
    }
    if origin.contains("bitbucket.org") {
        return (format!("{origin}/commits/{sha}"), "bitbucket");
    }
    if origin.contains("gerrit") || origin.contains("review") {
        return match split_url(origin) {
            Some((scheme, host, path)) => {
                let view = if path.contains("/gerrit/") {
                    "gerrit/gitweb"
                } else if path.contains("/r/") {
                    "r/gitweb"
                } else {
                    "gitweb"
                };
                let mut project = path
                    .replace("/gerrit/", "")
                    .replace("/r/", "")
                    .trim_start_matches('/')
                    .to_string();
                if !project.ends_with(".git") {
                    project.push_str(".git");
                }
                (
                    format!("{scheme}://{host}/{view}?p={project};a=commit;h={sha}"),
                    "gerrit",
                )
            }
            None => (format!("{origin}/{sha}"), "unknown"),
        };
    }
    if origin.contains("git.") {
        return (format!("{origin}/commit/?id={sha}"), "unknown");
    }
    (format!("{origin}/{sha}"), "unknown")
}

/// Short repository name derived from the origin URL.
pub fn repo_short_name(origin: &str) -> String {
    let last_slash_item = |arg: &str| -> String {
        let arg = arg.trim_end_matches('/');
        match arg.rsplit_once('/') {
            Some((_, last)) => last.to_string(),
            None => arg.to_string(),
        }
    };
    if origin.contains("/github.com/") {
        return last_slash_item(origin.trim_end_matches(".git"));
    }
    if origin.contains("/gerrit.") || origin.contains("/gitlab.com") {
        return last_slash_item(origin);
    }
    if origin.contains("/bitbucket.org/") {
        let arg = origin.trim_end_matches('/');
        let arg = arg.strip_suffix("/src").unwrap_or(arg);
        return last_slash_item(arg.trim_end_matches(".git"));
    }
    last_slash_item(origin)
}

/// Derive a gerrit project slug (the source id) from the repository URL.
pub fn gerrit_source_id(url: &str) -> String {
    let mut source_id = String::new();
    for sep in ["/r/", "/gerrit/"] {
        if let Some((_, rest)) = url.split_once(sep) {
            source_id = rest.trim().to_string();
            break;
        }
    }
    if !source_id.is_empty() {
        return source_id;
    }
    // No recognised separator; take everything after scheme://host.
    if let Some((_, _, path)) = split_url(url) {
        return path.trim_matches('/').to_string();
    }
    source_id
}

/// Split `scheme://host/path` without a URL library; enough for origin URLs.
fn split_url(url: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    match rest.split_once('/') {
        Some((host, path)) => Some((scheme, host, &url[scheme.len() + 3 + host.len()..])),
        None => Some((scheme, rest, "")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "abc123";

    #[test]
    fn git_scheme_rewrites_to_http() {
        assert_eq!(
            commit_url("git://host/repo", SHA),
            ("http://host/repo/commit/?id=abc123".to_string(), "git")
        );
    }

    #[test]
    fn git_subdomain_keeps_origin() {
        assert_eq!(
            commit_url("https://git.kernel.org/pub/linux", SHA),
            ("https://git.kernel.org/pub/linux/commit/?id=abc123".to_string(), "git")
        );
    }

    #[test]
    fn forge_hosts() {
        assert_eq!(
            commit_url("https://github.com/org/repo", SHA),
            ("https://github.com/org/repo/commit/abc123".to_string(), "github")
        );
        assert_eq!(
            commit_url("https://gitlab.com/org/repo", SHA),
            ("https://gitlab.com/org/repo/-/commit/abc123".to_string(), "gitlab")
        );
        assert_eq!(
            commit_url("https://bitbucket.org/org/repo", SHA),
            ("https://bitbucket.org/org/repo/commits/abc123".to_string(), "bitbucket")
        );
    }

    #[test]
    fn gerrit_gitweb_forms() {
        assert_eq!(
            commit_url("https://gerrit.example.org/r/project", SHA),
            (
                "https://gerrit.example.org/r/gitweb?p=project.git;a=commit;h=abc123".to_string(),
                "gerrit"
            )
        );
        assert_eq!(
            commit_url("https://review.example.org/gerrit/sub/project", SHA),
            (
                "https://review.example.org/gerrit/gitweb?p=sub/project.git;a=commit;h=abc123"
                    .to_string(),
                "gerrit"
            )
        );
    }

    #[test]
    fn unknown_host_appends_sha() {
        assert_eq!(
            commit_url("https://code.example.org/x", SHA),
            ("https://code.example.org/x/abc123".to_string(), "unknown")
        );
    }

    #[test]
    fn short_names() {
        assert_eq!(repo_short_name("https://github.com/org/repo.git"), "repo");
        assert_eq!(repo_short_name("https://gitlab.com/org/repo"), "repo");
        assert_eq!(
            repo_short_name("https://bitbucket.org/org/repo.git/src/"),
            "repo"
        );
        assert_eq!(repo_short_name("https://gerrit.xyz/r/org/repo"), "repo");
    }

    #[test]
    fn gerrit_source_ids() {
        assert_eq!(gerrit_source_id("https://gerrit.example.org/r/org/repo"), "org/repo");
        assert_eq!(
            gerrit_source_id("https://review.example.org/gerrit/project"),
            "project"
        );
        assert_eq!(gerrit_source_id("https://gerrit.example.org/project"), "project");
    }
}
