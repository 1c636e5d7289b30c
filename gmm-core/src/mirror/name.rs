//! Mirror names derived from remote URIs

use crate::{Error, Result};

/// Suffix stripped from the repository segment
const GIT_SUFFIX: &str = ".git";

/// Derive the `<namespace>/<repo>` mirror name from a remote URI
///
/// Takes the last two path segments, lower-cased, with a trailing `.git`
/// removed. `:` also delimits segments so that scp-style remotes such as
/// `git@host:ns/repo.git` resolve like their URL form.
///
/// ```
/// use gmm_core::mirror_name_from_uri;
///
/// assert_eq!(mirror_name_from_uri("HTTPS://Host/NS/Repo.git").unwrap(), "ns/repo");
/// assert_eq!(mirror_name_from_uri("git@host:ns/repo.git").unwrap(), "ns/repo");
/// ```
pub fn mirror_name_from_uri(uri: &str) -> Result<String> {
    let trimmed = uri.trim().trim_end_matches('/');

    if trimmed.is_empty() {
        return Err(Error::UserInput("mirror uri cannot be empty".to_string()));
    }

    let segments: Vec<&str> = trimmed.split(['/', ':']).collect();
    if segments.len() < 2 {
        return Err(invalid(uri));
    }

    let namespace = segments[segments.len() - 2].to_lowercase();
    let repo = segments[segments.len() - 1].to_lowercase();
    let repo = repo.strip_suffix(GIT_SUFFIX).unwrap_or(&repo);

    for segment in [namespace.as_str(), repo] {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid(uri));
        }
    }

    Ok(format!("{}/{}", namespace, repo))
}

fn invalid(uri: &str) -> Error {
    Error::UserInput(format!(
        "invalid mirror uri '{}': expected at least <namespace>/<repo>",
        uri
    ))
}
