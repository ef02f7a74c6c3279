// casket-core/src/audit/history.rs
//! Earlier committed revisions of a cask file, read with git2.
use std::path::Path;

use casket_common::error::{CasketError, Result};
use git2::{Repository, Sort};
use tracing::{debug, error};

/// Contents of the most recent committed revision of `file` that differs
/// from `current`. `None` when the file is not tracked or has never been
/// committed with different contents.
pub fn previous_revision(file: &Path, current: &str) -> Result<Option<String>> {
    let Some(dir) = file.parent() else {
        return Ok(None);
    };
    let repo = match Repository::discover(dir) {
        Ok(repo) => repo,
        Err(e) => {
            debug!("{} is not in a git repository: {}", file.display(), e);
            return Ok(None);
        }
    };
    let Some(workdir) = repo.workdir() else {
        return Ok(None);
    };
    let workdir = workdir.canonicalize()?;
    let file = file.canonicalize()?;
    let relative = file.strip_prefix(&workdir).map_err(|_| {
        CasketError::Generic(format!(
            "{} is outside the repository at {}",
            file.display(),
            workdir.display()
        ))
    })?;

    let mut walk = repo.revwalk().map_err(|e| {
        error!("Failed to walk history of {}: {}", workdir.display(), e);
        CasketError::Generic(format!("Failed to walk repository history: {e}"))
    })?;
    if walk.push_head().is_err() {
        debug!("Repository at {} has no commits", workdir.display());
        return Ok(None);
    }
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let tree = commit.tree()?;
        let Ok(entry) = tree.get_path(relative) else {
            continue;
        };
        let object = entry.to_object(&repo)?;
        let Some(blob) = object.as_blob() else {
            continue;
        };
        let contents = String::from_utf8_lossy(blob.content());
        if contents != current {
            debug!(
                "Previous revision of {} is in commit {}",
                relative.display(),
                commit.id()
            );
            return Ok(Some(contents.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use git2::Signature;

    use super::*;

    fn commit_file(repo: &Repository, relative: &str, contents: &str, message: &str) {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let path = workdir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(relative)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let signature = Signature::now("casket", "casket@example.com").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
            .unwrap();
    }

    #[test]
    fn finds_last_differing_revision() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        commit_file(&repo, "Casks/foo.json", "one", "first");
        commit_file(&repo, "Casks/foo.json", "two", "second");

        let file = tmp.path().join("Casks/foo.json");
        assert_eq!(previous_revision(&file, "two").unwrap().as_deref(), Some("one"));
        assert_eq!(previous_revision(&file, "three").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn new_file_has_no_previous_revision() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        commit_file(&repo, "Casks/foo.json", "one", "first");
        fs::write(tmp.path().join("Casks/bar.json"), "bar").unwrap();

        assert_eq!(previous_revision(&tmp.path().join("Casks/foo.json"), "one").unwrap(), None);
        assert_eq!(previous_revision(&tmp.path().join("Casks/bar.json"), "bar").unwrap(), None);
    }
}
