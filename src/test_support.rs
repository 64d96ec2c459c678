//! Fixture helpers shared by unit tests.

use git2::{Commit, IndexAddOption, Repository, Signature};
use std::path::Path;

pub fn init_repo(dir: &Path) -> Repository {
    Repository::init(dir).expect("init repository")
}

pub fn stage(repo: &Repository, path: &str) {
    let mut index = repo.index().expect("open index");
    index.add_path(Path::new(path)).expect("stage path");
    index.write().expect("write index");
}

pub fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().expect("open index");
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .expect("stage all");
    index.write().expect("write index");
    let tree_id = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let sig = Signature::now("Test", "test@example.com").expect("signature");

    let parents: Vec<Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().expect("head commit")],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .expect("commit");
}
