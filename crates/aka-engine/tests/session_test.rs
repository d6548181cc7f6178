//! Session semantics: path resolution, the workspace overlay, shadow
//! manifests, status and diff. Everything runs against the in-memory
//! backend.

use std::sync::Arc;

use aka_core::{ChangesetRef, CommitId, Error, FileChange, RepoPath};
use aka_engine::{MemoryStorage, Repository, Session};

// ── Helpers ──────────────────────────────────────────────────────────

async fn fresh_repo() -> (Repository, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let repo = Repository::init(storage.clone()).await.expect("init repo");
    (repo, storage)
}

async fn workspace_session(repo: &Repository) -> (Session, aka_core::WorkspaceId) {
    let ws = repo
        .create_workspace_on_branch("main", "test")
        .await
        .expect("create workspace");
    let session = repo
        .session(ChangesetRef::Workspace(ws.clone()))
        .await
        .expect("open session");
    (session, ws)
}

/// Publish a one-file tree and return the resulting commit.
async fn seed_commit(repo: &Repository, files: &[(&str, &[u8])]) -> CommitId {
    let (session, ws) = workspace_session(repo).await;
    for (path, content) in files {
        session.write_file(*path, content).await.expect("seed write");
    }
    repo.publish_workspace(&ws, "main", "seed", "test")
        .await
        .expect("seed publish")
}

// ── Empty repository boundaries ──────────────────────────────────────

#[tokio::test]
async fn empty_repo_has_empty_root_listing() {
    let (repo, _) = fresh_repo().await;
    let session = repo.session_on_branch("main").await.expect("session");
    assert!(session.is_read_only());
    assert_eq!(session.branch(), Some("main"));
    assert!(session.list_directory("").await.expect("list root").is_empty());
}

#[tokio::test]
async fn empty_repo_read_is_not_found() {
    let (repo, _) = fresh_repo().await;
    let session = repo.session_on_branch("main").await.expect("session");
    assert!(matches!(
        session.read_file("anything.txt").await,
        Err(Error::FileNotFound(_))
    ));
    assert!(!session.file_exists("anything.txt").await.expect("exists"));
}

#[tokio::test]
async fn session_on_unknown_commit_fails() {
    let (repo, _) = fresh_repo().await;
    let result = repo
        .session(ChangesetRef::Commit(CommitId::new("@999")))
        .await;
    assert!(matches!(result, Err(Error::CommitNotFound(_))));
}

#[tokio::test]
async fn session_on_unknown_branch_fails() {
    let (repo, _) = fresh_repo().await;
    assert!(matches!(
        repo.session_on_branch("release").await,
        Err(Error::BranchNotFound(_))
    ));
}

// ── Commit sessions are read-only ────────────────────────────────────

#[tokio::test]
async fn commit_session_rejects_writes() {
    let (repo, _) = fresh_repo().await;
    seed_commit(&repo, &[("a.txt", b"alpha")]).await;
    let session = repo.session_on_branch("main").await.expect("session");

    assert!(matches!(
        session.write_file("x.txt", b"x").await,
        Err(Error::SessionReadOnly)
    ));
    assert!(matches!(
        session.delete_file("a.txt").await,
        Err(Error::SessionReadOnly)
    ));
    assert!(matches!(
        session.move_file("a.txt", "b.txt").await,
        Err(Error::SessionReadOnly)
    ));
    assert!(matches!(session.status().await, Err(Error::SessionReadOnly)));
}

// ── Workspace reads & writes ─────────────────────────────────────────

#[tokio::test]
async fn write_then_read_roundtrips() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;

    session.write_file("docs/readme.md", b"hello").await.expect("write");
    assert_eq!(session.read_file("docs/readme.md").await.expect("read"), b"hello");
    assert!(session.file_exists("docs/readme.md").await.expect("exists"));

    // Overwrite.
    session.write_file("docs/readme.md", b"rev 2").await.expect("rewrite");
    assert_eq!(session.read_file("docs/readme.md").await.expect("read"), b"rev 2");
}

#[tokio::test]
async fn slash_variants_normalize_to_the_same_path() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;

    session.write_file("a/b.txt", b"x").await.expect("write");
    assert_eq!(session.read_file("/a//b.txt/").await.expect("read"), b"x");
    assert!(session.file_exists("a/b.txt").await.expect("exists"));
}

#[tokio::test]
async fn unicode_and_spaces_are_verbatim() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;

    let path = "アーカイブ/annual report v2.final.txt";
    session.write_file(path, b"data").await.expect("write");
    assert_eq!(session.read_file(path).await.expect("read"), b"data");

    let listing = session.list_directory("アーカイブ").await.expect("list");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "annual report v2.final.txt");
}

#[tokio::test]
async fn delete_removes_from_effective_view() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;

    session.write_file("tmp.txt", b"scratch").await.expect("write");
    session.delete_file("tmp.txt").await.expect("delete");
    assert!(!session.file_exists("tmp.txt").await.expect("exists"));
    assert!(matches!(
        session.read_file("tmp.txt").await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn delete_missing_file_fails() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;
    assert!(matches!(
        session.delete_file("no/such/file").await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn delete_of_directory_path_fails() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;
    session.write_file("dir/file.txt", b"x").await.expect("write");
    assert!(matches!(
        session.delete_file("dir").await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn list_directory_on_file_path_fails() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;
    session.write_file("a.txt", b"x").await.expect("write");
    assert!(matches!(
        session.list_directory("a.txt").await,
        Err(Error::FileNotFound(_))
    ));
}

// ── Shadow manifest semantics ────────────────────────────────────────

#[tokio::test]
async fn base_files_deleted_in_workspace_do_not_leak_through() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("d/a.txt", b"one"), ("d/b.txt", b"two")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.delete_file("d/a.txt").await.expect("delete");

    // The shadow manifest at `d` is now authoritative: only b.txt survives.
    let names: Vec<String> = session
        .list_directory("d")
        .await
        .expect("list")
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["b.txt"]);
    assert!(matches!(
        session.read_file("d/a.txt").await,
        Err(Error::FileNotFound(_))
    ));
    // Untouched sibling still reads from the base.
    assert_eq!(session.read_file("d/b.txt").await.expect("read"), b"two");
}

#[tokio::test]
async fn first_touch_inherits_base_entries() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("d/a.txt", b"one"), ("d/b.txt", b"two")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    // Adding a file must not hide the inherited siblings.
    session.write_file("d/c.txt", b"three").await.expect("write");
    let names: Vec<String> = session
        .list_directory("d")
        .await
        .expect("list")
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
}

#[tokio::test]
async fn deleting_last_file_leaves_an_empty_directory_listing() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("only/file.txt", b"x")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.delete_file("only/file.txt").await.expect("delete");
    // The directory still exists in the workspace view, just empty.
    assert!(session.list_directory("only").await.expect("list").is_empty());
}

// ── Moves ────────────────────────────────────────────────────────────

#[tokio::test]
async fn move_of_base_content_reads_at_destination() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("a.txt", b"alpha")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.move_file("a.txt", "sub/b.txt").await.expect("move");
    assert_eq!(session.read_file("sub/b.txt").await.expect("read"), b"alpha");
    assert!(!session.file_exists("a.txt").await.expect("exists"));
}

#[tokio::test]
async fn move_of_workspace_content_carries_the_blob() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;

    session.write_file("draft.txt", b"wip").await.expect("write");
    session.move_file("draft.txt", "final.txt").await.expect("move");
    assert_eq!(session.read_file("final.txt").await.expect("read"), b"wip");
    assert!(!session.file_exists("draft.txt").await.expect("exists"));
}

#[tokio::test]
async fn chained_moves_keep_resolving() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("a.txt", b"alpha")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.move_file("a.txt", "b.txt").await.expect("first move");
    session.move_file("b.txt", "c/d.txt").await.expect("second move");
    assert_eq!(session.read_file("c/d.txt").await.expect("read"), b"alpha");
    assert!(!session.file_exists("a.txt").await.expect("exists"));
    assert!(!session.file_exists("b.txt").await.expect("exists"));
}

#[tokio::test]
async fn move_missing_source_fails() {
    let (repo, _) = fresh_repo().await;
    let (session, _ws) = workspace_session(&repo).await;
    assert!(matches!(
        session.move_file("ghost.txt", "dest.txt").await,
        Err(Error::FileNotFound(_))
    ));
}

// ── Status ───────────────────────────────────────────────────────────

#[tokio::test]
async fn status_reports_added_modified_deleted() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("keep.txt", b"keep"), ("edit.txt", b"v1"), ("gone.txt", b"bye")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.write_file("new.txt", b"fresh").await.expect("write");
    session.write_file("edit.txt", b"v2").await.expect("edit");
    session.delete_file("gone.txt").await.expect("delete");

    let status = session.status().await.expect("status");
    assert_eq!(status.added, vec![RepoPath::new("new.txt")]);
    assert_eq!(status.modified, vec![RepoPath::new("edit.txt")]);
    assert_eq!(status.deleted, vec![RepoPath::new("gone.txt")]);
}

#[tokio::test]
async fn rewriting_identical_content_is_not_a_modification() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("same.txt", b"stable")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.write_file("same.txt", b"stable").await.expect("write");
    assert!(session.status().await.expect("status").is_clean());
}

#[tokio::test]
async fn rename_shows_as_delete_plus_add() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("old.txt", b"content")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.move_file("old.txt", "new.txt").await.expect("move");
    let status = session.status().await.expect("status");
    assert_eq!(status.added, vec![RepoPath::new("new.txt")]);
    assert_eq!(status.deleted, vec![RepoPath::new("old.txt")]);
    assert!(status.modified.is_empty());
}

#[tokio::test]
async fn untouched_workspace_status_is_clean() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("a.txt", b"alpha")]).await;
    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");
    assert!(session.status().await.expect("status").is_clean());
}

// ── Diff ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn self_diff_is_empty() {
    let (repo, _) = fresh_repo().await;
    let commit = seed_commit(&repo, &[("a.txt", b"alpha"), ("d/b.txt", b"beta")]).await;
    let session = repo
        .session(ChangesetRef::Commit(commit.clone()))
        .await
        .expect("session");
    assert!(session.diff(&commit).await.expect("diff").is_empty());
}

#[tokio::test]
async fn commit_to_commit_diff_walks_nested_trees() {
    let (repo, _) = fresh_repo().await;
    let c1 = seed_commit(&repo, &[("d/a.txt", b"one"), ("d/b.txt", b"two")]).await;

    let ws = repo.create_workspace(&c1, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws.clone()))
        .await
        .expect("session");
    session.write_file("d/a.txt", b"one v2").await.expect("edit");
    session.write_file("d/c.txt", b"three").await.expect("add");
    session.delete_file("d/b.txt").await.expect("delete");
    let c2 = repo
        .publish_workspace(&ws, "main", "rework d", "test")
        .await
        .expect("publish");

    let session = repo
        .session(ChangesetRef::Commit(c2))
        .await
        .expect("session");
    let changes = session.diff(&c1).await.expect("diff");
    assert_eq!(
        changes,
        vec![
            FileChange::Modified(RepoPath::new("d/a.txt")),
            FileChange::Deleted(RepoPath::new("d/b.txt")),
            FileChange::Added(RepoPath::new("d/c.txt")),
        ]
    );
}

#[tokio::test]
async fn file_to_directory_flip_emits_delete_and_add() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("x", b"plain file")]).await;

    let ws = repo.create_workspace(&base, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");

    session.delete_file("x").await.expect("delete");
    session.write_file("x/y.txt", b"nested").await.expect("write");

    let changes = session.diff(&base).await.expect("diff");
    assert_eq!(
        changes,
        vec![
            FileChange::Deleted(RepoPath::new("x")),
            FileChange::Added(RepoPath::new("x/y.txt")),
        ]
    );
}

// ── Commit immutability ──────────────────────────────────────────────

#[tokio::test]
async fn commit_reads_are_idempotent() {
    let (repo, _) = fresh_repo().await;
    let commit = seed_commit(&repo, &[("stable.txt", b"fixed bytes")]).await;
    let session = repo
        .session(ChangesetRef::Commit(commit))
        .await
        .expect("session");

    let first = session.read_file("stable.txt").await.expect("first read");
    let second = session.read_file("stable.txt").await.expect("second read");
    assert_eq!(first, second);
    assert_eq!(first, b"fixed bytes");
}

#[tokio::test]
async fn workspace_edits_do_not_disturb_other_sessions() {
    let (repo, _) = fresh_repo().await;
    let base = seed_commit(&repo, &[("shared.txt", b"original")]).await;

    let ws_a = repo.create_workspace(&base, "a").await.expect("ws a");
    let ws_b = repo.create_workspace(&base, "b").await.expect("ws b");
    let session_a = repo
        .session(ChangesetRef::Workspace(ws_a))
        .await
        .expect("session a");
    let session_b = repo
        .session(ChangesetRef::Workspace(ws_b))
        .await
        .expect("session b");

    session_a
        .write_file("shared.txt", b"a's version")
        .await
        .expect("write");

    assert_eq!(
        session_b.read_file("shared.txt").await.expect("read"),
        b"original"
    );
    let commit_session = repo
        .session(ChangesetRef::Commit(base))
        .await
        .expect("commit session");
    assert_eq!(
        commit_session.read_file("shared.txt").await.expect("read"),
        b"original"
    );
}
