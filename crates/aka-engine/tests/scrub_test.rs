//! Content scrubbing: tombstones, structure preservation, and the
//! manifest-walk-only path variant.

use std::sync::Arc;

use aka_core::{ChangesetRef, CommitId, ContentHash, Error, RepoPath};
use aka_engine::{MemoryStorage, Repository, Storage};

// ── Helpers ──────────────────────────────────────────────────────────

async fn repo_with_secret() -> (Repository, Arc<MemoryStorage>, CommitId) {
    let storage = Arc::new(MemoryStorage::new());
    let repo = Repository::init(storage.clone()).await.expect("init repo");

    let ws = repo
        .create_workspace_on_branch("main", "test")
        .await
        .expect("create workspace");
    let session = repo
        .session(ChangesetRef::Workspace(ws.clone()))
        .await
        .expect("session");
    session
        .write_file("config/secrets.env", b"TOKEN=hunter2")
        .await
        .expect("write secret");
    session
        .write_file("README.md", b"public")
        .await
        .expect("write readme");
    let commit = repo
        .publish_workspace(&ws, "main", "base", "test")
        .await
        .expect("publish");
    (repo, storage, commit)
}

// ── Scenario: scrub then read ────────────────────────────────────────

#[tokio::test]
async fn scrubbed_object_reads_as_deleted_not_missing() {
    let (repo, _storage, commit) = repo_with_secret().await;
    let hash = ContentHash::of(b"TOKEN=hunter2");

    let tombstone = repo
        .scrub_content(&hash, "leaked credentials", "sec@example.com")
        .await
        .expect("scrub");
    assert_eq!(tombstone.deleted_hash, hash);
    assert_eq!(tombstone.original_size, b"TOKEN=hunter2".len() as i64);

    let session = repo
        .session(ChangesetRef::Commit(commit))
        .await
        .expect("session");
    match session.read_file("config/secrets.env").await {
        Err(Error::ObjectDeleted { hash: h, tombstone }) => {
            assert_eq!(h, hash);
            assert_eq!(tombstone.reason, "leaked credentials");
            assert_eq!(tombstone.deleted_by, "sec@example.com");
        }
        other => panic!("expected ObjectDeleted, got {other:?}"),
    }
    // Untouched files are unaffected.
    assert_eq!(session.read_file("README.md").await.expect("read"), b"public");
}

#[tokio::test]
async fn scrubbing_preserves_commit_structure() {
    let (repo, _storage, commit) = repo_with_secret().await;
    let hash = ContentHash::of(b"TOKEN=hunter2");

    let session = repo
        .session(ChangesetRef::Commit(commit.clone()))
        .await
        .expect("session");
    let before = session.list_directory("config").await.expect("before");

    repo.scrub_content(&hash, "leaked", "sec").await.expect("scrub");

    // The manifest still lists the same name, size and hash; only the
    // object bytes are gone.
    let after = session.list_directory("config").await.expect("after");
    assert_eq!(before, after);
    assert_eq!(after[0].name, "secrets.env");
    assert_eq!(after[0].hash, hash);
    assert!(session
        .file_exists("config/secrets.env")
        .await
        .expect("exists"));
}

#[tokio::test]
async fn scrub_registers_in_the_tombstone_listing() {
    let (repo, _storage, _commit) = repo_with_secret().await;
    let hash = ContentHash::of(b"TOKEN=hunter2");

    assert!(repo.list_scrubbed_content().await.expect("list").is_empty());
    repo.scrub_content(&hash, "leaked", "sec").await.expect("scrub");

    let scrubbed = repo.list_scrubbed_content().await.expect("list");
    assert_eq!(scrubbed.len(), 1);
    assert_eq!(scrubbed[0].0, hash);
    assert_eq!(scrubbed[0].1.reason, "leaked");
}

#[tokio::test]
async fn scrub_by_path_walks_manifests_only() {
    let (repo, storage, commit) = repo_with_secret().await;
    let hash = ContentHash::of(b"TOKEN=hunter2");

    let tombstone = repo
        .scrub_path(
            &RepoPath::new("config/secrets.env"),
            &commit,
            "leaked",
            "sec",
        )
        .await
        .expect("scrub by path");
    assert_eq!(tombstone.deleted_hash, hash);
    assert!(!storage.object_exists(&hash).await.expect("exists"));
}

#[tokio::test]
async fn scrub_path_misses_fail_cleanly() {
    let (repo, _storage, commit) = repo_with_secret().await;

    assert!(matches!(
        repo.scrub_path(&RepoPath::new("config/missing.env"), &commit, "r", "d")
            .await,
        Err(Error::FileNotFound(_))
    ));
    // A directory is not scrubbable content.
    assert!(matches!(
        repo.scrub_path(&RepoPath::new("config"), &commit, "r", "d").await,
        Err(Error::FileNotFound(_))
    ));
    assert!(matches!(
        repo.scrub_path(&RepoPath::root(), &commit, "r", "d").await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn scrubbing_an_unknown_or_already_scrubbed_hash_fails() {
    let (repo, _storage, _commit) = repo_with_secret().await;
    let hash = ContentHash::of(b"TOKEN=hunter2");

    assert!(matches!(
        repo.scrub_content(&ContentHash::of(b"never stored"), "r", "d")
            .await,
        Err(Error::FileNotFound(_))
    ));

    repo.scrub_content(&hash, "leaked", "sec").await.expect("scrub");
    // The tombstone makes the object non-existent for a second scrub.
    assert!(matches!(
        repo.scrub_content(&hash, "again", "sec").await,
        Err(Error::FileNotFound(_))
    ));
}

#[tokio::test]
async fn scrub_hits_every_path_sharing_the_content() {
    let storage = Arc::new(MemoryStorage::new());
    let repo = Repository::init(storage.clone()).await.expect("init repo");

    let ws = repo
        .create_workspace_on_branch("main", "test")
        .await
        .expect("create workspace");
    let session = repo
        .session(ChangesetRef::Workspace(ws.clone()))
        .await
        .expect("session");
    // Same bytes at two paths: one object, one hash.
    session.write_file("a/copy1.bin", b"shared").await.expect("write");
    session.write_file("b/copy2.bin", b"shared").await.expect("write");
    let commit = repo
        .publish_workspace(&ws, "main", "dup", "test")
        .await
        .expect("publish");

    repo.scrub_content(&ContentHash::of(b"shared"), "leak", "sec")
        .await
        .expect("scrub");

    let session = repo
        .session(ChangesetRef::Commit(commit))
        .await
        .expect("session");
    assert!(matches!(
        session.read_file("a/copy1.bin").await,
        Err(Error::ObjectDeleted { .. })
    ));
    assert!(matches!(
        session.read_file("b/copy2.bin").await,
        Err(Error::ObjectDeleted { .. })
    ));
}

#[tokio::test]
async fn workspace_reads_of_scrubbed_base_content_surface_the_tombstone() {
    let (repo, _storage, commit) = repo_with_secret().await;
    let hash = ContentHash::of(b"TOKEN=hunter2");
    repo.scrub_content(&hash, "leaked", "sec").await.expect("scrub");

    let ws = repo.create_workspace(&commit, "test").await.expect("create");
    let session = repo
        .session(ChangesetRef::Workspace(ws))
        .await
        .expect("session");
    assert!(matches!(
        session.read_file("config/secrets.env").await,
        Err(Error::ObjectDeleted { .. })
    ));
    // Writing fresh content over the scrubbed path works fine.
    session
        .write_file("config/secrets.env", b"TOKEN=rotated")
        .await
        .expect("write");
    assert_eq!(
        session.read_file("config/secrets.env").await.expect("read"),
        b"TOKEN=rotated"
    );
}
