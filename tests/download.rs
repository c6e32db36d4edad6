// tests/download.rs

//! Part download tests: resume, corruption, URL expiry and bounded retry.

mod common;

use common::{build_gene, fast_options, gene, noise, open_store, set, BuiltGene, FakeRepository};
use genepool::identity::Architecture;
use genepool::progress::GeneProgress;
use genepool::repository::{download_part, PartDownloadOptions};
use genepool::{Error, GeneRepository, GeneResolver, GeneSetManifest, ProgressCallback, ResolverOptions};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const VOLUME: &str = "volume::gene:acme/os/1.0:sda";

/// Repository serving one volume gene of `len` bytes in parts of 4 KiB
fn volume_repository(len: usize, seed: u32) -> (Arc<FakeRepository>, BuiltGene) {
    let built = build_gene(&noise(len, seed), 4096);
    let repo = FakeRepository::new("primary");
    repo.add_geneset(GeneSetManifest::new(set("acme/os/1.0")).with_volume("sda", Architecture::any(), built.hash()));
    repo.add_gene(&built);
    (repo, built)
}

fn resolver_with(root: &Path, repo: &Arc<FakeRepository>, options: ResolverOptions) -> GeneResolver {
    let repository: Arc<dyn GeneRepository> = repo.clone();
    GeneResolver::new(open_store(root), vec![repository], options)
}

fn partial_file(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap().to_os_string();
    name.push(".download");
    dest.with_file_name(name)
}

fn idle_after(idle: Duration) -> PartDownloadOptions {
    PartDownloadOptions {
        idle_timeout: idle,
        ..PartDownloadOptions::default()
    }
}

fn collector() -> (ProgressCallback, Arc<Mutex<Vec<GeneProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (Arc::new(move |p: GeneProgress| sink.lock().push(p)), events)
}

#[tokio::test]
async fn test_download_and_merge() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(30_000, 7);
    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let (progress, events) = collector();

    let content = resolver
        .provide(&gene(VOLUME), None, Some(progress), &CancellationToken::new())
        .await
        .unwrap();

    assert!(built.parts.len() > 3);
    assert_eq!(std::fs::read(&content.path).unwrap(), built.content);
    assert_eq!(content.size, built.content.len() as u64);
    assert!(content.path.ends_with("volumes/any/sda.vhdx"));
    assert!(resolver.store().ledger(&set("acme/os/1.0")).unwrap().contains(&built.hash()));

    let events = events.lock();
    assert!(events.windows(2).all(|w| w[0].done < w[1].done));
    assert_eq!(
        events.last(),
        Some(&GeneProgress {
            done: built.manifest.size,
            total: built.manifest.size
        })
    );

    // Temporary parts are gone after the merge
    let tmp = temp.path().join("acme/os/1.0/.tmp").join(built.hash().hash_value());
    assert!(!tmp.exists());
}

#[tokio::test]
async fn test_resume_skips_verified_parts() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(30_000, 11);
    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let store = resolver.store();
    let geneset = set("acme/os/1.0");

    // An earlier run got the first three parts
    store.save_gene_manifest(&geneset, &built.manifest).unwrap();
    for (part, body) in built.manifest.parts.iter().zip(&built.parts).take(3) {
        std::fs::write(store.part_path(&geneset, &built.hash(), part), body).unwrap();
    }
    let staged: u64 = built.parts.iter().take(3).map(|p| p.len() as u64).sum();

    let (progress, events) = collector();
    let content = resolver
        .provide(&gene(VOLUME), None, Some(progress), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&content.path).unwrap(), built.content);
    for (index, part) in built.manifest.parts.iter().enumerate() {
        let expected = if index < 3 { 0 } else { 1 };
        assert_eq!(repo.part_downloads(part), expected, "part {index}");
    }
    assert_eq!(events.lock().first().map(|p| p.done), Some(staged));
}

#[tokio::test]
async fn test_corrupt_part_on_disk_is_redownloaded() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(20_000, 13);
    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let store = resolver.store();
    let geneset = set("acme/os/1.0");

    store.save_gene_manifest(&geneset, &built.manifest).unwrap();
    let first = &built.manifest.parts[0];
    std::fs::write(store.part_path(&geneset, &built.hash(), first), b"garbage").unwrap();

    let downloaded = store.get_downloaded_parts(&gene(VOLUME), &built.hash()).unwrap();
    assert!(downloaded.is_empty());
    assert!(!store.part_path(&geneset, &built.hash(), first).exists());

    resolver
        .provide(&gene(VOLUME), None, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(repo.part_downloads(first), 1);
}

#[tokio::test]
async fn test_corrupted_transfer_is_retried() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(20_000, 17);
    let second = built.manifest.parts[1].clone();
    repo.corrupt_part(&second, 1);

    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let content = resolver
        .provide(&gene(VOLUME), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&content.path).unwrap(), built.content);
    assert_eq!(repo.part_downloads(&second), 2);
    assert_eq!(repo.part_downloads(&built.manifest.parts[0]), 1);
    assert_eq!(repo.gene_calls(), 2);
}

#[tokio::test]
async fn test_expiring_urls_are_refreshed_before_use() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(20_000, 19);
    repo.expire_urls(1);

    let resolver = resolver_with(temp.path(), &repo, fast_options());
    resolver
        .provide(&gene(VOLUME), None, None, &CancellationToken::new())
        .await
        .unwrap();

    // The stale URL set was never used
    assert_eq!(repo.gene_calls(), 2);
    assert_eq!(repo.part_calls(), built.parts.len());
}

#[tokio::test]
async fn test_expiring_urls_count_against_rounds() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, _built) = volume_repository(20_000, 23);
    repo.expire_urls(u32::MAX);

    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let result = resolver
        .provide(&gene(VOLUME), None, None, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::IncompleteTransfer { .. })));
    assert_eq!(repo.gene_calls(), fast_options().retry.rounds as usize);
    assert_eq!(repo.part_calls(), 0);
}

#[tokio::test]
async fn test_incomplete_transfer_keeps_verified_parts() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(30_000, 29);
    let stuck = built.manifest.parts[2].clone();
    repo.fail_part(&stuck, u32::MAX);

    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let cancel = CancellationToken::new();
    let result = resolver.provide(&gene(VOLUME), None, None, &cancel).await;

    match result {
        Err(Error::IncompleteTransfer { missing, total, .. }) => {
            assert_eq!(total, built.parts.len());
            assert_eq!(missing, built.parts.len() - 2);
        }
        other => panic!("expected incomplete transfer, got {other:?}"),
    }
    assert!(!resolver.store().ledger(&set("acme/os/1.0")).unwrap().contains(&built.hash()));

    let downloaded = resolver.store().get_downloaded_parts(&gene(VOLUME), &built.hash()).unwrap();
    assert_eq!(downloaded.len(), 2);

    // Once the repository recovers only the rest is fetched
    repo.fail_part(&stuck, 0);
    let content = resolver.provide(&gene(VOLUME), None, None, &cancel).await.unwrap();
    assert_eq!(std::fs::read(&content.path).unwrap(), built.content);
    assert_eq!(repo.part_downloads(&built.manifest.parts[0]), 1);
    assert_eq!(repo.part_downloads(&stuck), 1);
}

#[tokio::test]
async fn test_known_hash_skips_geneset_resolution() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(10_000, 31);

    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let content = resolver
        .provide(&gene(VOLUME), Some(built.hash()), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(content.hash, built.hash());
    assert_eq!(repo.geneset_calls(), 0);
}

#[tokio::test]
async fn test_merged_size_mismatch_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let mut built = build_gene(&noise(10_000, 37), 4096);
    built.manifest.original_size += 1;

    let repo = FakeRepository::new("primary");
    repo.add_gene(&built);

    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let id = gene(VOLUME);
    let result = resolver
        .provide(&id, Some(built.hash()), None, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::Integrity { .. })));
    // One automatic re-download before giving up
    assert_eq!(repo.gene_calls(), 2);
    assert!(!resolver.store().layout().content(&id).exists());
    assert!(!resolver.store().ledger(&set("acme/os/1.0")).unwrap().contains(&built.hash()));
}

#[tokio::test]
async fn test_cached_gene_needs_no_repository() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(10_000, 41);
    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let cancel = CancellationToken::new();

    let first = resolver.provide(&gene(VOLUME), None, None, &cancel).await.unwrap();
    repo.fail_genesets(Error::transient("primary", "offline"));
    repo.fail_genes(Error::transient("primary", "offline"));

    let second = resolver.provide(&gene(VOLUME), None, None, &cancel).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        resolver.store().get_cached_content(&gene(VOLUME)).unwrap().map(|c| c.hash),
        Some(built.hash())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_genes_sharing_a_hash_download_once() {
    for seed in 0..5 {
        let temp = tempfile::tempdir().unwrap();
        let built = build_gene(&noise(30_000, 43 + seed), 4096);
        let repo = FakeRepository::new("primary");
        repo.add_geneset(
            GeneSetManifest::new(set("acme/os/1.0"))
                .with_volume("sda", Architecture::any(), built.hash())
                .with_volume("sdb", Architecture::any(), built.hash()),
        );
        repo.add_gene(&built);
        repo.set_latency(Duration::from_millis(1));

        let resolver = resolver_with(temp.path(), &repo, fast_options());
        let fetch = |name: &str| {
            let resolver = resolver.clone();
            let id = gene(&format!("volume::gene:acme/os/1.0:{name}"));
            tokio::spawn(async move { resolver.provide(&id, None, None, &CancellationToken::new()).await })
        };
        let (a, b) = (fetch("sda"), fetch("sdb"));
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        assert_ne!(a.path, b.path);
        assert_eq!(std::fs::read(&a.path).unwrap(), built.content);
        assert_eq!(std::fs::read(&b.path).unwrap(), built.content);
        for part in &built.manifest.parts {
            assert_eq!(repo.part_downloads(part), 1);
        }
        assert_eq!(repo.gene_calls(), 1);
        assert_eq!(resolver.store().active_transfers(), 0);
        assert!(!temp.path().join("acme/os/1.0/.tmp").join(built.hash().hash_value()).exists());
    }
}

#[tokio::test]
async fn test_stalled_part_times_out() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(20_000, 47);
    let part = built.manifest.parts[0].clone();
    repo.stall_part(&part);

    let info = repo
        .fetch_gene_manifest(&set("acme/os/1.0"), &built.hash())
        .await
        .unwrap()
        .unwrap();
    let dest = temp.path().join(part.hash_value());
    let mut received = 0;

    let result = download_part(
        &*repo,
        &info,
        &part,
        &dest,
        &idle_after(Duration::from_millis(50)),
        &CancellationToken::new(),
        &mut |n: u64| received += n,
    )
    .await;

    assert!(matches!(result, Err(Error::Transient { .. })), "{result:?}");
    assert!(received > 0);
    assert!(!dest.exists());
    assert!(!partial_file(&dest).exists());
}

#[tokio::test]
async fn test_cancelled_part_transfer_leaves_no_file() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(20_000, 53);
    let part = built.manifest.parts[1].clone();
    repo.stall_part(&part);

    let info = repo
        .fetch_gene_manifest(&set("acme/os/1.0"), &built.hash())
        .await
        .unwrap()
        .unwrap();
    let dest = temp.path().join(part.hash_value());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = download_part(
        &*repo,
        &info,
        &part,
        &dest,
        &PartDownloadOptions::default(),
        &cancel,
        &mut |_: u64| {},
    )
    .await;

    assert_eq!(result, Err(Error::Cancelled));
    assert!(!dest.exists());
    assert!(!partial_file(&dest).exists());
}

#[tokio::test]
async fn test_cancelled_download_keeps_only_verified_parts() {
    let temp = tempfile::tempdir().unwrap();
    let (repo, built) = volume_repository(30_000, 59);
    let stuck = built.manifest.parts[2].clone();
    repo.stall_part(&stuck);

    let resolver = resolver_with(temp.path(), &repo, fast_options());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let result = resolver.provide(&gene(VOLUME), None, None, &cancel).await;
    assert_eq!(result, Err(Error::Cancelled));

    let store = resolver.store();
    let downloaded = store.get_downloaded_parts(&gene(VOLUME), &built.hash()).unwrap();
    assert_eq!(downloaded.len(), 2);
    assert!(!downloaded.contains_key(&stuck));

    let dest = store.part_path(&set("acme/os/1.0"), &built.hash(), &stuck);
    assert!(!dest.exists());
    assert!(!partial_file(&dest).exists());
    assert!(!store.ledger(&set("acme/os/1.0")).unwrap().contains(&built.hash()));
    assert_eq!(store.active_transfers(), 0);
}
