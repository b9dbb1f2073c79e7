//! Integration test: upload → download round-trips against the in-memory remote
//!
//! Exercises the full pipeline: accumulate → chunk → encrypt → store →
//! finalize → fetch → decrypt → reorder → slice.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{metadata_key, new_task, new_task_with_limits, random_bytes, InstrumentedStore};
use cvfs_core::{ChunkStore, DirectoryService, FileMetadata, CHUNK_SIZE};
use cvfs_transfer::{
    download, download_to_writer, upload_reader, DownloadOptions, DownloadRequest, RetryPolicy,
    TransferLimits, UploadPhase,
};
use sha2::{Digest, Sha512};

const S: usize = CHUNK_SIZE as usize;

fn options() -> DownloadOptions {
    DownloadOptions::default().with_retry(RetryPolicy::immediate(3))
}

#[tokio::test]
async fn roundtrip_four_mib() {
    let store = InstrumentedStore::new();
    let data = random_bytes(4 * S);

    let task = new_task(&store, "four.bin").await;
    task.write(&data).await.unwrap();
    let finalized = task.finish().await.unwrap();

    assert_eq!(finalized.entry.chunk_count, 4);
    assert_eq!(finalized.entry.metadata.size, data.len() as u64);
    assert_eq!(store.stores(), 4);
    assert_eq!(task.phase().await, UploadPhase::Done);

    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let out = download(store.as_ref(), &TransferLimits::default(), &request, &options())
        .await
        .unwrap();
    assert_eq!(out.len(), data.len());
    assert!(out[..] == data[..], "downloaded bytes must match upload");
}

#[tokio::test]
async fn uneven_writes_produce_the_same_chunks() {
    let store = InstrumentedStore::new();
    let data = random_bytes(2 * S + 12_345);

    let task = new_task(&store, "pieces.bin").await;
    for piece in data.chunks(300_001) {
        task.write(piece).await.unwrap();
    }
    let finalized = task.finish().await.unwrap();
    assert_eq!(finalized.entry.chunk_count, 3);

    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let out = download(store.as_ref(), &TransferLimits::default(), &request, &options())
        .await
        .unwrap();
    assert!(out[..] == data[..]);
}

#[tokio::test]
async fn empty_upload_stores_nothing() {
    let store = InstrumentedStore::new();
    let task = new_task(&store, "empty.txt").await;
    let finalized = task.finish().await.unwrap();

    assert_eq!(finalized.entry.chunk_count, 0);
    assert_eq!(store.stores(), 0);
    assert_eq!(
        finalized.entry.locator,
        store.inner.default_locator(finalized.entry.id)
    );
    assert_eq!(
        finalized.entry.metadata.hash.as_deref(),
        Some(hex::encode(Sha512::digest(b"")).as_str())
    );

    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let out = download(store.as_ref(), &TransferLimits::default(), &request, &options())
        .await
        .unwrap();
    assert!(out.is_empty());
    assert_eq!(store.fetches(), 0);
}

#[tokio::test]
async fn partial_range_fetches_only_covering_chunks() {
    let store = InstrumentedStore::new();
    let data = random_bytes(5 * S);

    let task = new_task(&store, "five.bin").await;
    task.write(&data).await.unwrap();
    let finalized = task.finish().await.unwrap();
    store.reset_counters();

    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let (start, end) = ((S - 512) as u64, (S + 512) as u64);
    let out = download(
        store.as_ref(),
        &TransferLimits::default(),
        &request,
        &options().range(Some(start), Some(end)),
    )
    .await
    .unwrap();

    assert_eq!(out.len(), 1024);
    assert!(out[..] == data[S - 512..S + 512]);
    assert_eq!(store.fetches(), 2);
}

#[tokio::test]
async fn range_beyond_end_is_empty() {
    let store = InstrumentedStore::new();
    let task = new_task(&store, "small.bin").await;
    task.write(b"just a few bytes").await.unwrap();
    let finalized = task.finish().await.unwrap();
    store.reset_counters();

    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let out = download(
        store.as_ref(),
        &TransferLimits::default(),
        &request,
        &options().range(Some(CHUNK_SIZE + 1), Some(CHUNK_SIZE + 100)),
    )
    .await
    .unwrap();
    assert!(out.is_empty());
    assert_eq!(store.fetches(), 0);
}

#[tokio::test]
async fn metadata_is_sealed_with_hash() {
    let store = InstrumentedStore::new();
    let data = random_bytes(S + 1);

    let task = new_task(&store, "hashed.bin").await;
    task.write(&data).await.unwrap();
    let finalized = task.finish().await.unwrap();

    assert!(!finalized.sealed.metadata.contains("hashed.bin"));
    let opened: FileMetadata =
        cvfs_crypto::open_metadata(&metadata_key(), &finalized.sealed.metadata).unwrap();
    assert_eq!(opened, finalized.entry.metadata);
    assert_eq!(
        opened.hash.unwrap(),
        hex::encode(Sha512::digest(&data)),
        "hash must cover plaintext in index order"
    );

    let root = store.inner.ensure_root().await.unwrap();
    let listed = store.inner.list_directory(root).await.unwrap();
    assert_eq!(listed, vec![finalized.sealed]);
}

#[tokio::test]
async fn progress_reports_every_byte() {
    let store = InstrumentedStore::new();
    let data = random_bytes(3 * S + 77);
    let uploaded = Arc::new(AtomicU64::new(0));
    let downloaded = Arc::new(AtomicU64::new(0));

    let counter = uploaded.clone();
    let task = new_task(&store, "progress.bin")
        .await
        .with_progress(Arc::new(move |n| {
            counter.fetch_add(n, Ordering::SeqCst);
        }));
    task.write(&data).await.unwrap();
    let finalized = task.finish().await.unwrap();
    assert_eq!(uploaded.load(Ordering::SeqCst), data.len() as u64);

    let counter = downloaded.clone();
    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let opts = options().with_progress(Arc::new(move |n| {
        counter.fetch_add(n, Ordering::SeqCst);
    }));
    download(store.as_ref(), &TransferLimits::default(), &request, &opts)
        .await
        .unwrap();
    assert_eq!(downloaded.load(Ordering::SeqCst), data.len() as u64);
}

#[tokio::test]
async fn reader_and_writer_variants() {
    let store = InstrumentedStore::new();
    let data = random_bytes(2 * S + 999);

    let task = new_task(&store, "streamed.bin").await;
    let mut reader = std::io::Cursor::new(data.clone());
    let finalized = upload_reader(&task, &mut reader).await.unwrap();
    assert_eq!(finalized.entry.chunk_count, 3);

    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let mut sink: Vec<u8> = Vec::new();
    let written = download_to_writer(
        store.as_ref(),
        &TransferLimits::default(),
        &request,
        &options(),
        &mut sink,
    )
    .await
    .unwrap();
    assert_eq!(written, data.len() as u64);
    assert!(sink == data);

    // ranged streaming matches the in-memory slice
    let mut sink: Vec<u8> = Vec::new();
    let (start, end) = (S as u64 - 10, 2 * S as u64 + 10);
    download_to_writer(
        store.as_ref(),
        &TransferLimits::default(),
        &request,
        &options().range(Some(start), Some(end)),
        &mut sink,
    )
    .await
    .unwrap();
    assert!(sink[..] == data[start as usize..end as usize]);
}

#[tokio::test]
async fn shared_task_accepts_concurrent_writers() {
    let store = InstrumentedStore::new();
    let task = Arc::new(new_task(&store, "shared.bin").await);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let task = task.clone();
        handles.push(tokio::spawn(async move {
            task.write(&random_bytes(S / 2 + 3)).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    let finalized = task.finish().await.unwrap();
    assert_eq!(finalized.entry.metadata.size, 4 * (S / 2 + 3) as u64);
    assert_eq!(finalized.entry.chunk_count, 3);
    assert_eq!(task.chunks_uploaded(), 3);
}

#[tokio::test]
async fn chunks_returning_out_of_order_are_reassembled() {
    let store = InstrumentedStore::new();
    let data = random_bytes(5 * S + 4321);

    let task = new_task(&store, "reversed.bin").await;
    task.write(&data).await.unwrap();
    let finalized = task.finish().await.unwrap();
    assert_eq!(finalized.entry.chunk_count, 6);

    store.reverse_fetch_order(Duration::from_millis(25), 6);
    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let out = download(store.as_ref(), &TransferLimits::default(), &request, &options())
        .await
        .unwrap();
    let order = store.fetch_order();
    assert_eq!(order.len(), 6);
    assert_eq!(order[0], 5, "last chunk should come back first: {order:?}");
    assert!(out[..] == data[..]);

    store.fetch_order.lock().unwrap().clear();
    let mut sink: Vec<u8> = Vec::new();
    let written = download_to_writer(
        store.as_ref(),
        &TransferLimits::default(),
        &request,
        &options(),
        &mut sink,
    )
    .await
    .unwrap();
    assert_eq!(store.fetch_order()[0], 5);
    assert_eq!(written, data.len() as u64);
    assert!(sink == data);
}

#[tokio::test]
async fn single_upload_slot_still_finishes() {
    let store = InstrumentedStore::new();
    let limits = TransferLimits::new(1, 1);
    let data = random_bytes(4 * S + 10);

    let task = new_task_with_limits(&store, "one-slot.bin", limits.clone()).await;
    for piece in data.chunks(S / 3) {
        task.write(piece).await.unwrap();
    }
    let finalized = tokio::time::timeout(Duration::from_secs(30), task.finish())
        .await
        .expect("upload with one slot must not stall")
        .unwrap();

    assert_eq!(finalized.entry.chunk_count, 5);
    assert_eq!(task.chunks_uploaded(), 5);
    assert_eq!(limits.available_upload_slots(), 1);

    let request = DownloadRequest::from_entry(&finalized.entry).unwrap();
    let out = download(store.as_ref(), &limits, &request, &options())
        .await
        .unwrap();
    assert!(out[..] == data[..]);
    assert_eq!(limits.available_download_slots(), 1);
}
