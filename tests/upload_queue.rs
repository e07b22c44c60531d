mod common;

use common::ScriptedEndpoint;
use contentdesk::inventory::FileInventory;
use contentdesk::transfer::LocalFile;
use contentdesk::upload_queue::{ItemStatus, UploadQueue};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

const PROJECT_DIR: &str = "projects/42/assets";

fn setup(limit: Option<usize>) -> (Arc<ScriptedEndpoint>, FileInventory, UploadQueue) {
    let endpoint = Arc::new(ScriptedEndpoint::default());
    let inventory = FileInventory::new(endpoint.clone());
    let queue = UploadQueue::new(endpoint.clone(), inventory.clone(), PROJECT_DIR, limit);
    (endpoint, inventory, queue)
}

fn file(name: &str, size: usize) -> LocalFile {
    LocalFile::from_bytes(name, vec![7u8; size])
}

async fn settle(queue: &UploadQueue) {
    timeout(Duration::from_secs(2), queue.wait_idle())
        .await
        .expect("uploads never settled");
}

#[tokio::test]
async fn test_failed_item_does_not_affect_siblings() {
    let (endpoint, _inventory, queue) = setup(None);
    endpoint.respond_with("b.png", 500);

    let ids = queue.enqueue(vec![
        file("a.png", 1000),
        file("b.png", 2000),
        file("c.png", 3000),
    ]);
    assert_eq!(ids.len(), 3);
    assert!(queue.is_busy());

    settle(&queue).await;
    assert!(!queue.is_busy());

    let a = queue.item(&ids[0]).unwrap();
    let b = queue.item(&ids[1]).unwrap();
    let c = queue.item(&ids[2]).unwrap();

    assert_eq!(a.status, ItemStatus::Success);
    assert_eq!(a.progress_percent, 100);
    assert_eq!(c.status, ItemStatus::Success);
    assert_eq!(c.progress_percent, 100);

    assert_eq!(b.status, ItemStatus::Error);
    assert!(b.error_detail.unwrap().contains("500"));

    let summary = queue.summary();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.is_busy());
}

#[tokio::test]
async fn test_items_keep_input_order_and_destination() {
    let (_endpoint, _inventory, queue) = setup(Some(3));

    let ids = queue.enqueue(vec![file("one.txt", 10), file("two.txt", 10)]);
    queue.set_destination("projects/43");
    let later = queue.enqueue(vec![file("three.txt", 10)]);

    let items = queue.items();
    let names: Vec<_> = items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, ["one.txt", "two.txt", "three.txt"]);
    assert_eq!(items[0].id, ids[0]);
    assert_eq!(items[0].destination, PROJECT_DIR);
    assert_eq!(items[2].id, later[0]);
    assert_eq!(items[2].destination, "projects/43");

    settle(&queue).await;
}

#[tokio::test]
async fn test_progress_never_moves_backwards() {
    let (endpoint, _inventory, queue) = setup(None);

    let ids = queue.enqueue(vec![file("clip.mp4", 4096)]);
    let mut changes = queue.subscribe();
    let mut observed = Vec::new();

    timeout(Duration::from_secs(2), async {
        loop {
            let item = queue.item(&ids[0]).unwrap();
            observed.push(item.progress_percent);
            if item.status.is_terminal() {
                break;
            }
            changes.changed().await.unwrap();
        }
    })
    .await
    .expect("upload never finished");

    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(observed.last(), Some(&100));

    let ticks = endpoint.ticks("clip.mp4");
    assert_eq!(ticks.len(), 4);
    assert_eq!(ticks.last(), Some(&(4096, 4096)));
}

#[tokio::test]
async fn test_clear_finished_only_removes_terminal_items() {
    let (endpoint, _inventory, queue) = setup(Some(1));
    endpoint.respond_with("bad.bin", 502);

    queue.enqueue(vec![file("good.bin", 100), file("bad.bin", 100)]);
    settle(&queue).await;

    let pending = queue.enqueue(vec![file("late.bin", 100)]);
    assert_eq!(queue.clear_finished(), 2);

    let items = queue.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, pending[0]);
    assert!(items[0].status.is_active());

    settle(&queue).await;
    assert_eq!(queue.clear_finished(), 1);
    assert!(queue.items().is_empty());
}

#[tokio::test]
async fn test_cancel_pending_item_while_queue_is_full() {
    let (_endpoint, _inventory, queue) = setup(Some(1));

    let ids = queue.enqueue(vec![
        file("first.bin", 100),
        file("second.bin", 100),
        file("third.bin", 100),
    ]);
    assert!(queue.cancel(&ids[2]));
    assert!(!queue.cancel("missing"));

    settle(&queue).await;

    assert_eq!(queue.item(&ids[0]).unwrap().status, ItemStatus::Success);
    assert_eq!(queue.item(&ids[1]).unwrap().status, ItemStatus::Success);

    let cancelled = queue.item(&ids[2]).unwrap();
    assert_eq!(cancelled.status, ItemStatus::Error);
    assert_eq!(cancelled.progress_percent, 0);
    assert_eq!(cancelled.error_detail.as_deref(), Some("Upload cancelled"));
}

#[tokio::test]
async fn test_success_refreshes_listing_being_shown() {
    let (endpoint, inventory, queue) = setup(None);
    inventory.scope(PROJECT_DIR);
    inventory.refresh(PROJECT_DIR).await.unwrap();
    assert!(inventory.is_empty());

    let mut listing = inventory.subscribe();
    queue.enqueue(vec![file("hero.png", 512)]);
    settle(&queue).await;

    timeout(Duration::from_secs(2), async {
        while inventory.get("hero.png").is_none() {
            listing.changed().await.unwrap();
        }
    })
    .await
    .expect("listing never picked up the upload");

    assert_eq!(inventory.get("hero.png").unwrap().size, 512);
    assert!(endpoint.list_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_success_refreshes_unscoped_listing() {
    let (endpoint, inventory, queue) = setup(None);
    assert_eq!(inventory.path(), None);

    let mut listing = inventory.subscribe();
    queue.enqueue(vec![file("a.png", 256)]);
    settle(&queue).await;

    timeout(Duration::from_secs(2), async {
        while inventory.get("a.png").is_none() {
            listing.changed().await.unwrap();
        }
    })
    .await
    .expect("listing never picked up the upload");

    assert_eq!(endpoint.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(inventory.path().as_deref(), Some(PROJECT_DIR));
    assert_eq!(inventory.len(), 1);
}

#[tokio::test]
async fn test_success_does_not_refresh_cleared_listing() {
    let (endpoint, inventory, queue) = setup(None);
    inventory.scope(PROJECT_DIR);
    inventory.refresh(PROJECT_DIR).await.unwrap();
    inventory.clear();
    let calls_before = endpoint.list_calls.load(Ordering::SeqCst);

    queue.enqueue(vec![file("hero.png", 512)]);
    settle(&queue).await;
    tokio::task::yield_now().await;

    assert_eq!(endpoint.list_calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(inventory.path(), None);
    assert!(inventory.is_empty());
}

#[tokio::test]
async fn test_success_does_not_refresh_other_listing() {
    let (endpoint, inventory, queue) = setup(None);
    inventory.scope("projects/99");
    inventory.refresh("projects/99").await.unwrap();
    let calls_before = endpoint.list_calls.load(Ordering::SeqCst);

    queue.enqueue(vec![file("hero.png", 512)]);
    settle(&queue).await;
    tokio::task::yield_now().await;

    assert_eq!(endpoint.list_calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(inventory.path().as_deref(), Some("projects/99"));
    assert!(inventory.get("hero.png").is_none());
}

#[tokio::test]
async fn test_remove_deletes_from_destination() {
    let (endpoint, inventory, queue) = setup(None);
    endpoint.store(PROJECT_DIR, contentdesk::FileRecord::file("old.png", 10));
    endpoint.store(PROJECT_DIR, contentdesk::FileRecord::file("keep.png", 20));
    inventory.scope(PROJECT_DIR);
    inventory.refresh(PROJECT_DIR).await.unwrap();
    assert_eq!(inventory.len(), 2);

    queue.remove("old.png").await.unwrap();
    assert!(inventory.get("old.png").is_none());
    assert!(inventory.get("keep.png").is_some());

    endpoint.fail_delete(&format!("{}/keep.png", PROJECT_DIR));
    let err = queue.remove("keep.png").await.unwrap_err();
    assert!(err.to_string().contains("403"));
    assert!(inventory.get("keep.png").is_some());
}
