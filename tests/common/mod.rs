//! Shared setup for the front end integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use chatsift::backend::LocalBackend;
use chatsift::cache::{Persist, SharedResources};
use chatsift::channels::FrontendContext;
use chatsift::config::PoolConfig;
use chatsift::engines::NewMessage;
use chatsift::handlers::{HandlerSettings, register_default_handlers};
use chatsift::worker::{HandlerRegistry, WorkerPool};

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub dir: TempDir,
    pub resources: Arc<SharedResources>,
    pub pool: WorkerPool,
    pub ctx: Arc<FrontendContext>,
}

/// Data dir holding dataset `demo` (bubble `b1`, users alice and bob) and a
/// running pool with every handler registered.
pub fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let backend = LocalBackend::new(dir.path());
    backend.ensure_dirs().unwrap();
    let resources = Arc::new(SharedResources::new(Arc::new(backend)));

    let dataset = resources.dataset_or_create("demo").unwrap();
    dataset.create_bubble("b1", "General");
    let base = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
    let messages = [
        ("m1", "alice", "Alice", "When is the release date?", 0),
        ("m2", "bob", "Bob", "The release date is Friday", 2),
        ("m3", "bot", "Bot", "Reminder: release date is Friday", 3),
    ];
    dataset
        .insert_messages(
            "b1",
            messages
                .iter()
                .map(|(id, author, name, content, minutes)| NewMessage {
                    id: id.to_string(),
                    author_id: author.to_string(),
                    author_name: name.to_string(),
                    content: content.to_string(),
                    date: base + chrono::Duration::minutes(*minutes),
                    answered_message_id: None,
                })
                .collect(),
        )
        .unwrap();
    dataset.flush().unwrap();

    let mut handlers = HandlerRegistry::new();
    register_default_handlers(&mut handlers, Arc::clone(&resources), HandlerSettings::default());
    let pool = WorkerPool::start(
        &PoolConfig {
            workers: 2,
            dedicated: BTreeMap::new(),
        },
        handlers,
    )
    .unwrap();

    let ctx = Arc::new(FrontendContext {
        dispatcher: pool.dispatcher(),
        resources: Arc::clone(&resources),
        default_search_engine: "default".into(),
        excluded_users: vec!["bot".into()],
    });

    Harness {
        dir,
        resources,
        pool,
        ctx,
    }
}
