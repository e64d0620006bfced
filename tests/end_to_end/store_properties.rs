//! Store behaviour through the server facade

use crate::test_utils::memory_server;
use simplekv::{KvError, VersionSelector};
use std::sync::Arc;

#[tokio::test]
async fn test_nth_update_is_current() {
    let (server, _) = memory_server().await;
    for i in 0..10 {
        let version = server.set("counter", format!("v{}", i)).unwrap();
        assert_eq!(version, i);
    }
    assert_eq!(server.get("counter").unwrap(), b"v9");
    for i in 0..10u64 {
        let selector: VersionSelector = i.to_string().parse().unwrap();
        assert_eq!(
            server.get_version("counter", selector).unwrap(),
            format!("v{}", i).into_bytes()
        );
    }
    assert!(matches!(
        "latest".parse::<VersionSelector>(),
        Ok(VersionSelector::Latest)
    ));
    assert!(matches!(
        "-1".parse::<VersionSelector>(),
        Err(KvError::InvalidVersion { .. })
    ));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_version_counter_is_monotonic() {
    let (server, _) = memory_server().await;
    server.set("k", "a").unwrap();
    let mut last: u64 = server.get_metadata("k", "Version").unwrap().parse().unwrap();
    assert_eq!(last, 1);

    let steps: [&dyn Fn(); 4] = [
        &|| {
            server.set("k", "b").unwrap();
        },
        &|| {
            server.set_metadata("k", "color", "blue").unwrap();
        },
        &|| {
            server.set_metadata("k", "color", "red").unwrap();
        },
        &|| {
            server.delete_metadata("k", "color").unwrap();
        },
    ];
    for step in steps {
        step();
        let now: u64 = server.get_metadata("k", "Version").unwrap().parse().unwrap();
        assert_eq!(now, last + 1);
        last = now;
    }
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_metadata_round_trip() {
    let (server, _) = memory_server().await;
    server.set("doc", "body").unwrap();
    server.set_metadata("doc", "author", "ann").unwrap();
    assert_eq!(server.get_metadata("doc", "author").unwrap(), "ann");

    server.delete_metadata("doc", "author").unwrap();
    assert!(matches!(
        server.get_metadata("doc", "author"),
        Err(KvError::MetadataKeyNotFound { .. })
    ));
    assert!(matches!(
        server.delete_metadata("doc", "author"),
        Err(KvError::MetadataKeyNotFound { .. })
    ));
    assert!(matches!(
        server.set_metadata("doc", "", "x"),
        Err(KvError::EmptyKey)
    ));
    assert!(matches!(
        server.set_metadata("doc", "k", ""),
        Err(KvError::EmptyValue)
    ));
    assert!(matches!(
        server.delete_metadata("doc", "Version"),
        Err(KvError::ReservedMetadataKey { .. })
    ));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_prefix_search() {
    let (server, _) = memory_server().await;
    for key in ["apple", "app", "banana"] {
        server.set(key, "x").unwrap();
    }
    assert_eq!(server.find("app").unwrap(), vec!["app", "apple"]);
    assert!(server.find("appzz").unwrap().is_empty());
    assert_eq!(server.find("").unwrap().len(), 3);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_metadata_query_conjunction() {
    let (server, _) = memory_server().await;
    for (key, age, name) in [("a", "20", "x"), ("b", "15", "x"), ("c", "30", "y")] {
        server.set(key, "v").unwrap();
        server.set_metadata(key, "age", age).unwrap();
        server.set_metadata(key, "name", name).unwrap();
    }
    server.set("d", "no metadata").unwrap();

    assert_eq!(server.find_by_metadata("age:>=:18").unwrap(), vec!["a", "c"]);
    assert_eq!(
        server.find_by_metadata("age:>=:18,name:==:x").unwrap(),
        vec!["a"]
    );
    assert_eq!(server.find_by_metadata("name:contains:y").unwrap(), vec!["c"]);
    assert!(matches!(
        server.find_by_metadata("age:~:18"),
        Err(KvError::InvalidQuery { .. })
    ));
    assert!(matches!(
        server.find_by_metadata("age>=18"),
        Err(KvError::InvalidQuery { .. })
    ));
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers() {
    let (server, _) = memory_server().await;
    let server = Arc::new(server);

    std::thread::scope(|scope| {
        for t in 0..8 {
            let server = Arc::clone(&server);
            scope.spawn(move || {
                for i in 0..50 {
                    server.set(&format!("t{}-{}", t, i), "v").unwrap();
                    server.set("shared", format!("{}-{}", t, i)).unwrap();
                }
            });
        }
    });

    assert_eq!(server.find("t").unwrap().len(), 400);
    assert!(server.get_version("shared", VersionSelector::At(399)).is_ok());
    assert!(server.get_version("shared", VersionSelector::At(400)).is_err());
    server.stop().await.unwrap();
}
