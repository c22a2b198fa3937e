use std::{
    collections::HashSet,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use docnrt::{
    Document,
    Error,
    Generation,
    IndexConfig,
    NrtIndex,
    QueryRequest,
    schema::fields,
};

fn eager_index() -> NrtIndex {
    let config = IndexConfig::default()
        .with_staleness(Duration::from_millis(5), Duration::from_secs(60));
    NrtIndex::open_in_ram(config).unwrap()
}

fn doc(id: &str) -> Document {
    Document::new()
        .keyword(fields::ID, id)
        .keyword(fields::PATH, format!("/docs/{id}"))
        .keyword(fields::NAME, id)
        .keyword(fields::SUFFIX, "txt")
        .text(fields::CONTENT, format!("body of {id}"))
}

#[test]
fn concurrent_adds_get_unique_generations_and_become_visible() {
    let index = Arc::new(eager_index());

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                index.add(&doc(&format!("doc{i}"))).unwrap()
            })
        })
        .collect();
    let generations: Vec<Generation> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let unique: HashSet<_> = generations.iter().copied().collect();
    assert_eq!(unique.len(), 100);

    let max = generations.iter().copied().max().unwrap();
    let waiter = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            index.wait_for_generation(max, Duration::from_secs(30))
        })
    };
    waiter.join().unwrap().unwrap();

    let stats = index.stats().unwrap();
    assert!(stats.generation >= max);
    assert_eq!(stats.num_docs, 100);
}

#[test]
fn sequential_generations_strictly_increase() {
    let index = eager_index();
    let mut previous = index.last_generation();
    for i in 0..20 {
        let id = format!("d{i}");
        let steps = [
            index.add(&doc(&id)).unwrap(),
            index.update(&id, &doc(&id)).unwrap(),
            index.delete_by_id(&id).unwrap(),
        ];
        for generation in steps {
            assert!(generation > previous);
            previous = generation;
        }
    }
}

#[test]
fn added_document_is_found_exactly_once() {
    let index = eager_index();
    index.add(&doc("alpha")).unwrap();
    let generation = index.update("alpha", &doc("alpha")).unwrap();
    index.add(&doc("beta")).unwrap();
    index
        .wait_for_generation(generation, Duration::from_secs(10))
        .unwrap();

    let hits = index
        .search(&QueryRequest::new().must(fields::ID, "alpha"), 10)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.id.as_deref(), Some("alpha"));
}

#[test]
fn commit_twice_is_a_noop() {
    let index = eager_index();
    index.add(&doc("a")).unwrap();
    let first = index.commit().unwrap();
    let second = index.commit().unwrap();
    assert_eq!(first, second);
    assert_eq!(index.last_generation(), first);
}

#[test]
fn retired_snapshot_stays_usable_until_released() {
    let index = eager_index();
    index.add(&doc("a")).unwrap();
    index.wait_for_latest(Duration::from_secs(10)).unwrap();

    let old = index.acquire().unwrap();
    let torn_down = index.snapshot_stats().torn_down;

    index.add(&doc("b")).unwrap();
    index.wait_for_latest(Duration::from_secs(10)).unwrap();

    assert_eq!(old.searcher().num_docs(), 1);
    assert_eq!(index.stats().unwrap().num_docs, 2);
    assert_eq!(index.snapshot_stats().torn_down, torn_down);

    old.release();
    assert_eq!(index.snapshot_stats().torn_down, torn_down + 1);
}

#[test]
fn snapshot_generations_never_go_backwards() {
    let index = Arc::new(eager_index());
    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for i in 0..50 {
                index.add(&doc(&format!("w{i}"))).unwrap();
            }
        })
    };

    let mut last = Generation::default();
    while !writer.is_finished() {
        let lease = index.acquire().unwrap();
        assert!(lease.generation() >= last);
        last = lease.generation();
    }
    writer.join().unwrap();
}

#[test]
fn wait_times_out_when_refresh_is_slow() {
    let config = IndexConfig::default()
        .with_staleness(Duration::from_secs(30), Duration::from_secs(60));
    let index = NrtIndex::open_in_ram(config).unwrap();
    let generation = index.add(&doc("a")).unwrap();

    let started = Instant::now();
    match index.wait_for_generation(generation, Duration::from_millis(50)) {
        Err(Error::Timeout {
            target,
            last_refresh_error,
            ..
        }) => {
            assert_eq!(target, generation);
            assert!(last_refresh_error.is_none());
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(Error::Timeout {
        target: generation,
        current: Generation::default(),
        last_refresh_error: None,
    }
    .is_retryable());
}

#[test]
fn close_wakes_pending_waiters() {
    let config = IndexConfig::default()
        .with_staleness(Duration::from_secs(30), Duration::from_secs(60));
    let index = Arc::new(NrtIndex::open_in_ram(config).unwrap());
    let generation = index.add(&doc("a")).unwrap();

    let waiter = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            index.wait_for_generation(generation, Duration::from_secs(60))
        })
    };
    thread::sleep(Duration::from_millis(50));
    index.close().unwrap();

    assert!(matches!(waiter.join().unwrap(), Err(Error::Closed)));
    assert!(matches!(index.acquire(), Err(Error::Closed)));
    assert!(matches!(index.add(&doc("b")), Err(Error::Closed)));
}

#[test]
fn pages_concatenate_to_the_unpaged_result() {
    let index = eager_index();
    for i in 0..45 {
        index.add(&doc(&format!("item{i:02}"))).unwrap();
    }
    index.wait_for_latest(Duration::from_secs(10)).unwrap();

    let request = QueryRequest::new()
        .should(fields::NAME, "item")
        .must_not(fields::NAME, "item07");
    let all = index.search_request(&request, None).unwrap();
    assert_eq!(all.hits.len(), 44);

    let mut paged = Vec::new();
    for page_index in 1..=5 {
        let page = index.search_page(&request, page_index, 10).unwrap();
        paged.extend(page.hits.into_iter().map(|h| h.document.id));
    }
    let expected: Vec<_> =
        all.hits.into_iter().map(|h| h.document.id).collect();
    assert_eq!(paged, expected);

    let beyond = index.search_page(&request, 9, 10).unwrap();
    assert!(beyond.hits.is_empty());
}

#[test]
fn empty_request_is_rejected_before_searching() {
    let index = eager_index();
    assert!(matches!(
        index.search_page(&QueryRequest::new(), 1, 10),
        Err(Error::EmptyQuery)
    ));
    assert!(matches!(
        index.search_page(
            &QueryRequest::new().should(fields::NAME, "x"),
            0,
            10
        ),
        Err(Error::Validation(_))
    ));
}
