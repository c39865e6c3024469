use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

use rand::seq::SliceRandom;
use rand::{Rng, rng};

use radtab::{GenerationalTable, RadixTrie};

fn words(count: usize) -> Vec<String> {
    let mut rng = rng();
    let mut words: Vec<String> = (0..count)
        .map(|i| {
            let len = rng.random_range(0..24);
            let suffix: String = (0..len)
                .map(|_| rng.random_range(b'a'..=b'f') as char)
                .collect();
            // Shared prefixes force splits while threads race.
            format!("{}{}", ["", "pre", "prefix", "p"][i % 4], suffix)
        })
        .collect();
    words.sort();
    words.dedup();
    words
}

#[test]
fn test_concurrent_get_or_put_agrees() {
    let num_threads = 8;
    let words = Arc::new(words(2_000));
    let trie = Arc::new(RadixTrie::new());
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let words = words.clone();
            let trie = trie.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut order: Vec<usize> = (0..words.len()).collect();
                order.shuffle(&mut rng());
                barrier.wait();
                let mut seen = vec![None; words.len()];
                for i in order {
                    seen[i] = Some(trie.get_or_put(&words[i]).unwrap());
                }
                seen
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for (i, word) in words.iter().enumerate() {
        let index = results[0][i].unwrap();
        for result in &results[1..] {
            assert_eq!(result[i], Some(index), "threads disagree on {word:?}");
        }
        assert_eq!(trie.get_or_put(word).unwrap(), index);
        assert_eq!(trie.read(index).unwrap(), word.as_bytes());
    }

    // Each word owns at most one buffer, and no thread's losing attempt left one behind.
    let stats = trie.stats();
    assert!(stats.num_owned <= words.len());
    let mut by_index = HashMap::new();
    for (i, word) in words.iter().enumerate() {
        let index = results[0][i].unwrap();
        assert!(by_index.insert(index, word).is_none(), "two words share {index}");
    }
}

#[test]
fn test_concurrent_readers_see_interned_strings() {
    let trie = Arc::new(RadixTrie::new());
    let words = Arc::new(words(500));
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let trie = trie.clone();
            let words = words.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut found = 0usize;
                while !done.load(std::sync::atomic::Ordering::Acquire) {
                    for word in words.iter() {
                        if let Some(index) = trie.find(word) {
                            assert_eq!(trie.read(index).unwrap(), word.as_bytes());
                            found += 1;
                        }
                    }
                }
                found
            })
        })
        .collect();

    for word in words.iter() {
        trie.get_or_put(word).unwrap();
    }
    done.store(true, std::sync::atomic::Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }
    for word in words.iter() {
        assert!(trie.find(word).is_some());
    }
}

#[test]
fn test_concurrent_table_churn() {
    let num_threads = 8;
    let per_thread = 2_000;
    let table = Arc::new(GenerationalTable::new());
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let table = table.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut rng = rng();
                let mut mine = Vec::new();
                let mut dead = Vec::new();
                barrier.wait();
                for i in 0..per_thread {
                    let value = t * per_thread + i;
                    let key = table.create(value).unwrap();
                    mine.push((key, value));
                    if rng.random_bool(0.4) {
                        let (key, value) = mine.swap_remove(rng.random_range(0..mine.len()));
                        assert_eq!(table.destroy(key).unwrap(), Some(value));
                        dead.push(key);
                    }
                }
                for (key, value) in &mine {
                    assert_eq!(table.get(*key), Some(*value));
                }
                for key in &dead {
                    assert!(!table.is_valid(*key));
                }
                mine
            })
        })
        .collect();

    let mut live = 0;
    for handle in handles {
        let mine = handle.join().unwrap();
        for (key, value) in &mine {
            assert_eq!(table.get(*key), Some(*value));
        }
        live += mine.len();
    }
    assert_eq!(table.live_count(), live);

    let slice = table.slice();
    assert_eq!(slice.iter().count(), live);
    let mut last = None;
    for (key, _) in slice.iter() {
        let index = table.layout().index(key);
        assert!(last < Some(index), "iteration out of order");
        last = Some(index);
    }
}

#[test]
fn test_concurrent_set_and_iterate() {
    let table = Arc::new(GenerationalTable::new());
    let keys: Vec<_> = (0..256u64).map(|i| table.create(i).unwrap()).collect();
    let keys = Arc::new(keys);

    let writers: Vec<_> = (0..4u64)
        .map(|t| {
            let table = table.clone();
            let keys = keys.clone();
            thread::spawn(move || {
                for round in 0..200 {
                    let key = keys[((round * 4 + t) as usize) % keys.len()];
                    table.set(key, round);
                }
            })
        })
        .collect();
    let reader = {
        let table = table.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let mut iter = table.iter();
                let mut count = 0;
                while iter.next_entry().is_some() {
                    count += 1;
                }
                assert_eq!(count, 256);
            }
        })
    };
    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(table.live_count(), 256);
}
